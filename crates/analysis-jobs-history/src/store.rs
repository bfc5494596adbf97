use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::HistoryError;
use crate::record::{HistoryRecord, UserJobCount};

pub trait HistoryStore: Send + Sync {
    fn find_by_job_id(&self, job_id: &str) -> Result<Option<HistoryRecord>, HistoryError>;
    fn insert(&self, record: &HistoryRecord) -> Result<(), HistoryError>;
    fn update(&self, record: &HistoryRecord) -> Result<(), HistoryError>;
    /// Rows owned by `username`, newest first.
    fn list_for_username(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError>;
    /// Job counts grouped by owner, largest first.
    fn count_by_username(&self) -> Result<Vec<UserJobCount>, HistoryError>;
}

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "
    job_id, username, ticker, analysis_date, status, decision, result_dir,
    summary_json, log_path, error, created_at, updated_at, completed_at
";

impl SqliteHistoryStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| HistoryError::Persistence(err.to_string()))?;
            }
        }
        let conn =
            Connection::open(path).map_err(|err| HistoryError::Persistence(err.to_string()))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), HistoryError> {
        self.conn
            .lock()
            .expect("history connection lock poisoned")
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS job_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL,
                    ticker TEXT NOT NULL,
                    analysis_date TEXT NOT NULL,
                    status TEXT NOT NULL,
                    decision TEXT NULL,
                    result_dir TEXT NULL,
                    summary_json TEXT NULL,
                    log_path TEXT NULL,
                    error TEXT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    completed_at TEXT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_job_history_username ON job_history(username, id DESC);
                ",
            )
            .map_err(|err| HistoryError::Persistence(err.to_string()))
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
        Ok(HistoryRecord {
            job_id: row.get(0)?,
            username: row.get(1)?,
            ticker: row.get(2)?,
            analysis_date: row.get(3)?,
            status: row.get(4)?,
            decision: row.get(5)?,
            result_dir: row.get(6)?,
            summary_json: row.get(7)?,
            log_path: row.get(8)?,
            error: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn find_by_job_id(&self, job_id: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        let conn = self.conn.lock().expect("history connection lock poisoned");
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM job_history WHERE job_id = ?1"),
            params![job_id],
            Self::map_row,
        )
        .optional()
        .map_err(|err| HistoryError::Persistence(err.to_string()))
    }

    fn insert(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history connection lock poisoned");
        conn.execute(
            "
            INSERT INTO job_history (
                job_id, username, ticker, analysis_date, status, decision, result_dir,
                summary_json, log_path, error, created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
            params![
                record.job_id,
                record.username,
                record.ticker,
                record.analysis_date,
                record.status,
                record.decision,
                record.result_dir,
                record.summary_json,
                record.log_path,
                record.error,
                record.created_at,
                record.updated_at,
                record.completed_at,
            ],
        )
        .map_err(|err| HistoryError::Persistence(err.to_string()))?;
        Ok(())
    }

    fn update(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history connection lock poisoned");
        let changed = conn
            .execute(
                "
                UPDATE job_history
                SET status = ?2, decision = ?3, result_dir = ?4, summary_json = ?5,
                    log_path = ?6, error = ?7, updated_at = ?8, completed_at = ?9
                WHERE job_id = ?1
                ",
                params![
                    record.job_id,
                    record.status,
                    record.decision,
                    record.result_dir,
                    record.summary_json,
                    record.log_path,
                    record.error,
                    record.updated_at,
                    record.completed_at,
                ],
            )
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;
        if changed == 0 {
            return Err(HistoryError::Persistence(format!(
                "no history row for job {}",
                record.job_id
            )));
        }
        Ok(())
    }

    fn list_for_username(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.conn.lock().expect("history connection lock poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM job_history WHERE username = ?1 ORDER BY id DESC LIMIT ?2"
            ))
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;
        let rows = stmt
            .query_map(params![username, limit as i64], Self::map_row)
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|err| HistoryError::Persistence(err.to_string()))?);
        }
        Ok(result)
    }

    fn count_by_username(&self) -> Result<Vec<UserJobCount>, HistoryError> {
        let conn = self.conn.lock().expect("history connection lock poisoned");
        let mut stmt = conn
            .prepare(
                "
                SELECT username, COUNT(id) AS total
                FROM job_history
                GROUP BY username
                ORDER BY total DESC, username ASC
                ",
            )
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserJobCount {
                    username: row.get(0)?,
                    count: row.get::<_, i64>(1)?.max(0) as u64,
                })
            })
            .map_err(|err| HistoryError::Persistence(err.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|err| HistoryError::Persistence(err.to_string()))?);
        }
        Ok(result)
    }
}
