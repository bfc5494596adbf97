use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use analysis_jobs_protocol::clock::now_rfc3339;
use analysis_jobs_protocol::{AnalysisError, AnalysisRequest, AnalysisResult};

pub const LOG_FILE_NAME: &str = "message_tool.log";

/// Append-only progress log of one job.
///
/// Every line is `[<RFC 3339 UTC>] <message>`. The file handle is opened per
/// append and dropped before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates `<results_dir>/<TICKER>/<date>/message_tool.log` if absent.
    pub fn prepare(results_dir: &Path, request: &AnalysisRequest) -> AnalysisResult<Self> {
        let (ticker, analysis_date) = request.log_location()?;
        let dir = results_dir.join(ticker).join(analysis_date);
        std::fs::create_dir_all(&dir).map_err(|err| {
            AnalysisError::Persistence(format!(
                "failed to create job directory {}: {err}",
                dir.display()
            ))
        })?;

        let log = Self::at(dir.join(LOG_FILE_NAME));
        log.open_append()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the job's artifacts are written next to.
    pub fn result_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn append(&self, message: &str) -> AnalysisResult<()> {
        let mut file = self.open_append()?;
        writeln!(file, "[{}] {message}", now_rfc3339()).map_err(|err| {
            AnalysisError::Persistence(format!(
                "failed to append to job log {}: {err}",
                self.path.display()
            ))
        })
    }

    /// Last `limit` lines of the log. A missing file reads as empty.
    pub fn tail(&self, limit: usize) -> AnalysisResult<Vec<String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(AnalysisError::Persistence(format!(
                    "failed to read job log {}: {err}",
                    self.path.display()
                )))
            }
        };

        let lines = raw.lines().collect::<Vec<_>>();
        let start = lines.len().saturating_sub(limit);
        Ok(lines[start..].iter().map(|line| (*line).to_owned()).collect())
    }

    fn open_append(&self) -> AnalysisResult<std::fs::File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    AnalysisError::Persistence(format!(
                        "failed to create job log directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                AnalysisError::Persistence(format!(
                    "failed to open job log {}: {err}",
                    self.path.display()
                ))
            })
    }
}
