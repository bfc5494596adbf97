use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use analysis_jobs_config::AnalysisJobsConfig;
use analysis_jobs_driver::ExecutionDriver;
use analysis_jobs_history::{HistoryBridge, SqliteHistoryStore};
use analysis_jobs_protocol::{AnalysisError, AnalysisResult};
use analysis_jobs_registry::{JobRegistry, WorkerPool};
use pipeline_command::{CommandPipelineConfig, CommandPipelineFactory};

const LOG_FILE_NAME: &str = "analysis-jobs.log";

/// Wires config into a registry backed by the command pipeline.
pub fn build_registry(config: &AnalysisJobsConfig) -> AnalysisResult<JobRegistry> {
    let command = config.pipeline_command();
    let factory = CommandPipelineFactory::new(CommandPipelineConfig {
        program: PathBuf::from(command.program),
        args: command.args,
    });
    let driver = ExecutionDriver::new(config.pipeline_baseline(), Arc::new(factory));
    JobRegistry::new(
        driver,
        open_history(config),
        WorkerPool::new(config.max_workers),
    )
}

/// History is optional; an unusable database only disables mirroring.
pub fn open_history(config: &AnalysisJobsConfig) -> HistoryBridge {
    let runtime = config.history_runtime();
    if !runtime.enabled {
        return HistoryBridge::disabled();
    }
    match SqliteHistoryStore::open(
        &runtime.db_path,
        Duration::from_millis(runtime.busy_timeout_ms),
    ) {
        Ok(store) => HistoryBridge::new(Arc::new(store)),
        Err(error) => {
            tracing::warn!(
                path = %runtime.db_path.display(),
                error = %error,
                "history database unavailable; job history disabled"
            );
            HistoryBridge::disabled()
        }
    }
}

pub fn init_file_logging(history_db_path: &Path) -> AnalysisResult<()> {
    let log_path = log_file_path(history_db_path);
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                AnalysisError::Configuration(format!(
                    "failed to create log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            AnalysisError::Configuration(format!(
                "failed to open log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

pub fn log_file_path(history_db_path: &Path) -> PathBuf {
    history_db_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_log_sits_next_to_history_database() {
        assert_eq!(
            log_file_path(Path::new("/var/lib/analysis-jobs/history.db")),
            PathBuf::from("/var/lib/analysis-jobs/analysis-jobs.log")
        );
        assert_eq!(
            log_file_path(Path::new("history.db")),
            PathBuf::from("./analysis-jobs.log")
        );
    }

    #[test]
    fn disabled_history_is_never_opened() {
        let mut config = AnalysisJobsConfig::default();
        config.history.enabled = false;
        config.history_db_path = "/nonexistent/analysis-jobs/history.db".to_owned();

        assert!(!open_history(&config).is_enabled());
    }

    #[tokio::test]
    async fn registry_uses_configured_pool_size() {
        let mut config = AnalysisJobsConfig::default();
        config.history.enabled = false;
        config.max_workers = 3;

        let registry = build_registry(&config).expect("build registry");

        assert_eq!(registry.pool_capacity(), 3);
        assert!(!registry.history().is_enabled());
    }
}
