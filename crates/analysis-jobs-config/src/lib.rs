use analysis_jobs_protocol::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_ANALYSIS_JOBS_CONFIG: &str = "ANALYSIS_JOBS_CONFIG";

const DEFAULT_MAX_WORKERS: usize = 2;
const MAX_WORKERS_LIMIT: usize = 32;
const DEFAULT_LLM_PROVIDER: &str = analysis_jobs_protocol::pipeline::DEFAULT_LLM_PROVIDER;
const DEFAULT_DEEP_THINK_LLM: &str = analysis_jobs_protocol::pipeline::DEFAULT_DEEP_THINK_LLM;
const DEFAULT_QUICK_THINK_LLM: &str = analysis_jobs_protocol::pipeline::DEFAULT_QUICK_THINK_LLM;
const DEFAULT_BACKEND_URL: &str = analysis_jobs_protocol::pipeline::DEFAULT_BACKEND_URL;
const DEFAULT_MARKET: &str = analysis_jobs_protocol::pipeline::DEFAULT_MARKET;
const DEFAULT_DISCUSSION_ROUNDS: u32 = 1;
const DEFAULT_PIPELINE_COMMAND: &str = analysis_jobs_protocol::pipeline::DEFAULT_PIPELINE_COMMAND;
const DEFAULT_HISTORY_ENABLED: bool = true;
const DEFAULT_HISTORY_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisJobsConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    #[serde(default = "default_history_db_path")]
    pub history_db_path: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub pipeline: PipelineConfigToml,
    #[serde(default)]
    pub history: HistoryConfigToml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfigToml {
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "default_deep_think_llm")]
    pub deep_think_llm: String,
    #[serde(default = "default_quick_think_llm")]
    pub quick_think_llm: String,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_discussion_rounds")]
    pub max_debate_rounds: u32,
    #[serde(default = "default_discussion_rounds")]
    pub max_risk_discuss_rounds: u32,
    #[serde(default = "default_pipeline_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for PipelineConfigToml {
    fn default() -> Self {
        Self {
            llm_provider: default_llm_provider(),
            deep_think_llm: default_deep_think_llm(),
            quick_think_llm: default_quick_think_llm(),
            backend_url: default_backend_url(),
            market: default_market(),
            max_debate_rounds: default_discussion_rounds(),
            max_risk_discuss_rounds: default_discussion_rounds(),
            command: default_pipeline_command(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryConfigToml {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
    #[serde(default = "default_history_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for HistoryConfigToml {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            busy_timeout_ms: default_history_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCommandRuntimeConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRuntimeConfig {
    pub enabled: bool,
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl AnalysisJobsConfig {
    /// Baseline pipeline config that per-request overrides are merged over.
    pub fn pipeline_baseline(&self) -> PipelineConfig {
        PipelineConfig {
            results_dir: PathBuf::from(&self.results_dir),
            llm_provider: self.pipeline.llm_provider.clone(),
            deep_think_llm: self.pipeline.deep_think_llm.clone(),
            quick_think_llm: self.pipeline.quick_think_llm.clone(),
            backend_url: self.pipeline.backend_url.clone(),
            market: self.pipeline.market.clone(),
            market_meta: Value::Object(Default::default()),
            max_debate_rounds: self.pipeline.max_debate_rounds,
            max_risk_discuss_rounds: self.pipeline.max_risk_discuss_rounds,
        }
    }

    pub fn pipeline_command(&self) -> PipelineCommandRuntimeConfig {
        PipelineCommandRuntimeConfig {
            program: self.pipeline.command.clone(),
            args: self.pipeline.args.clone(),
        }
    }

    pub fn history_runtime(&self) -> HistoryRuntimeConfig {
        HistoryRuntimeConfig {
            enabled: self.history.enabled,
            db_path: PathBuf::from(&self.history_db_path),
            busy_timeout_ms: self.history.busy_timeout_ms,
        }
    }
}

impl Default for AnalysisJobsConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            history_db_path: default_history_db_path(),
            max_workers: default_max_workers(),
            pipeline: PipelineConfigToml::default(),
            history: HistoryConfigToml::default(),
        }
    }
}

pub fn load_from_env() -> Result<AnalysisJobsConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AnalysisJobsConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home
        .join(".config")
        .join("analysis-jobs")
        .join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_ANALYSIS_JOBS_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "ANALYSIS_JOBS_CONFIG contained invalid UTF-8",
        )),
    }
}

fn default_data_dir() -> PathBuf {
    resolve_data_local_dir().join("analysis-jobs")
}

fn resolve_data_local_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(path) = non_blank_env("LOCALAPPDATA") {
            return absolutize_path(path);
        }
        if let Some(home) = resolve_home_dir() {
            return home.join("AppData").join("Local");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = resolve_home_dir() {
            return home.join("Library").join("Application Support");
        }
    }

    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    {
        if let Some(path) = non_blank_env("XDG_DATA_HOME") {
            return absolutize_path(path);
        }
        if let Some(home) = resolve_home_dir() {
            return home.join(".local").join("share");
        }
    }

    std::env::temp_dir()
}

fn non_blank_env(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn resolve_home_dir() -> Option<PathBuf> {
    non_blank_env("HOME").or_else(|| non_blank_env("USERPROFILE"))
}

#[cfg_attr(target_os = "macos", allow(dead_code))]
fn absolutize_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }

    if let Ok(current) = std::env::current_dir() {
        return current.join(path);
    }

    std::env::temp_dir().join(path)
}

fn default_results_dir() -> String {
    default_data_dir()
        .join("results")
        .to_string_lossy()
        .to_string()
}

fn default_history_db_path() -> String {
    default_data_dir()
        .join("history.db")
        .to_string_lossy()
        .to_string()
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_llm_provider() -> String {
    DEFAULT_LLM_PROVIDER.to_owned()
}

fn default_deep_think_llm() -> String {
    DEFAULT_DEEP_THINK_LLM.to_owned()
}

fn default_quick_think_llm() -> String {
    DEFAULT_QUICK_THINK_LLM.to_owned()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_owned()
}

fn default_market() -> String {
    DEFAULT_MARKET.to_owned()
}

fn default_discussion_rounds() -> u32 {
    DEFAULT_DISCUSSION_ROUNDS
}

fn default_pipeline_command() -> String {
    DEFAULT_PIPELINE_COMMAND.to_owned()
}

fn default_history_enabled() -> bool {
    DEFAULT_HISTORY_ENABLED
}

fn default_history_busy_timeout_ms() -> u64 {
    DEFAULT_HISTORY_BUSY_TIMEOUT_MS
}

fn persist_config(path: &Path, config: &AnalysisJobsConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize ANALYSIS_JOBS_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write ANALYSIS_JOBS_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<AnalysisJobsConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for ANALYSIS_JOBS_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = AnalysisJobsConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read ANALYSIS_JOBS_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: AnalysisJobsConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse ANALYSIS_JOBS_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    if normalize_config(&mut config) {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut AnalysisJobsConfig) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.results_dir, default_results_dir());
    changed |= normalize_non_empty_string(&mut config.history_db_path, default_history_db_path());

    let normalized_max_workers = if config.max_workers == 0 {
        default_max_workers()
    } else {
        config.max_workers.clamp(1, MAX_WORKERS_LIMIT)
    };
    if normalized_max_workers != config.max_workers {
        config.max_workers = normalized_max_workers;
        changed = true;
    }

    changed |= normalize_pipeline_config(&mut config.pipeline);
    changed |= normalize_history_config(&mut config.history);

    changed
}

pub fn normalize_pipeline_config(config: &mut PipelineConfigToml) -> bool {
    let mut changed = false;

    let provider = config.llm_provider.trim().to_ascii_lowercase();
    if provider != config.llm_provider {
        config.llm_provider = provider;
        changed = true;
    }
    changed |= normalize_non_empty_string(&mut config.llm_provider, default_llm_provider());
    changed |= normalize_non_empty_string(&mut config.deep_think_llm, default_deep_think_llm());
    changed |= normalize_non_empty_string(&mut config.quick_think_llm, default_quick_think_llm());
    changed |= normalize_non_empty_string(&mut config.backend_url, default_backend_url());
    changed |= normalize_non_empty_string(&mut config.market, default_market());
    changed |= normalize_non_empty_string(&mut config.command, default_pipeline_command());

    for rounds in [
        &mut config.max_debate_rounds,
        &mut config.max_risk_discuss_rounds,
    ] {
        let normalized = (*rounds).clamp(1, analysis_jobs_protocol::request::MAX_RESEARCH_DEPTH);
        if normalized != *rounds {
            *rounds = normalized;
            changed = true;
        }
    }

    changed
}

pub fn normalize_history_config(config: &mut HistoryConfigToml) -> bool {
    let normalized_busy_timeout_ms = if config.busy_timeout_ms == 0 {
        default_history_busy_timeout_ms()
    } else {
        config.busy_timeout_ms.clamp(100, 60_000)
    };
    if normalized_busy_timeout_ms != config.busy_timeout_ms {
        config.busy_timeout_ms = normalized_busy_timeout_ms;
        return true;
    }
    false
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Mutex, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<F>(vars: &[(&str, Option<&str>)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = env_lock().lock().expect("env lock");
        let backup = vars
            .iter()
            .map(|(name, _)| ((*name).to_owned(), std::env::var(name).ok()))
            .collect::<Vec<_>>();

        for (name, value) in vars {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }

        test();

        for (name, value) in backup {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "analysis-jobs-config-{prefix}-{nanos}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn remove_temp_path(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    fn write_config_file(path: &Path, raw: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture config parent");
        }
        std::fs::write(path, raw.as_bytes()).expect("write fixture config");
    }

    #[test]
    fn load_from_env_creates_default_config_when_missing() {
        let home = unique_temp_dir("home-defaults");
        let expected = home
            .join(".config")
            .join("analysis-jobs")
            .join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_ANALYSIS_JOBS_CONFIG, None),
                ("XDG_DATA_HOME", None),
                ("LOCALAPPDATA", None),
            ],
            || {
                let config = load_from_env().expect("load defaults");
                assert_eq!(config.max_workers, 2);
                assert_eq!(config.pipeline.llm_provider, "openai");
                assert_eq!(config.pipeline.max_debate_rounds, 1);
                assert!(config.history.enabled);
                assert!(expected.exists());
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn load_from_env_honors_explicit_config_path() {
        let home = unique_temp_dir("home-explicit-path");
        let root = unique_temp_dir("explicit-path");
        let explicit = root.join("nested").join("custom.toml");
        let default = home
            .join(".config")
            .join("analysis-jobs")
            .join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (
                    ENV_ANALYSIS_JOBS_CONFIG,
                    Some(explicit.to_str().expect("config path")),
                ),
            ],
            || {
                let config = load_from_env().expect("load explicit path config");
                assert!(explicit.exists());
                assert!(!default.exists());
                assert_eq!(config.max_workers, 2);
            },
        );

        remove_temp_path(&home);
        remove_temp_path(&root);
    }

    #[test]
    fn load_from_env_treats_blank_config_variable_as_unset() {
        let home = unique_temp_dir("home-blank-path");
        let expected = home
            .join(".config")
            .join("analysis-jobs")
            .join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_ANALYSIS_JOBS_CONFIG, Some("  ")),
            ],
            || {
                load_from_env().expect("load config from default path");
                assert!(expected.exists());
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn default_config_path_falls_back_to_userprofile_when_home_is_blank() {
        let userprofile = unique_temp_dir("userprofile-default-path");
        let expected = userprofile
            .join(".config")
            .join("analysis-jobs")
            .join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(" ")),
                (
                    "USERPROFILE",
                    Some(userprofile.to_str().expect("userprofile path")),
                ),
            ],
            || {
                let resolved = default_config_path().expect("resolve default config path");
                assert_eq!(resolved, expected);
            },
        );

        remove_temp_path(&userprofile);
    }

    #[test]
    fn load_from_path_fills_missing_sections_with_defaults() {
        let root = unique_temp_dir("partial");
        let path = root.join("config.toml");
        write_config_file(
            &path,
            "results_dir = '/srv/results'\nhistory_db_path = '/srv/history.db'\n[pipeline]\nquick_think_llm = 'gpt-4.1-mini'\n",
        );

        let config = load_from_path(&path).expect("load partial config");

        assert_eq!(config.results_dir, "/srv/results");
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.pipeline.quick_think_llm, "gpt-4.1-mini");
        assert_eq!(config.pipeline.deep_think_llm, "o4-mini");
        assert_eq!(config.pipeline.command, "tradingagents-pipeline");
        assert_eq!(config.history.busy_timeout_ms, 5000);

        remove_temp_path(&root);
    }

    #[test]
    fn load_from_path_normalizes_and_persists_out_of_range_values() {
        let root = unique_temp_dir("normalize");
        let path = root.join("config.toml");
        write_config_file(
            &path,
            "results_dir = '  '\nhistory_db_path = ' /srv/history.db '\nmax_workers = 100\n[pipeline]\nllm_provider = ' DeepSeek '\nbackend_url = ''\nmax_debate_rounds = 0\nmax_risk_discuss_rounds = 12\n[history]\nbusy_timeout_ms = 5\n",
        );

        with_env_vars(&[], || {
            let config = load_from_path(&path).expect("load normalized config");

            assert_eq!(config.results_dir, default_results_dir());
            assert_eq!(config.history_db_path, "/srv/history.db");
            assert_eq!(config.max_workers, 32);
            assert_eq!(config.pipeline.llm_provider, "deepseek");
            assert_eq!(config.pipeline.backend_url, "https://api.openai.com/v1");
            assert_eq!(config.pipeline.max_debate_rounds, 1);
            assert_eq!(config.pipeline.max_risk_discuss_rounds, 5);
            assert_eq!(config.history.busy_timeout_ms, 100);

            let persisted = std::fs::read_to_string(&path).expect("read persisted config");
            let reparsed: AnalysisJobsConfig =
                toml::from_str(&persisted).expect("parse persisted");
            assert_eq!(reparsed, config);
        });

        remove_temp_path(&root);
    }

    #[test]
    fn zero_max_workers_restores_default_pool_size() {
        let mut config = AnalysisJobsConfig {
            max_workers: 0,
            ..AnalysisJobsConfig::default()
        };

        assert!(normalize_config(&mut config));
        assert_eq!(config.max_workers, 2);
        assert!(!normalize_config(&mut config));
    }

    #[test]
    fn blank_pipeline_command_restores_the_shared_default() {
        let mut config = AnalysisJobsConfig::default();
        assert_eq!(
            config.pipeline.command,
            analysis_jobs_protocol::pipeline::DEFAULT_PIPELINE_COMMAND
        );

        config.pipeline.command = "   ".to_owned();
        assert!(normalize_config(&mut config));
        assert_eq!(
            config.pipeline_command().program,
            analysis_jobs_protocol::pipeline::DEFAULT_PIPELINE_COMMAND
        );
    }

    #[test]
    fn load_from_path_rejects_malformed_toml() {
        let root = unique_temp_dir("malformed");
        let path = root.join("config.toml");
        write_config_file(&path, "max_workers = 'many'\n");

        let error = load_from_path(&path).expect_err("malformed config should fail");
        assert!(error.to_string().contains("Failed to parse ANALYSIS_JOBS_CONFIG"));

        remove_temp_path(&root);
    }

    #[test]
    fn runtime_views_project_the_file_config() {
        let config = AnalysisJobsConfig {
            results_dir: "/srv/results".to_owned(),
            history_db_path: "/srv/history.db".to_owned(),
            pipeline: PipelineConfigToml {
                command: "python3".to_owned(),
                args: vec!["-m".to_owned(), "tradingagents.stream".to_owned()],
                max_debate_rounds: 3,
                ..PipelineConfigToml::default()
            },
            ..AnalysisJobsConfig::default()
        };

        let baseline = config.pipeline_baseline();
        assert_eq!(baseline.results_dir, PathBuf::from("/srv/results"));
        assert_eq!(baseline.max_debate_rounds, 3);
        assert_eq!(baseline.market, "us");

        let command = config.pipeline_command();
        assert_eq!(command.program, "python3");
        assert_eq!(command.args, vec!["-m", "tradingagents.stream"]);

        let history = config.history_runtime();
        assert!(history.enabled);
        assert_eq!(history.db_path, PathBuf::from("/srv/history.db"));
    }
}
