use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AnalysisResult;
use crate::stage::PipelineDelta;

pub const DEFAULT_RESULTS_DIR: &str = "./results";
pub const DEFAULT_LLM_PROVIDER: &str = "openai";
pub const DEFAULT_DEEP_THINK_LLM: &str = "o4-mini";
pub const DEFAULT_QUICK_THINK_LLM: &str = "gpt-4o-mini";
pub const DEFAULT_BACKEND_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MARKET: &str = "us";
pub const DEFAULT_PIPELINE_COMMAND: &str = "tradingagents-pipeline";

/// Configuration handed to a pipeline when it is built for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub results_dir: PathBuf,
    pub llm_provider: String,
    pub deep_think_llm: String,
    pub quick_think_llm: String,
    pub backend_url: String,
    pub market: String,
    #[serde(default)]
    pub market_meta: Value,
    pub max_debate_rounds: u32,
    pub max_risk_discuss_rounds: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            llm_provider: DEFAULT_LLM_PROVIDER.to_owned(),
            deep_think_llm: DEFAULT_DEEP_THINK_LLM.to_owned(),
            quick_think_llm: DEFAULT_QUICK_THINK_LLM.to_owned(),
            backend_url: DEFAULT_BACKEND_URL.to_owned(),
            market: DEFAULT_MARKET.to_owned(),
            market_meta: Value::Object(Default::default()),
            max_debate_rounds: 1,
            max_risk_discuss_rounds: 1,
        }
    }
}

/// Seed state the pipeline stream starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub company_of_interest: String,
    pub trade_date: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PipelineState {
    pub fn new(company_of_interest: impl Into<String>, trade_date: impl Into<String>) -> Self {
        Self {
            company_of_interest: company_of_interest.into(),
            trade_date: trade_date.into(),
            extra: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait PipelineDeltaSubscription: Send {
    /// Next delta, or `None` once the pipeline has finished.
    async fn next_delta(&mut self) -> AnalysisResult<Option<PipelineDelta>>;
}

pub type PipelineDeltaStream = Box<dyn PipelineDeltaSubscription>;

#[async_trait]
pub trait AnalysisPipeline: Send + Sync {
    fn initial_state(&self, ticker: &str, trade_date: &str) -> PipelineState {
        PipelineState::new(ticker, trade_date)
    }

    async fn stream(&self, state: PipelineState) -> AnalysisResult<PipelineDeltaStream>;
}

/// Builds a pipeline for one job from the merged config and the selected analysts.
pub trait PipelineFactory: Send + Sync {
    fn build(
        &self,
        config: &PipelineConfig,
        analysts: &[String],
    ) -> AnalysisResult<Arc<dyn AnalysisPipeline>>;
}
