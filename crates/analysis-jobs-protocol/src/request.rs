use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnalysisError, AnalysisResult};

pub const DEFAULT_ANALYSTS: &[&str] = &["market", "social", "news", "fundamentals"];
pub const DEFAULT_RESEARCH_DEPTH: u32 = 1;
pub const MAX_RESEARCH_DEPTH: u32 = 5;

/// Raw selection payload as submitted by a caller.
///
/// Only presence is checked at submission time; [`AnalysisRequest::sanitize`]
/// is the full validation performed by the execution driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub analysis_date: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub analysts: Vec<String>,
    #[serde(default)]
    pub research_depth: Option<u32>,
    #[serde(default)]
    pub shallow_thinker: Option<String>,
    #[serde(default)]
    pub deep_thinker: Option<String>,
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub market_meta: Option<Value>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSelections {
    pub ticker: String,
    pub analysis_date: String,
    pub market: String,
    pub analysts: Vec<String>,
    pub research_depth: u32,
}

impl AnalysisRequest {
    pub fn new(
        ticker: impl Into<String>,
        analysis_date: impl Into<String>,
        market: impl Into<String>,
    ) -> Self {
        Self {
            ticker: Some(ticker.into()),
            analysis_date: Some(analysis_date.into()),
            market: Some(market.into()),
            ..Self::default()
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn owner(&self) -> Option<&str> {
        non_blank(self.owner.as_deref())
    }

    /// Upper-cased ticker and date used to place the job log before the job is queued.
    pub fn log_location(&self) -> AnalysisResult<(String, String)> {
        match (
            non_blank(self.ticker.as_deref()),
            non_blank(self.analysis_date.as_deref()),
        ) {
            (Some(ticker), Some(analysis_date)) => {
                Ok((ticker.to_ascii_uppercase(), analysis_date.to_owned()))
            }
            _ => Err(AnalysisError::Validation(
                "ticker and analysis date are required to prepare the job log".to_owned(),
            )),
        }
    }

    pub fn sanitize(&self) -> AnalysisResult<AnalysisSelections> {
        let ticker = non_blank(self.ticker.as_deref());
        let analysis_date = non_blank(self.analysis_date.as_deref());
        let market = non_blank(self.market.as_deref());

        let (ticker, analysis_date, market) = match (ticker, analysis_date, market) {
            (Some(ticker), Some(analysis_date), Some(market)) => (ticker, analysis_date, market),
            (ticker, analysis_date, market) => {
                let mut missing = Vec::new();
                if analysis_date.is_none() {
                    missing.push("analysis_date");
                }
                if market.is_none() {
                    missing.push("market");
                }
                if ticker.is_none() {
                    missing.push("ticker");
                }
                return Err(AnalysisError::Validation(format!(
                    "missing required selections: {}",
                    missing.join(", ")
                )));
            }
        };

        let mut analysts = self
            .analysts
            .iter()
            .map(|analyst| analyst.trim())
            .filter(|analyst| !analyst.is_empty())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();
        if analysts.is_empty() {
            analysts = DEFAULT_ANALYSTS
                .iter()
                .map(|analyst| (*analyst).to_owned())
                .collect();
        }

        Ok(AnalysisSelections {
            ticker: ticker.to_ascii_uppercase(),
            analysis_date: analysis_date.to_owned(),
            market: market.to_owned(),
            analysts,
            research_depth: self
                .research_depth
                .unwrap_or(DEFAULT_RESEARCH_DEPTH)
                .clamp(1, MAX_RESEARCH_DEPTH),
        })
    }
}

/// Trimmed value, or `None` when absent or blank.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
