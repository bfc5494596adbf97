use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Report sections the pipeline fills in, in the order they complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    MarketReport,
    SentimentReport,
    NewsReport,
    FundamentalsReport,
    InvestmentPlan,
    TraderInvestmentPlan,
    FinalTradeDecision,
}

impl StageKey {
    pub const ALL: [StageKey; 7] = [
        StageKey::MarketReport,
        StageKey::SentimentReport,
        StageKey::NewsReport,
        StageKey::FundamentalsReport,
        StageKey::InvestmentPlan,
        StageKey::TraderInvestmentPlan,
        StageKey::FinalTradeDecision,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketReport => "market_report",
            Self::SentimentReport => "sentiment_report",
            Self::NewsReport => "news_report",
            Self::FundamentalsReport => "fundamentals_report",
            Self::InvestmentPlan => "investment_plan",
            Self::TraderInvestmentPlan => "trader_investment_plan",
            Self::FinalTradeDecision => "final_trade_decision",
        }
    }

    pub fn completion_message(self) -> &'static str {
        match self {
            Self::MarketReport => "Market analysis completed",
            Self::SentimentReport => "Sentiment analysis completed",
            Self::NewsReport => "News analysis completed",
            Self::FundamentalsReport => "Fundamentals analysis completed",
            Self::InvestmentPlan => "Research team summary completed",
            Self::TraderInvestmentPlan => "Trader investment plan completed",
            Self::FinalTradeDecision => "Risk assessment completed",
        }
    }
}

/// One incremental update emitted by the pipeline stream.
///
/// Keys are arbitrary pipeline state fields; only [`StageKey`] fields drive
/// progress logging and artifact persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineDelta {
    values: BTreeMap<String, Value>,
}

impl PipelineDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the delta carries `stage` with a non-empty value.
    pub fn has_stage(&self, stage: StageKey) -> bool {
        self.values.get(stage.as_str()).is_some_and(is_present)
    }

    pub fn into_entries(self) -> impl Iterator<Item = (String, Value)> {
        self.values.into_iter()
    }
}

impl From<serde_json::Map<String, Value>> for PipelineDelta {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

impl FromIterator<(String, Value)> for PipelineDelta {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Truthiness of a state value: null, blank strings, false, zero and empty
/// collections do not count as produced output.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
