use analysis_jobs_protocol::request::non_blank;
use analysis_jobs_protocol::{AnalysisRequest, AnalysisSelections, PipelineConfig};
use serde_json::Value;

/// Merges per-request choices over the baseline pipeline config.
///
/// Research depth sets both discussion round limits. Blank overrides keep
/// the baseline value.
pub fn merge_overrides(
    baseline: &PipelineConfig,
    request: &AnalysisRequest,
    selections: &AnalysisSelections,
) -> PipelineConfig {
    let mut config = baseline.clone();
    config.max_debate_rounds = selections.research_depth;
    config.max_risk_discuss_rounds = selections.research_depth;

    if let Some(model) = non_blank(request.shallow_thinker.as_deref()) {
        config.quick_think_llm = model.to_owned();
    }
    if let Some(model) = non_blank(request.deep_thinker.as_deref()) {
        config.deep_think_llm = model.to_owned();
    }
    if let Some(url) = non_blank(request.backend_url.as_deref()) {
        config.backend_url = url.to_owned();
    }
    if let Some(provider) = non_blank(request.llm_provider.as_deref()) {
        config.llm_provider = provider.to_owned();
    }

    config.market = selections.market.clone();
    config.market_meta = request
        .market_meta
        .clone()
        .unwrap_or_else(|| Value::Object(Default::default()));
    config
}
