use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use analysis_jobs_protocol::{
    AnalysisRequest, AnalysisResult, JobOutcome, PipelineConfig, PipelineDelta, PipelineFactory,
    StageKey,
};

use crate::artifacts::{persist_reports, ArtifactDirs, FinalState};
use crate::log::JobLog;
use crate::overrides::merge_overrides;

pub const MSG_PIPELINE_INITIALIZED: &str = "Task initialized, starting analysis pipeline";
pub const MSG_PIPELINE_FINISHED: &str = "Analysis pipeline finished, generating reports";
pub const MSG_REPORTS_WRITTEN: &str = "Reports written";

/// Tracks which stages already produced a completion line.
#[derive(Debug, Default)]
pub struct StageProgress {
    emitted: BTreeSet<StageKey>,
}

impl StageProgress {
    /// Stages that appear with a non-empty value in `delta` for the first time.
    pub fn newly_completed(&mut self, delta: &PipelineDelta) -> Vec<StageKey> {
        StageKey::ALL
            .into_iter()
            .filter(|stage| delta.has_stage(*stage) && self.emitted.insert(*stage))
            .collect()
    }
}

/// Runs one analysis request end to end against a pipeline built per job.
#[derive(Clone)]
pub struct ExecutionDriver {
    baseline: PipelineConfig,
    factory: Arc<dyn PipelineFactory>,
}

impl ExecutionDriver {
    pub fn new(baseline: PipelineConfig, factory: Arc<dyn PipelineFactory>) -> Self {
        Self { baseline, factory }
    }

    pub fn baseline(&self) -> &PipelineConfig {
        &self.baseline
    }

    pub async fn run(&self, request: &AnalysisRequest, log: &JobLog) -> AnalysisResult<JobOutcome> {
        let selections = request.sanitize()?;
        let config = merge_overrides(&self.baseline, request, &selections);
        let dirs = ArtifactDirs::ensure(log.result_dir())?;

        log.append(MSG_PIPELINE_INITIALIZED)?;

        let pipeline = self.factory.build(&config, &selections.analysts)?;
        let initial_state = pipeline.initial_state(&selections.ticker, &selections.analysis_date);
        let mut stream = pipeline.stream(initial_state).await?;

        let mut final_state = FinalState::new();
        let mut progress = StageProgress::default();
        while let Some(delta) = stream.next_delta().await? {
            for stage in progress.newly_completed(&delta) {
                log.append(stage.completion_message())?;
            }
            final_state.extend(delta.into_entries());
        }

        log.append(MSG_PIPELINE_FINISHED)?;
        let summary = persist_reports(&dirs, &final_state, &selections, &config.market)?;
        log.append(MSG_REPORTS_WRITTEN)?;

        let state = StageKey::ALL
            .into_iter()
            .map(|stage| (stage, final_state.get(stage.as_str()).cloned()))
            .collect::<BTreeMap<_, _>>();

        Ok(JobOutcome {
            state,
            result_dir: dirs.result,
            summary,
            log_path: log.path().to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_progress_reports_each_stage_once() {
        let mut progress = StageProgress::default();

        let first = PipelineDelta::new()
            .with("news_report", "headline")
            .with("market_report", "trend");
        let repeat = PipelineDelta::new()
            .with("market_report", "trend, revised")
            .with("sentiment_report", "");
        let later = PipelineDelta::new().with("sentiment_report", "calm");

        assert_eq!(
            progress.newly_completed(&first),
            vec![StageKey::MarketReport, StageKey::NewsReport]
        );
        assert!(progress.newly_completed(&repeat).is_empty());
        assert_eq!(
            progress.newly_completed(&later),
            vec![StageKey::SentimentReport]
        );
    }
}
