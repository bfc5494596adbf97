use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use analysis_jobs_protocol::clock::now_rfc3339;
use analysis_jobs_protocol::stage::is_present;
use analysis_jobs_protocol::{
    AnalysisError, AnalysisResult, AnalysisSelections, AnalysisSummary, StageKey,
};
use serde_json::Value;

pub const REPORTS_DIR_NAME: &str = "reports";
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Accumulated pipeline state, keyed by state field name.
pub type FinalState = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirs {
    pub result: PathBuf,
    pub reports: PathBuf,
}

impl ArtifactDirs {
    pub fn ensure(result_dir: &Path) -> AnalysisResult<Self> {
        let reports = result_dir.join(REPORTS_DIR_NAME);
        std::fs::create_dir_all(&reports).map_err(|err| {
            AnalysisError::Persistence(format!(
                "failed to create report directory {}: {err}",
                reports.display()
            ))
        })?;
        Ok(Self {
            result: result_dir.to_path_buf(),
            reports,
        })
    }

    pub fn report_path(&self, stage: StageKey) -> PathBuf {
        self.reports.join(format!("{}.md", stage.as_str()))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.result.join(SUMMARY_FILE_NAME)
    }
}

pub fn build_summary(
    final_state: &FinalState,
    selections: &AnalysisSelections,
    market: &str,
) -> AnalysisSummary {
    let reports = StageKey::ALL
        .into_iter()
        .filter_map(|stage| {
            final_state
                .get(stage.as_str())
                .filter(|value| is_present(value))
                .map(|value| (stage, value.clone()))
        })
        .collect();

    let decision = match final_state.get(StageKey::FinalTradeDecision.as_str()) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };

    AnalysisSummary {
        ticker: selections.ticker.clone(),
        analysis_date: selections.analysis_date.clone(),
        market: market.to_owned(),
        reports,
        decision,
        generated_at: now_rfc3339(),
    }
}

/// Writes one markdown file per present string section plus `summary.json`.
///
/// Section files are optional output and only warn on failure; the summary
/// is mandatory.
pub fn persist_reports(
    dirs: &ArtifactDirs,
    final_state: &FinalState,
    selections: &AnalysisSelections,
    market: &str,
) -> AnalysisResult<AnalysisSummary> {
    for stage in StageKey::ALL {
        let Some(Value::String(text)) = final_state.get(stage.as_str()) else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        let path = dirs.report_path(stage);
        if let Err(error) = std::fs::write(&path, text.as_bytes()) {
            tracing::warn!(
                path = %path.display(),
                section = stage.as_str(),
                error = %error,
                "failed to write report section"
            );
        }
    }

    let summary = build_summary(final_state, selections, market);
    let rendered = serde_json::to_string_pretty(&summary)
        .map_err(|err| AnalysisError::Persistence(format!("failed to render summary: {err}")))?;
    let summary_path = dirs.summary_path();
    std::fs::write(&summary_path, rendered.as_bytes()).map_err(|err| {
        AnalysisError::Persistence(format!(
            "failed to write summary {}: {err}",
            summary_path.display()
        ))
    })?;

    Ok(summary)
}
