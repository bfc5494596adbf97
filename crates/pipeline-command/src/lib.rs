//! Pipeline adapter backed by an external process.
//!
//! The process receives one JSON document on stdin and reports progress as
//! JSON-lines on stdout, one partial state object per line.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use analysis_jobs_protocol::{
    AnalysisError, AnalysisPipeline, AnalysisResult, PipelineConfig, PipelineDelta,
    PipelineDeltaStream, PipelineDeltaSubscription, PipelineFactory, PipelineState,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

pub use analysis_jobs_protocol::pipeline::DEFAULT_PIPELINE_COMMAND;
const MAX_STDERR_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPipelineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for CommandPipelineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PIPELINE_COMMAND),
            args: Vec::new(),
        }
    }
}

/// Builds one [`CommandPipeline`] per job from the merged config.
#[derive(Debug, Clone, Default)]
pub struct CommandPipelineFactory {
    command: CommandPipelineConfig,
}

impl CommandPipelineFactory {
    pub fn new(command: CommandPipelineConfig) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &CommandPipelineConfig {
        &self.command
    }
}

impl PipelineFactory for CommandPipelineFactory {
    fn build(
        &self,
        config: &PipelineConfig,
        analysts: &[String],
    ) -> AnalysisResult<Arc<dyn AnalysisPipeline>> {
        Ok(Arc::new(CommandPipeline {
            command: self.command.clone(),
            config: config.clone(),
            analysts: analysts.to_vec(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct CommandPipeline {
    command: CommandPipelineConfig,
    config: PipelineConfig,
    analysts: Vec<String>,
}

#[derive(Serialize)]
struct PipelineInput<'a> {
    config: &'a PipelineConfig,
    analysts: &'a [String],
    state: &'a PipelineState,
}

#[async_trait]
impl AnalysisPipeline for CommandPipeline {
    async fn stream(&self, state: PipelineState) -> AnalysisResult<PipelineDeltaStream> {
        let input = serde_json::to_vec(&PipelineInput {
            config: &self.config,
            analysts: &self.analysts,
            state: &state,
        })
        .map_err(|error| {
            AnalysisError::Pipeline(format!("failed to encode pipeline input: {error}"))
        })?;

        let mut command = Command::new(&self.command.program);
        command.args(&self.command.args);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|error| {
            AnalysisError::Pipeline(format!(
                "failed to launch pipeline command '{}': {error}",
                self.command.program.display()
            ))
        })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            AnalysisError::Pipeline("pipeline command stdin unavailable".to_owned())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AnalysisError::Pipeline("pipeline command stdout unavailable".to_owned())
        })?;
        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut captured = Vec::new();
                let mut chunk = [0_u8; 1024];
                while let Ok(read) = stderr.read(&mut chunk).await {
                    if read == 0 {
                        break;
                    }
                    captured.extend_from_slice(&chunk[..read]);
                    if captured.len() > MAX_STDERR_BYTES {
                        let excess = captured.len() - MAX_STDERR_BYTES;
                        captured.drain(..excess);
                    }
                }
                String::from_utf8_lossy(&captured).trim().to_owned()
            })
        });

        stdin.write_all(&input).await.map_err(|error| {
            AnalysisError::Pipeline(format!("failed to write pipeline input: {error}"))
        })?;
        stdin.write_all(b"\n").await.map_err(|error| {
            AnalysisError::Pipeline(format!("failed to write pipeline input: {error}"))
        })?;
        stdin.flush().await.map_err(|error| {
            AnalysisError::Pipeline(format!("failed to flush pipeline input: {error}"))
        })?;
        drop(stdin);

        tracing::debug!(
            program = %self.command.program.display(),
            ticker = %state.company_of_interest,
            "pipeline command started"
        );
        Ok(Box::new(CommandDeltaSubscription {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
            finished: false,
        }))
    }
}

struct CommandDeltaSubscription {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl CommandDeltaSubscription {
    async fn finish(&mut self) -> AnalysisResult<Option<PipelineDelta>> {
        self.finished = true;
        let status = self.child.wait().await.map_err(|error| {
            AnalysisError::Pipeline(format!("failed to wait for pipeline command: {error}"))
        })?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if status.success() {
            return Ok(None);
        }
        if stderr.is_empty() {
            Err(AnalysisError::Pipeline(format!(
                "pipeline command exited with {status}"
            )))
        } else {
            Err(AnalysisError::Pipeline(format!(
                "pipeline command exited with {status}: {stderr}"
            )))
        }
    }
}

#[async_trait]
impl PipelineDeltaSubscription for CommandDeltaSubscription {
    async fn next_delta(&mut self) -> AnalysisResult<Option<PipelineDelta>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return self.finish().await,
                Err(error) => {
                    self.finished = true;
                    return Err(AnalysisError::Pipeline(format!(
                        "failed to read pipeline output: {error}"
                    )));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(entries)) => return Ok(Some(PipelineDelta::from(entries))),
                _ => tracing::debug!(line = %line, "skipping non-object pipeline output"),
            }
        }
    }
}
