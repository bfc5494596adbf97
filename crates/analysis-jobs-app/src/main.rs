use std::path::PathBuf;
use std::time::Duration;

use analysis_jobs_app::{
    build_registry, init_file_logging, open_history, parse_cli_args, print_cli_help, CliCommand,
};
use analysis_jobs_config::AnalysisJobsConfig;
use analysis_jobs_protocol::{AnalysisRequest, Job, JobId, JobStatus};
use analysis_jobs_registry::JobRegistry;
use anyhow::{bail, Result};

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let config = analysis_jobs_config::load_from_env()?;
    init_file_logging(&PathBuf::from(&config.history_db_path))?;

    match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Run(request) => run_analysis(&config, request).await,
        CliCommand::History { owner, limit } => print_history(&config, &owner, limit),
        CliCommand::Stats => print_stats(&config),
        CliCommand::Help => {
            print_cli_help();
            Ok(())
        }
    }
}

async fn run_analysis(config: &AnalysisJobsConfig, request: AnalysisRequest) -> Result<()> {
    let registry = build_registry(config)?;
    let job = registry.submit(request)?;
    tracing::info!(job_id = %job.id, "analysis job submitted");
    println!("Job {} queued; log at {}", job.id, job.log_path.display());

    let job = follow_job(&registry, &job.id).await?;
    match job.status {
        JobStatus::Completed => {
            println!("Decision: {}", job.decision().unwrap_or_default());
            if let Some(result_dir) = job.result_dir() {
                println!("Reports: {}", result_dir.display());
            }
            Ok(())
        }
        JobStatus::Failed => bail!(
            "analysis job {} failed: {}",
            job.id,
            job.error.unwrap_or_default()
        ),
        status => bail!("analysis job {} ended as {}", job.id, status.as_str()),
    }
}

/// Echoes new log lines until the job reaches a terminal status, then waits
/// for its worker to settle so the final history write lands before exit.
async fn follow_job(registry: &JobRegistry, job_id: &JobId) -> Result<Job> {
    let mut printed = 0;
    loop {
        let Some(job) = registry.get(job_id) else {
            bail!("analysis job {job_id} disappeared from the registry");
        };
        printed = echo_log_lines(registry, job_id, printed)?;

        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
    }

    let job = registry.wait_settled(job_id).await?;
    echo_log_lines(registry, job_id, printed)?;
    Ok(job)
}

fn echo_log_lines(registry: &JobRegistry, job_id: &JobId, printed: usize) -> Result<usize> {
    let lines = registry.log_tail(job_id, usize::MAX)?;
    for line in lines.iter().skip(printed) {
        println!("{line}");
    }
    Ok(printed.max(lines.len()))
}

fn print_history(config: &AnalysisJobsConfig, owner: &str, limit: usize) -> Result<()> {
    let history = open_history(config);
    if !history.is_enabled() {
        bail!("job history is disabled in the configuration");
    }
    for record in history.list_for_username(owner, limit)? {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            record.created_at,
            record.job_id,
            record.ticker,
            record.analysis_date,
            record.status,
            record.decision.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn print_stats(config: &AnalysisJobsConfig) -> Result<()> {
    let history = open_history(config);
    if !history.is_enabled() {
        bail!("job history is disabled in the configuration");
    }
    for count in history.count_by_username()? {
        println!("{}\t{}", count.username, count.count);
    }
    Ok(())
}
