use analysis_jobs_protocol::{AnalysisError, AnalysisRequest, AnalysisResult};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Run(AnalysisRequest),
    History { owner: String, limit: usize },
    Stats,
    Help,
}

/// Parses everything after the program name.
pub fn parse_cli_args(args: impl IntoIterator<Item = String>) -> AnalysisResult<CliCommand> {
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(CliCommand::Help);
    };

    match command.as_str() {
        "run" => parse_run_flags(args).map(CliCommand::Run),
        "history" => parse_history_flags(args),
        "stats" => match args.next() {
            None => Ok(CliCommand::Stats),
            Some(unexpected) => Err(unexpected_argument(&unexpected)),
        },
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        unknown => Err(AnalysisError::Configuration(format!(
            "Unknown command '{unknown}'. Run with --help for valid commands."
        ))),
    }
}

fn parse_run_flags(mut args: impl Iterator<Item = String>) -> AnalysisResult<AnalysisRequest> {
    let mut request = AnalysisRequest::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ticker" => request.ticker = Some(read_cli_value(&arg, args.next())?),
            "--date" => request.analysis_date = Some(read_cli_value(&arg, args.next())?),
            "--market" => request.market = Some(read_cli_value(&arg, args.next())?),
            "--owner" => request.owner = Some(read_cli_value(&arg, args.next())?),
            "--analysts" => {
                request.analysts = read_cli_value(&arg, args.next())?
                    .split(',')
                    .map(|analyst| analyst.trim().to_owned())
                    .filter(|analyst| !analyst.is_empty())
                    .collect();
            }
            "--research-depth" => {
                let raw = read_cli_value(&arg, args.next())?;
                request.research_depth = Some(raw.parse::<u32>().map_err(|_| {
                    AnalysisError::Configuration(format!(
                        "Flag '--research-depth' expects a positive integer, got '{raw}'."
                    ))
                })?);
            }
            "--provider" => request.llm_provider = Some(read_cli_value(&arg, args.next())?),
            "--quick-model" => request.shallow_thinker = Some(read_cli_value(&arg, args.next())?),
            "--deep-model" => request.deep_thinker = Some(read_cli_value(&arg, args.next())?),
            "--backend-url" => request.backend_url = Some(read_cli_value(&arg, args.next())?),
            value if value.starts_with("--") => return Err(unknown_flag(value)),
            unknown => return Err(unexpected_argument(unknown)),
        }
    }

    Ok(request)
}

fn parse_history_flags(mut args: impl Iterator<Item = String>) -> AnalysisResult<CliCommand> {
    let mut owner = None;
    let mut limit = DEFAULT_HISTORY_LIMIT;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--owner" => owner = Some(read_cli_value(&arg, args.next())?),
            "--limit" => {
                let raw = read_cli_value(&arg, args.next())?;
                limit = raw.parse::<usize>().map_err(|_| {
                    AnalysisError::Configuration(format!(
                        "Flag '--limit' expects a positive integer, got '{raw}'."
                    ))
                })?;
            }
            value if value.starts_with("--") => return Err(unknown_flag(value)),
            unknown => return Err(unexpected_argument(unknown)),
        }
    }

    let owner = owner.ok_or_else(|| {
        AnalysisError::Configuration("Missing --owner. Use history --owner <username>.".to_owned())
    })?;
    Ok(CliCommand::History { owner, limit })
}

fn read_cli_value(flag: &str, value: Option<String>) -> AnalysisResult<String> {
    let value = value.ok_or_else(|| {
        AnalysisError::Configuration(format!("Missing value after {flag}."))
    })?;
    let value = value.trim();
    if value.is_empty() {
        return Err(AnalysisError::Configuration(format!(
            "Flag '{flag}' requires a non-empty value."
        )));
    }
    Ok(value.to_owned())
}

fn unknown_flag(flag: &str) -> AnalysisError {
    AnalysisError::Configuration(format!(
        "Unknown flag '{flag}'. Run with --help for valid flags."
    ))
}

fn unexpected_argument(argument: &str) -> AnalysisError {
    AnalysisError::Configuration(format!(
        "Unexpected argument '{argument}'. Run with --help for valid flags."
    ))
}

pub fn print_cli_help() {
    println!("Usage: analysis-jobs <command> [flags]");
    println!();
    println!("Commands:");
    println!("  run --ticker <T> --date <YYYY-MM-DD> --market <M>   Run one analysis and follow its log");
    println!("      [--owner <user>] [--analysts a,b] [--research-depth <1-5>]");
    println!("      [--provider <p>] [--quick-model <m>] [--deep-model <m>] [--backend-url <url>]");
    println!("  history --owner <user> [--limit <n>]                 Show recorded jobs for a user");
    println!("  stats                                               Show job counts per user");
    println!("  --help                                              Show this help message");
}
