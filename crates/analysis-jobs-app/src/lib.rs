pub mod bootstrap;
pub mod cli;

pub use bootstrap::{build_registry, init_file_logging, log_file_path, open_history};
pub use cli::{parse_cli_args, print_cli_help, CliCommand, DEFAULT_HISTORY_LIMIT};
