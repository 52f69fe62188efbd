mod cli;
mod commands;
mod prompt;

use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Before tracing, so RUST_LOG and LOG_FORMAT from .env apply
    mediaq::config::load_dotenv();
    mediaq::observability::init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return cli::parse_exit_code(&e);
        }
    };

    let result = match cli.command {
        Commands::Send(args) => commands::send(cli.config, args).await,
        Commands::Worker => commands::worker(cli.config).await,
        Commands::CheckDeps => commands::check_deps(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
