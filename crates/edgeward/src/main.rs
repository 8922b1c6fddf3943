mod cli;
mod commands;
mod error;
mod logging;

use clap::Parser;

use crate::cli::{Cli, Command};
use crate::error::AgentError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so buffered log lines reach the file.
    let log_guard = logging::init(
        cli.global.verbose,
        cli.global.log_format,
        cli.global.log_file.as_deref(),
    );

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        tracing::error!(error = %err, code, "edgeward exiting");
        eprintln!("{:?}", miette::Report::new(err));
        drop(log_guard);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let config = edgeward_config::load_config(cli.global.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::run(&config).await,
        Command::CheckConfig => commands::check_config(&config),
        Command::Plan(args) => commands::plan(&config, &args).await,
    }
}
