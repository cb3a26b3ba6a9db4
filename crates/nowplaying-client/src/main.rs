//! nowplaying CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use nowplaying_client::cli::{Cli, Command, ConfigAction};
use nowplaying_client::commands;
use nowplaying_client::config::ClientConfig;
use nowplaying_client::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = nowplaying_core::init_tracing(cli.tracing_config()) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli.config.as_deref();

    // `config path` must work even when the file does not parse.
    if let Some(Command::Config {
        action: ConfigAction::Path,
    }) = cli.command
    {
        return commands::config::path(config_path);
    }

    let config = ClientConfig::load(config_path)?;

    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => commands::run::run(&config, cli.no_browser).await,
        Command::Auth { force } => commands::auth::auth(&config, force, cli.no_browser).await,
        Command::Logout => commands::tokens::logout(&config),
        Command::Clear => commands::clear::clear(&config).await,
        Command::Status => commands::tokens::status(&config),
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(config_path),
        },
    }
}
