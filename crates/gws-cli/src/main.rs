//! gws CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::warn;

use gws_cli::cli::{AuthAction, Cli, Command};
use gws_cli::commands::auth;
use gws_cli::config::ClientConfig;
use gws_cli::error::ClientResult;
use gws_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::cli()
    };
    if let Err(e) = init_tracing(tracing_config.with_format(cli.log_format.into())) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            if let Some(hint) = e.remediation() {
                eprintln!("hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path: PathBuf = cli.config.unwrap_or_else(ClientConfig::default_path);
    let config = match ClientConfig::load_from(&config_path) {
        Ok(config) => config,
        // status reports problems as data instead of failing
        Err(e) if matches!(cli.command, Command::Auth { action: AuthAction::Status }) => {
            warn!("{}", e);
            ClientConfig::default()
        }
        Err(e) => return Err(e),
    };

    match cli.command {
        Command::Auth { action } => match action {
            AuthAction::Login(args) => auth::login(args, &config, &config_path).await,
            AuthAction::Logout => auth::logout(&config).await,
            AuthAction::Status => auth::status(&config).await,
            AuthAction::Services => auth::services(),
        },
    }
}
