//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gws_core::TracingOutputFormat;

/// gws - Google Workspace from the command line
#[derive(Debug, Parser)]
#[command(name = "gws")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "GWS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl From<LogFormat> for TracingOutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Compact => TracingOutputFormat::Compact,
            LogFormat::Pretty => TracingOutputFormat::Pretty,
            LogFormat::Json => TracingOutputFormat::Json,
        }
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authentication commands
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

/// Authentication actions.
#[derive(Debug, Subcommand)]
pub enum AuthAction {
    /// Authorize gws with your Google account
    Login(LoginArgs),

    /// Revoke the stored credentials and delete them
    Logout,

    /// Show the authenticated account and token expiry
    Status,

    /// List the services that can be requested at login
    Services,
}

/// Arguments for `gws auth login`.
#[derive(Debug, Clone, Default, Args)]
pub struct LoginArgs {
    /// Only request access to these services (comma separated)
    #[arg(long, short, value_delimiter = ',')]
    pub services: Vec<String>,

    /// OAuth client ID (from Google Cloud Console)
    #[arg(long, env = "GWS_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret (from Google Cloud Console)
    #[arg(long, env = "GWS_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// Path to a Google Cloud Console client JSON file
    #[arg(long, env = "GWS_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Print the authorization URL without opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

impl LoginArgs {
    /// Requested services, trimmed, lowercased and de-duplicated.
    pub fn normalized_services(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for service in &self.services {
            let service = service.trim().to_ascii_lowercase();
            if !service.is_empty() && !out.contains(&service) {
                out.push(service);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn login_services_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "gws",
            "auth",
            "login",
            "--services",
            "Gmail, drive,gmail,,",
            "--no-browser",
        ])
        .unwrap();

        let Command::Auth {
            action: AuthAction::Login(args),
        } = cli.command
        else {
            panic!("expected auth login");
        };
        assert!(args.no_browser);
        assert_eq!(args.normalized_services(), vec!["gmail", "drive"]);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gws", "auth", "status", "--debug", "--log-format", "json"])
            .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(
            cli.command,
            Command::Auth {
                action: AuthAction::Status
            }
        ));
    }
}
