//! `gws` command-line interface: login, logout and status for Google
//! Workspace credentials.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
