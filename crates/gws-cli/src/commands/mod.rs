//! Command implementations.

pub mod auth;

use serde::Serialize;

use crate::error::ClientResult;

/// Prints a command result as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> ClientResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
