//! CLI error types.

use std::fmt;

use gws_auth::{AuthError, AuthErrorCode};
use gws_core::ScopeError;

/// Result type for CLI operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to the user by the `gws` binary.
#[derive(Debug)]
pub enum ClientError {
    /// Login, storage or provider failure.
    Auth(AuthError),
    /// Invalid or incomplete configuration.
    Config(String),
    /// IO error.
    Io(std::io::Error),
}

impl ClientError {
    /// Suggested next step for the user, if there is one.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Auth(err) => Some(err.remediation()),
            Self::Config(_) => Some(AuthErrorCode::Configuration.remediation()),
            Self::Io(_) => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "{}", err),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Config(_) => None,
        }
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<ScopeError> for ClientError {
    fn from(err: ScopeError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_carry_their_remediation() {
        let err: ClientError = AuthError::not_authenticated("no stored credentials").into();
        assert_eq!(
            err.remediation(),
            Some(AuthErrorCode::NotAuthenticated.remediation())
        );
        assert!(err.to_string().contains("no stored credentials"));
    }

    #[test]
    fn unknown_service_is_a_config_error() {
        let err: ClientError = gws_core::ScopeRegistry::google_workspace()
            .scopes_for_services(&["mail"])
            .unwrap_err()
            .into();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(err.to_string().contains("mail"));
    }
}
