//! Error types for login, credential storage and token use.

use std::fmt;
use thiserror::Error;

/// The category of an authentication error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    /// No persisted token exists. Expected on first use.
    NotAuthenticated,
    /// The token file exists but cannot be parsed.
    ParseError,
    /// Another process held the credential lock for too long.
    LockTimeout,
    /// The user did not finish the browser step in time.
    FlowTimeout,
    /// The provider reported that the user denied access.
    FlowDenied,
    /// The redirect carried a `state` different from the one we sent.
    StateMismatch,
    /// The refresh token was rejected.
    RefreshFailed,
    /// Server-side revocation failed.
    RevocationFailed,
    /// Transport failure: connect, timeout, DNS.
    Network,
    /// The provider answered with something we could not understand.
    InvalidResponse,
    /// Missing or invalid client configuration.
    Configuration,
    /// Local filesystem failure.
    Io,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// Unexpected internal state.
    Internal,
}

impl AuthErrorCode {
    /// Returns true if retrying the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::Network)
    }

    /// Returns a short suggestion for the user.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::NotAuthenticated
            | Self::ParseError
            | Self::FlowTimeout
            | Self::FlowDenied
            | Self::StateMismatch
            | Self::RefreshFailed => "run `gws auth login` again",
            Self::LockTimeout | Self::Network => "retry the command",
            Self::RevocationFailed => {
                "revoke access manually at https://myaccount.google.com/permissions"
            }
            Self::InvalidResponse | Self::Internal => "retry with --debug and report the output",
            Self::Configuration => {
                "pass --client-id/--client-secret or set them in the config file"
            }
            Self::Io => "check permissions of the gws config directory",
            Self::Cancelled => "run the command again when ready",
        }
    }

    /// Returns a stable machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::ParseError => "parse_error",
            Self::LockTimeout => "lock_timeout",
            Self::FlowTimeout => "flow_timeout",
            Self::FlowDenied => "flow_denied",
            Self::StateMismatch => "state_mismatch",
            Self::RefreshFailed => "refresh_failed",
            Self::RevocationFailed => "revocation_failed",
            Self::Network => "network_error",
            Self::InvalidResponse => "invalid_response",
            Self::Configuration => "configuration_error",
            Self::Io => "io_error",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised by the authentication subsystem.
#[derive(Debug, Error)]
pub struct AuthError {
    code: AuthErrorCode,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuthError {
    /// Creates a new error with the given code and message.
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::NotAuthenticated, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::ParseError, message)
    }

    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::LockTimeout, message)
    }

    pub fn flow_timeout(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::FlowTimeout, message)
    }

    pub fn flow_denied(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::FlowDenied, message)
    }

    pub fn state_mismatch(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::StateMismatch, message)
    }

    pub fn refresh_failed(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::RefreshFailed, message)
    }

    pub fn revocation_failed(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::RevocationFailed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Network, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::InvalidResponse, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Configuration, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Io, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::Internal, message)
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> AuthErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the suggested remediation for this error.
    pub fn remediation(&self) -> &'static str {
        self.code.remediation()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true for the expected "no token on disk" condition.
    pub fn is_not_authenticated(&self) -> bool {
        self.code == AuthErrorCode::NotAuthenticated
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Maps a reqwest transport error to a network error.
pub(crate) fn from_reqwest(context: &str, err: reqwest::Error) -> AuthError {
    let message = if err.is_timeout() {
        format!("{context}: request timed out")
    } else if err.is_connect() {
        format!("{context}: connection failed")
    } else {
        format!("{context}: request failed")
    };
    AuthError::network(message).with_source(err)
}
