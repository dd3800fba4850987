//! The persisted OAuth token and its merge rule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before the reported expiry at which a token is treated as expired.
pub const EXPIRY_DELTA_SECS: i64 = 10;

/// An OAuth 2.0 token as returned by the provider and stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer credential sent with API requests.
    pub access_token: String,

    /// Usually "Bearer".
    #[serde(default)]
    pub token_type: String,

    /// Long-lived credential for silent renewal. Providers often omit it on
    /// refresh responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry. `None` means it was never reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a bearer token without refresh token or expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expiry: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets an absolute expiry.
    #[must_use]
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Sets the expiry relative to now, as reported by `expires_in`.
    #[must_use]
    pub fn expiring_in(self, secs: i64) -> Self {
        self.with_expiry(Utc::now() + Duration::seconds(secs))
    }

    /// Returns the refresh token when present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// True if the token can be renewed without user interaction.
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token().is_some()
    }

    /// True if the access token is expired or within [`EXPIRY_DELTA_SECS`]
    /// of it. A token with unknown expiry is assumed valid.
    pub fn is_expired(&self) -> bool {
        self.expiry
            .is_some_and(|expiry| Utc::now() + Duration::seconds(EXPIRY_DELTA_SECS) >= expiry)
    }

    /// True if the token has a non-empty access token that is not expired.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }
}

/// Combines a stored token with a newer one.
///
/// The incoming token wins, but when it lacks a refresh token the existing
/// one is carried over; otherwise the first silent renewal would drop the
/// refresh capability for good.
pub fn merge(existing: Option<&Token>, incoming: Option<Token>) -> Option<Token> {
    match (existing, incoming) {
        (None, incoming) => incoming,
        (Some(existing), None) => Some(existing.clone()),
        (Some(existing), Some(mut incoming)) => {
            if incoming.refresh_token().is_none() {
                incoming.refresh_token = existing.refresh_token.clone();
            }
            Some(incoming)
        }
    }
}
