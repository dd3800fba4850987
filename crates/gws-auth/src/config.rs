//! OAuth client credentials, provider endpoints and timeouts.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AuthError, AuthResult};

/// OAuth 2.0 client credentials for a desktop ("installed") application.
#[derive(Clone)]
pub struct OAuthCredentials {
    /// The OAuth 2.0 client ID from Google Cloud Console.
    pub client_id: String,
    /// The OAuth 2.0 client secret from Google Cloud Console.
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Structure of a Google client JSON file.
///
/// Accepts the Cloud Console layout (`installed` or `web` section) and the
/// flat layout with `client_id`/`client_secret` at the root.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<NestedCredentials>,
    web: Option<NestedCredentials>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    /// Creates new OAuth credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads credentials from a client JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::configuration(format!(
                "failed to read credentials file {}",
                path.display()
            ))
            .with_source(e)
        })?;
        Self::from_json(&content)
    }

    /// Parses credentials from a client JSON string.
    pub fn from_json(json: &str) -> AuthResult<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json).map_err(|e| {
            AuthError::configuration("failed to parse credentials JSON").with_source(e)
        })?;

        if let Some(creds) = file.installed.or(file.web) {
            return Ok(Self::new(creds.client_id, creds.client_secret));
        }

        if let (Some(client_id), Some(client_secret)) = (file.client_id, file.client_secret) {
            return Ok(Self::new(client_id, client_secret));
        }

        Err(AuthError::configuration(
            "credentials file must contain an 'installed'/'web' section or 'client_id'/'client_secret' at root level",
        ))
    }

    /// Checks that both values are present and the id looks like a Google
    /// client id.
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.is_empty() {
            return Err(AuthError::configuration("client_id is required"));
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err(AuthError::configuration(
                "client_id should end with .apps.googleusercontent.com",
            ));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::configuration("client_secret is required"));
        }
        Ok(())
    }
}

/// Provider endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    /// Browser authorization endpoint.
    pub auth_url: String,
    /// Code exchange and refresh endpoint.
    pub token_url: String,
    /// Revocation endpoint.
    pub revoke_url: String,
    /// Token introspection endpoint used by `status`.
    pub tokeninfo_url: String,
}

impl OAuthEndpoints {
    pub const GOOGLE_AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    pub const GOOGLE_TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";
    pub const GOOGLE_REVOKE_URL: &'static str = "https://oauth2.googleapis.com/revoke";
    pub const GOOGLE_TOKENINFO_URL: &'static str = "https://oauth2.googleapis.com/tokeninfo";

    /// Endpoints rooted at `base`, e.g. a local test server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{base}/auth"),
            token_url: format!("{base}/token"),
            revoke_url: format!("{base}/revoke"),
            tokeninfo_url: format!("{base}/tokeninfo"),
        }
    }
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: Self::GOOGLE_AUTH_URL.to_string(),
            token_url: Self::GOOGLE_TOKEN_URL.to_string(),
            revoke_url: Self::GOOGLE_REVOKE_URL.to_string(),
            tokeninfo_url: Self::GOOGLE_TOKENINFO_URL.to_string(),
        }
    }
}

/// Everything [`OAuthClient`](crate::OAuthClient) needs.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub credentials: OAuthCredentials,
    pub endpoints: OAuthEndpoints,
    /// Timeout for each outbound HTTP request.
    pub timeout: Duration,
    /// How long to wait for the browser redirect.
    pub callback_timeout: Duration,
}

impl AuthConfig {
    /// Default HTTP timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default wait for the browser redirect.
    pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            endpoints: OAuthEndpoints::default(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            callback_timeout: Self::DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }
}
