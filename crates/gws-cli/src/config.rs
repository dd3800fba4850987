//! CLI configuration.
//!
//! Settings live in `~/.config/gws/config.toml` unless `--config` or
//! `GWS_CONFIG` names another file. A missing file means defaults.
//!
//! ```toml
//! [oauth]
//! client_id = "pass::google/gws-client-id"
//! client_secret = "env::GWS_SECRET"
//!
//! [storage]
//! token_path = "/home/me/.config/gws/token.json"
//!
//! [http]
//! timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use gws_auth::{AuthConfig, CredentialStore, OAuthCredentials};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub oauth: OAuthSettings,
    pub storage: StorageSettings,
    pub http: HttpSettings,
}

/// OAuth client credentials.
///
/// `client_id` and `client_secret` accept `pass::` and `env::` references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Google Cloud Console client JSON, used when the inline values are unset.
    pub credentials_file: Option<PathBuf>,
}

/// Where credentials are stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub token_path: Option<PathBuf>,
    pub granted_services_path: Option<PathBuf>,
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: AuthConfig::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClientConfig {
    /// Loads `path`, or the defaults when it does not exist.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gws")
    }

    /// Builds the credential store from the `[storage]` section.
    pub fn store(&self) -> CredentialStore {
        let dir = Self::default_config_dir();
        let token_path = self
            .storage
            .token_path
            .clone()
            .unwrap_or_else(|| dir.join(CredentialStore::TOKEN_FILE));
        let granted_path = self
            .storage
            .granted_services_path
            .clone()
            .unwrap_or_else(|| dir.join(CredentialStore::GRANTED_SERVICES_FILE));
        CredentialStore::new(token_path, granted_path)
    }
}

impl OAuthSettings {
    /// Returns true if the section names any credential source.
    pub fn is_configured(&self) -> bool {
        (self.client_id.is_some() && self.client_secret.is_some())
            || self.credentials_file.is_some()
    }

    /// Resolves the credentials, expanding secret references.
    ///
    /// Inline values win over `credentials_file`.
    pub fn resolve_credentials(&self) -> Result<OAuthCredentials, String> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => {
                let id = crate::secret::resolve(id)
                    .map_err(|e| format!("failed to resolve client_id: {}", e))?;
                let secret = crate::secret::resolve(secret)
                    .map_err(|e| format!("failed to resolve client_secret: {}", e))?;
                Ok(OAuthCredentials::new(id, secret))
            }
            (Some(_), None) => Err("client_secret is missing from [oauth]".to_string()),
            (None, Some(_)) => Err("client_id is missing from [oauth]".to_string()),
            (None, None) => match &self.credentials_file {
                Some(path) => OAuthCredentials::from_file(path).map_err(|e| e.to_string()),
                None => Err("no OAuth client credentials configured".to_string()),
            },
        }
    }
}

/// Writes the client credentials into the `[oauth]` table of `path`,
/// keeping the rest of the document (comments included) untouched.
///
/// Failures are logged: the login itself already succeeded.
pub fn save_credentials(path: &Path, credentials: &OAuthCredentials) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            warn!("could not read {}: {}", path.display(), e);
            return;
        }
    };

    let mut doc = match content.parse::<toml_edit::DocumentMut>() {
        Ok(doc) => doc,
        Err(e) => {
            warn!("could not parse {} for writing: {}", path.display(), e);
            return;
        }
    };

    if !doc.contains_key("oauth") {
        doc["oauth"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    if let Some(oauth) = doc["oauth"].as_table_mut() {
        oauth["client_id"] = toml_edit::value(credentials.client_id.as_str());
        oauth["client_secret"] = toml_edit::value(credentials.client_secret.as_str());
    }

    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!("could not create {}: {}", parent.display(), e);
        return;
    }

    match std::fs::write(path, doc.to_string()) {
        Ok(()) => info!("saved client credentials to {}", path.display()),
        Err(e) => warn!("could not save credentials to {}: {}", path.display(), e),
    }
}
