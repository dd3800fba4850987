//! Per-service API client provisioning.
//!
//! A [`ClientFactory`] hands out one [`ServiceClient`] per Workspace service.
//! Clients are built on first use and cached; concurrent first requests for
//! the same service wait on a single construction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gws_core::ScopeRegistry;
use reqwest::{Method, RequestBuilder};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::oauth::OAuthClient;
use crate::store::CredentialStore;
use crate::token_source::{PersistingTokenSource, RefreshingTokenSource, TokenSource};

/// REST base URL for a known service.
pub fn default_base_url(service: &str) -> Option<&'static str> {
    let url = match service {
        "gmail" => "https://gmail.googleapis.com/gmail/v1",
        "calendar" => "https://www.googleapis.com/calendar/v3",
        "drive" => "https://www.googleapis.com/drive/v3",
        "docs" => "https://docs.googleapis.com/v1",
        "sheets" => "https://sheets.googleapis.com/v4",
        "slides" => "https://slides.googleapis.com/v1",
        "tasks" => "https://tasks.googleapis.com/tasks/v1",
        "people" => "https://people.googleapis.com/v1",
        "forms" => "https://forms.googleapis.com/v1",
        "chat" => "https://chat.googleapis.com/v1",
        _ => return None,
    };
    Some(url)
}

/// Authorized HTTP client bound to one service.
pub struct ServiceClient {
    service: String,
    base_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a currently valid access token, refreshing it if needed.
    pub async fn access_token(&self) -> AuthResult<String> {
        Ok(self.tokens.token().await?.access_token)
    }

    /// Starts a request to `path` (relative to the service base URL) with
    /// the bearer token attached.
    pub async fn authorized(&self, method: Method, path: &str) -> AuthResult<RequestBuilder> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(self.http.request(method, url).bearer_auth(token))
    }
}

type ClientCell = Arc<OnceCell<Arc<ServiceClient>>>;

/// Builds and caches [`ServiceClient`]s.
pub struct ClientFactory {
    registry: ScopeRegistry,
    granted: Vec<String>,
    tokens: Arc<dyn TokenSource>,
    http: reqwest::Client,
    base_urls: HashMap<String, String>,
    clients: Mutex<HashMap<String, ClientCell>>,
    warned: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("granted", &self.granted)
            .field("base_urls", &self.base_urls)
            .finish_non_exhaustive()
    }
}

impl ClientFactory {
    /// Creates a factory.
    ///
    /// `granted` is the service list recorded at login. An empty list means
    /// the login covered every service.
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        registry: ScopeRegistry,
        granted: Vec<String>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gws/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::internal("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            registry,
            granted,
            tokens,
            http,
            base_urls: HashMap::new(),
            clients: Mutex::new(HashMap::new()),
            warned: Mutex::new(HashSet::new()),
        })
    }

    /// Creates a factory from the persisted credentials.
    ///
    /// Refreshed tokens are written back to `store`. An unreadable granted
    /// services record is treated as a full login.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` if nothing is stored, `ParseError` if the stored
    /// token is corrupt.
    pub fn from_store(
        oauth: Arc<OAuthClient>,
        store: &CredentialStore,
        registry: ScopeRegistry,
    ) -> AuthResult<Self> {
        let token = store.load()?;
        let granted = store.load_granted_services().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring granted services record");
            Vec::new()
        });
        let timeout = oauth.config().timeout;

        let loaded_access_token = token.access_token.clone();
        let refreshing: Arc<dyn TokenSource> = Arc::new(RefreshingTokenSource::new(oauth, token));
        let tokens = Arc::new(PersistingTokenSource::new(
            refreshing,
            store.clone(),
            loaded_access_token,
        ));

        Self::new(tokens, registry, granted, timeout)
    }

    /// Points `service` at a different base URL.
    #[must_use]
    pub fn with_base_url(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.base_urls.insert(service.into(), url.into());
        self
    }

    pub fn granted_services(&self) -> &[String] {
        &self.granted
    }

    /// Returns the client for `service`, building it on first use.
    ///
    /// # Errors
    ///
    /// `Configuration` for a service the registry does not know, or any
    /// error from obtaining the initial access token.
    pub async fn client(&self, service: &str) -> AuthResult<Arc<ServiceClient>> {
        if !self.registry.contains(service) {
            return Err(AuthError::configuration(format!(
                "unknown service '{service}'"
            )));
        }
        self.check_granted(service);

        let cell = {
            let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(clients.entry(service.to_string()).or_default())
        };

        let client = cell
            .get_or_try_init(|| self.build_client(service))
            .await?;
        Ok(Arc::clone(client))
    }

    /// Services that triggered a missing-grant warning so far.
    pub fn warned_services(&self) -> Vec<String> {
        let warned = self.warned.lock().unwrap_or_else(PoisonError::into_inner);
        let mut services: Vec<String> = warned.iter().cloned().collect();
        services.sort();
        services
    }

    /// Forces a token refresh and returns the new access token.
    pub async fn refresh_now(&self) -> AuthResult<String> {
        Ok(self.tokens.refresh().await?.access_token)
    }

    fn check_granted(&self, service: &str) {
        if self.granted.is_empty() || self.granted.iter().any(|s| s == service) {
            return;
        }

        let first = self
            .warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.to_string());
        if first {
            warn!(
                service,
                granted = %self.granted.join(","),
                "service was not granted at login; requests may fail. Run `gws auth login --services {service}` to add it"
            );
        }
    }

    async fn build_client(&self, service: &str) -> AuthResult<Arc<ServiceClient>> {
        // Fail early if the credentials cannot produce a token.
        self.tokens.token().await?;

        let base_url = self
            .base_urls
            .get(service)
            .cloned()
            .or_else(|| default_base_url(service).map(str::to_string))
            .unwrap_or_else(|| format!("https://{service}.googleapis.com"));

        debug!(service, %base_url, "created service client");
        Ok(Arc::new(ServiceClient {
            service: service.to_string(),
            base_url,
            http: self.http.clone(),
            tokens: Arc::clone(&self.tokens),
        }))
    }
}
