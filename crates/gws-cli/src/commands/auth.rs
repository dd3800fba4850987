//! `gws auth` commands.
//!
//! Every command prints one JSON document on stdout. Progress and warnings
//! go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gws_auth::{
    AuthConfig, AuthError, ClientFactory, CredentialStore, NoBrowser, OAuthClient,
    OAuthCredentials, SystemBrowser, Token, UrlOpener,
};
use gws_core::ScopeRegistry;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::print_json;
use crate::cli::LoginArgs;
use crate::config::{self, ClientConfig, OAuthSettings};
use crate::error::{ClientError, ClientResult};

/// Output of `gws auth login`.
#[derive(Debug, Serialize)]
pub struct LoginReport {
    pub status: &'static str,
    pub granted_services: Vec<String>,
    pub scopes: Vec<String>,
    pub token_path: PathBuf,
}

/// Output of `gws auth logout`.
#[derive(Debug, Serialize)]
pub struct LogoutReport {
    pub status: &'static str,
    pub revoked: bool,
    pub revocation_error: Option<String>,
    pub token_path: PathBuf,
}

/// Output of `gws auth status`.
#[derive(Debug, Default, Serialize)]
pub struct StatusReport {
    pub authenticated: bool,
    pub email: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub granted_services: Vec<String>,
    pub token_path: PathBuf,
    pub refreshable: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServiceEntry<'a> {
    service: &'a str,
    scopes: &'a [String],
}

/// Run the interactive login.
///
/// With `--services` only those services' scopes are requested and the list
/// is recorded so that later API calls outside it produce a warning. Without
/// it every known scope is requested.
pub async fn login(args: LoginArgs, config: &ClientConfig, config_path: &Path) -> ClientResult<()> {
    let registry = ScopeRegistry::google_workspace();
    let services = args.normalized_services();
    let scopes = registry.login_scopes(&services)?;

    let (credentials, source) = resolve_credentials(&args, &config.oauth)?;
    credentials.validate()?;

    let auth_config = AuthConfig::new(credentials.clone()).with_timeout(config.http.timeout());
    let client = OAuthClient::new(auth_config)?;
    let opener: &dyn UrlOpener = if args.no_browser {
        &NoBrowser
    } else {
        &SystemBrowser
    };

    debug!(scopes = %scopes.join(" "), "starting login");
    let token = tokio::select! {
        result = client.authorize(&scopes, opener) => result?,
        _ = tokio::signal::ctrl_c() => {
            return Err(AuthError::cancelled("login interrupted").into());
        }
    };

    let store = config.store();
    let saving = store.clone();
    on_blocking_pool(move || saving.save_merged(token)).await?;
    if let Err(e) = store.save_granted_services(&services) {
        warn!("could not record granted services: {}", e);
    }
    info!(path = %store.token_path().display(), "login complete");

    if source == CredentialSource::Cli {
        config::save_credentials(config_path, &credentials);
    }

    let granted_services = if services.is_empty() {
        registry.services().map(str::to_string).collect()
    } else {
        services
    };
    print_json(&LoginReport {
        status: "success",
        granted_services,
        scopes,
        token_path: store.token_path().to_path_buf(),
    })
}

/// Revoke and delete the stored credentials.
pub async fn logout(config: &ClientConfig) -> ClientResult<()> {
    let client = revocation_client(config)?;
    let report = logout_with(&config.store(), &client).await?;
    print_json(&report)
}

/// Report the authentication state. Never fails on authentication problems.
pub async fn status(config: &ClientConfig) -> ClientResult<()> {
    let auth_config = config
        .oauth
        .resolve_credentials()
        .map(|creds| AuthConfig::new(creds).with_timeout(config.http.timeout()));
    let report = collect_status(&config.store(), auth_config).await;
    print_json(&report)
}

/// List the services that `--services` accepts.
pub fn services() -> ClientResult<()> {
    let registry = ScopeRegistry::google_workspace();
    let entries: Vec<ServiceEntry<'_>> = registry
        .services()
        .filter_map(|service| {
            registry
                .scopes_for(service)
                .map(|scopes| ServiceEntry { service, scopes })
        })
        .collect();
    print_json(&entries)
}

/// Best-effort revocation followed by unconditional local deletion.
pub async fn logout_with(store: &CredentialStore, client: &OAuthClient) -> ClientResult<LogoutReport> {
    let token = match store.load() {
        Ok(token) => Some(token),
        Err(e) if e.is_not_authenticated() => None,
        Err(e) => {
            warn!("stored token is unusable, deleting without revoking: {}", e);
            None
        }
    };

    let (revoked, revocation_error) = match &token {
        Some(token) => match client.revoke(token).await {
            Ok(()) => (true, None),
            Err(e) => {
                warn!("{}", e);
                (false, Some(e.to_string()))
            }
        },
        None => (false, None),
    };

    let had_token = store.token_path().exists();
    let deleting = store.clone();
    on_blocking_pool(move || {
        deleting.delete()?;
        if let Err(e) = deleting.delete_granted_services() {
            warn!("could not delete granted services file: {}", e);
        }
        Ok(())
    })
    .await?;

    Ok(LogoutReport {
        status: if had_token { "logged_out" } else { "not_logged_in" },
        revoked,
        revocation_error,
        token_path: store.token_path().to_path_buf(),
    })
}

/// Runs store I/O, which may sleep while waiting for the credential lock,
/// on the blocking pool.
async fn on_blocking_pool<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::internal("credential store task failed").with_source(e))?
}

/// Builds the status report.
///
/// When client credentials are available the token is refreshed through the
/// same path API calls use, which both validates it and persists the new
/// access token. The account email comes from the tokeninfo endpoint.
pub async fn collect_status(
    store: &CredentialStore,
    auth_config: Result<AuthConfig, String>,
) -> StatusReport {
    let mut report = StatusReport {
        token_path: store.token_path().to_path_buf(),
        ..StatusReport::default()
    };

    let token = match store.load() {
        Ok(token) => token,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };
    report.refreshable = token.is_refreshable();
    report.expiry = token.expiry;
    report.granted_services = store.load_granted_services().unwrap_or_else(|e| {
        warn!("could not read granted services: {}", e);
        Vec::new()
    });

    let auth_config = match auth_config {
        Ok(auth_config) => auth_config,
        Err(e) => {
            report.authenticated = token.is_valid();
            report.error = Some(format!("cannot validate token: {}", e));
            return report;
        }
    };

    let client = match OAuthClient::new(auth_config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    let access_token = match validate(Arc::clone(&client), store, &token).await {
        Ok(access_token) => access_token,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };
    report.authenticated = true;
    if let Ok(current) = store.load() {
        report.expiry = current.expiry;
    }

    match client.token_info(&access_token).await {
        Ok(info) => report.email = info.email,
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

async fn validate(
    client: Arc<OAuthClient>,
    store: &CredentialStore,
    token: &Token,
) -> Result<String, AuthError> {
    if !token.is_refreshable() {
        return if token.is_valid() {
            Ok(token.access_token.clone())
        } else {
            Err(AuthError::refresh_failed(
                "access token expired and no refresh token is stored",
            ))
        };
    }
    let factory = ClientFactory::from_store(client, store, ScopeRegistry::google_workspace())?;
    factory.refresh_now().await
}

/// Client used only for revocation, which does not need the client
/// credentials to be present.
fn revocation_client(config: &ClientConfig) -> ClientResult<OAuthClient> {
    let credentials = config.oauth.resolve_credentials().unwrap_or_else(|e| {
        debug!("revoking without client credentials: {}", e);
        OAuthCredentials::new("", "")
    });
    Ok(OAuthClient::new(
        AuthConfig::new(credentials).with_timeout(config.http.timeout()),
    )?)
}

/// Where the credentials were resolved from.
#[derive(Debug, PartialEq)]
enum CredentialSource {
    /// Flags, environment or `--credentials-file`
    Cli,
    /// Already in config.toml
    Config,
}

/// Resolves the OAuth client credentials.
///
/// Priority (highest to lowest):
/// 1. `--client-id` + `--client-secret`
/// 2. `--credentials-file`
/// 3. `[oauth]` in config.toml
fn resolve_credentials(
    args: &LoginArgs,
    settings: &OAuthSettings,
) -> ClientResult<(OAuthCredentials, CredentialSource)> {
    match (&args.client_id, &args.client_secret) {
        (Some(id), Some(secret)) => {
            return Ok((OAuthCredentials::new(id, secret), CredentialSource::Cli));
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ClientError::Config(
                "both --client-id and --client-secret are required when providing credentials directly"
                    .to_string(),
            ));
        }
        (None, None) => {}
    }

    if let Some(ref path) = args.credentials_file {
        let creds = OAuthCredentials::from_file(path)?;
        return Ok((creds, CredentialSource::Cli));
    }

    if settings.is_configured() {
        let creds = settings.resolve_credentials().map_err(|e| {
            ClientError::Config(format!("failed to resolve credentials from config: {}", e))
        })?;
        return Ok((creds, CredentialSource::Config));
    }

    Err(ClientError::Config(format!(
        "OAuth client credentials are required. Provide them via:\n  \
         - client_id + client_secret under [oauth] in {}\n  \
         - --client-id and --client-secret flags\n  \
         - --credentials-file flag (Google Cloud Console JSON)\n  \
         - GWS_CLIENT_ID and GWS_CLIENT_SECRET env vars",
        ClientConfig::default_path().display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gws_auth::{CredentialLock, LockOptions, OAuthEndpoints};
    use wiremock::matchers::{body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(id: Option<&str>, secret: Option<&str>) -> LoginArgs {
        LoginArgs {
            client_id: id.map(str::to_string),
            client_secret: secret.map(str::to_string),
            ..LoginArgs::default()
        }
    }

    fn client_for(server: &MockServer) -> OAuthClient {
        let config = AuthConfig::new(OAuthCredentials::new(
            "test.apps.googleusercontent.com",
            "secret",
        ))
        .with_endpoints(OAuthEndpoints::with_base(&server.uri()));
        OAuthClient::new(config).unwrap()
    }

    #[test]
    fn flags_win_over_config() {
        let settings = OAuthSettings {
            client_id: Some("config-id.apps.googleusercontent.com".to_string()),
            client_secret: Some("config-secret".to_string()),
            credentials_file: None,
        };
        let (creds, source) = resolve_credentials(
            &args(Some("cli-id.apps.googleusercontent.com"), Some("cli-secret")),
            &settings,
        )
        .unwrap();
        assert_eq!(creds.client_id, "cli-id.apps.googleusercontent.com");
        assert_eq!(source, CredentialSource::Cli);

        let (creds, source) = resolve_credentials(&args(None, None), &settings).unwrap();
        assert_eq!(creds.client_secret, "config-secret");
        assert_eq!(source, CredentialSource::Config);
    }

    #[test]
    fn partial_flags_fail() {
        let settings = OAuthSettings::default();
        assert!(resolve_credentials(&args(Some("id"), None), &settings).is_err());
        assert!(resolve_credentials(&args(None, Some("secret")), &settings).is_err());
        assert!(resolve_credentials(&args(None, None), &settings).is_err());
    }

    #[test]
    fn credentials_file_flag_is_a_cli_source() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("client.json");
        std::fs::write(
            &file,
            r#"{"web": {"client_id": "web-id.apps.googleusercontent.com", "client_secret": "web-secret"}}"#,
        )
        .unwrap();

        let login = LoginArgs {
            credentials_file: Some(file),
            ..LoginArgs::default()
        };
        let (creds, source) = resolve_credentials(&login, &OAuthSettings::default()).unwrap();
        assert_eq!(creds.client_id, "web-id.apps.googleusercontent.com");
        assert_eq!(source, CredentialSource::Cli);
    }

    #[tokio::test]
    async fn status_without_token_reports_unauthenticated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());
        let report = collect_status(&store, Err("unused".to_string())).await;
        assert!(!report.authenticated);
        assert!(report.error.unwrap().contains("not_authenticated"));
        assert_eq!(report.token_path, store.token_path());
    }

    #[tokio::test]
    async fn status_with_corrupt_token_reports_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());
        std::fs::write(store.token_path(), "{not json").unwrap();
        let report = collect_status(&store, Err("unused".to_string())).await;
        assert!(!report.authenticated);
        assert!(report.error.unwrap().contains("parse_error"));
    }

    #[tokio::test]
    async fn status_refreshes_and_reports_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "refreshed",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("access_token", "refreshed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "user@example.com",
                "scope": "openid email",
                "expires_in": "3599"
            })))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());
        store
            .save(
                &Token::new("stale")
                    .with_refresh_token("R")
                    .with_expiry(Utc::now() - Duration::minutes(1)),
            )
            .unwrap();
        store.save_granted_services(&["drive"]).unwrap();

        let config = AuthConfig::new(OAuthCredentials::new(
            "test.apps.googleusercontent.com",
            "secret",
        ))
        .with_endpoints(OAuthEndpoints::with_base(&server.uri()));
        let report = collect_status(&store, Ok(config)).await;

        assert!(report.authenticated, "{:?}", report.error);
        assert!(report.refreshable);
        assert_eq!(report.email.as_deref(), Some("user@example.com"));
        assert_eq!(report.granted_services, vec!["drive"]);
        assert!(report.expiry.unwrap() > Utc::now());

        let persisted = store.load().unwrap();
        assert_eq!(persisted.access_token, "refreshed");
        assert_eq!(persisted.refresh_token(), Some("R"));
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token_and_deletes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string("token=R"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());
        store.save(&Token::new("A").with_refresh_token("R")).unwrap();
        store.save_granted_services(&["gmail"]).unwrap();

        let report = logout_with(&store, &client_for(&server)).await.unwrap();
        assert_eq!(report.status, "logged_out");
        assert!(report.revoked);
        assert!(report.revocation_error.is_none());
        assert!(!store.token_path().exists());
        assert!(!store.granted_services_path().exists());
    }

    #[tokio::test]
    async fn logout_deletes_even_when_revocation_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_token"))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());
        store.save(&Token::new("A")).unwrap();

        let report = logout_with(&store, &client_for(&server)).await.unwrap();
        assert!(!report.revoked);
        assert!(report.revocation_error.unwrap().contains("invalid_token"));
        assert!(!store.token_path().exists());
    }

    #[tokio::test]
    async fn logout_without_token_is_not_an_error() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());

        let report = logout_with(&store, &client_for(&server)).await.unwrap();
        assert_eq!(report.status, "not_logged_in");
        assert!(!report.revoked);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_ignores_corrupt_granted_services_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "refreshed",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "user@example.com"
            })))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path());
        store.save(&Token::new("A").with_refresh_token("R")).unwrap();
        std::fs::write(store.granted_services_path(), "{garbage").unwrap();

        let config = AuthConfig::new(OAuthCredentials::new(
            "test.apps.googleusercontent.com",
            "secret",
        ))
        .with_endpoints(OAuthEndpoints::with_base(&server.uri()));
        let report = collect_status(&store, Ok(config)).await;

        assert!(report.authenticated, "{:?}", report.error);
        assert!(report.error.is_none());
        assert_eq!(report.email.as_deref(), Some("user@example.com"));
        assert!(report.granted_services.is_empty());
    }

    // Single-threaded runtime: the lock is released by a task that can only
    // run if deletion does not block the runtime thread.
    #[tokio::test(flavor = "current_thread")]
    async fn logout_waits_for_lock_off_the_runtime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(tmp.path()).with_lock_options(LockOptions {
            timeout: std::time::Duration::from_secs(3),
            ..LockOptions::default()
        });
        store.save(&Token::new("A")).unwrap();

        let held = CredentialLock::acquire(store.token_path()).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            drop(held);
        });

        let report = logout_with(&store, &client_for(&server)).await.unwrap();
        assert_eq!(report.status, "logged_out");
        assert!(!store.token_path().exists());
    }
}
