//! OAuth 2.0 authorization code flow with PKCE and a loopback redirect.
//!
//! # Flow
//!
//! 1. Generate a code verifier, its S256 challenge and a CSRF `state`
//! 2. Bind an ephemeral port on 127.0.0.1 and serve `/callback` from it
//! 3. Print the authorization URL and try to open it in the browser
//! 4. Wait for the redirect, an error, or the callback timeout
//! 5. Exchange the code together with the verifier for a token
//!
//! The listener task is owned by a guard that aborts it on drop, so the port
//! is released on every exit path, including the caller dropping the future.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, from_reqwest};
use crate::token::Token;

/// Path served by the loopback listener.
pub const CALLBACK_PATH: &str = "/callback";

/// Verifier length in bytes, before base64 encoding.
const CODE_VERIFIER_LENGTH: usize = 32;

/// CSRF state length in bytes, before base64 encoding.
const STATE_LENGTH: usize = 16;

/// A browser that never answers within this window is dropped.
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = "<html><head><title>gws</title></head><body>\
    <h1>Authorization successful</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_PAGE: &str = "<html><head><title>gws</title></head><body>\
    <h1>Authorization failed</h1>\
    <p>Return to the terminal for details.</p></body></html>";

/// Opens the authorization URL for the user.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Opens URLs with the desktop's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Leaves the printed URL for the user to open manually.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

impl UrlOpener for NoBrowser {
    fn open(&self, _url: &str) -> std::io::Result<()> {
        Ok(())
    }
}

/// PKCE exchange state for one login attempt. Never persisted.
#[derive(Debug)]
pub struct PkceFlow {
    /// High-entropy secret proving possession at exchange time.
    pub verifier: String,
    /// `base64url(sha256(verifier))`.
    pub challenge: String,
    /// CSRF token echoed back by the provider.
    pub state: String,
}

impl PkceFlow {
    /// Creates a new PKCE flow with random verifier and state.
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        let state = random_token(STATE_LENGTH);

        Self {
            verifier,
            challenge,
            state,
        }
    }

    /// Computes the S256 challenge for a code verifier.
    pub fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    /// Builds the provider authorization URL, asking for offline access and
    /// forced consent so that a refresh token is always issued.
    pub fn build_auth_url(
        &self,
        auth_endpoint: &str,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String {
        let scope = scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            auth_endpoint,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&self.challenge),
            urlencoding::encode(&self.state),
        )
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        let mut token = Token::new(response.access_token);
        if let Some(token_type) = response.token_type.filter(|t| !t.is_empty()) {
            token.token_type = token_type;
        }
        token.refresh_token = response.refresh_token.filter(|t| !t.is_empty());
        match response.expires_in {
            Some(secs) if secs > 0 => token.expiring_in(secs),
            _ => token,
        }
    }
}

/// Account details reported by the tokeninfo endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub email: Option<String>,
    pub scopes: Vec<String>,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    // Google reports this as a string
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// OAuth client: runs the login flow and talks to the token, revocation and
/// tokeninfo endpoints.
#[derive(Debug)]
pub struct OAuthClient {
    pub(crate) config: AuthConfig,
    pub(crate) http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    pub fn new(config: AuthConfig) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("gws/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::internal("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Runs the interactive login and returns the issued token.
    ///
    /// Dropping the returned future shuts the loopback listener down.
    ///
    /// # Errors
    ///
    /// `StateMismatch` and `FlowDenied` from the redirect, `FlowTimeout` if
    /// no redirect arrives within the callback timeout, and any error of the
    /// code exchange.
    pub async fn authorize(&self, scopes: &[String], opener: &dyn UrlOpener) -> AuthResult<Token> {
        let pkce = PkceFlow::new();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| AuthError::io("failed to bind loopback listener").with_source(e))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::io("failed to read listener address").with_source(e))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
        debug!(port, "loopback listener bound");

        let (tx, rx) = oneshot::channel();
        let server = CallbackServer::spawn(listener, pkce.state.clone(), tx);

        let auth_url = pkce.build_auth_url(
            &self.config.endpoints.auth_url,
            &self.config.credentials.client_id,
            &redirect_uri,
            scopes,
        );

        eprintln!("\nOpen this URL in your browser to authorize gws:\n\n{auth_url}\n");
        if let Err(e) = opener.open(&auth_url) {
            warn!("failed to open browser: {}", e);
        }

        let outcome = tokio::time::timeout(self.config.callback_timeout, rx).await;
        server.shutdown().await;

        let code = match outcome {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(AuthError::internal(
                    "callback listener stopped without a result",
                ));
            }
            Err(_) => {
                return Err(AuthError::flow_timeout(format!(
                    "no authorization received within {} seconds",
                    self.config.callback_timeout.as_secs()
                )));
            }
        };

        info!("received authorization code, exchanging for tokens");
        self.exchange_code(&code, &pkce.verifier, &redirect_uri).await
    }

    /// Exchanges an authorization code for a token.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> AuthResult<Token> {
        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let (status, body) = self
            .post_form(&self.config.endpoints.token_url, &params, "token exchange")
            .await?;

        if !status.is_success() {
            return Err(AuthError::flow_denied(format!(
                "token exchange failed ({status}): {body}"
            )));
        }

        let response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::invalid_response("invalid token exchange response").with_source(e)
        })?;

        info!("successfully obtained tokens");
        Ok(response.into())
    }

    /// Obtains a new access token from a refresh token. The returned token
    /// usually carries no refresh token; callers merge it with the old one.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<Token> {
        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let (status, body) = self
            .post_form(&self.config.endpoints.token_url, &params, "token refresh")
            .await?;

        if status.is_server_error() {
            return Err(AuthError::network(format!(
                "token endpoint unavailable ({status})"
            )));
        }
        if !status.is_success() {
            return Err(AuthError::refresh_failed(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        let response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::invalid_response("invalid token refresh response").with_source(e)
        })?;

        info!("refreshed access token");
        Ok(response.into())
    }

    /// Looks up the account behind an access token.
    pub async fn token_info(&self, access_token: &str) -> AuthResult<TokenInfo> {
        let response = self
            .http_client
            .get(&self.config.endpoints.tokeninfo_url)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| from_reqwest("tokeninfo", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest("tokeninfo", e))?;
        if !status.is_success() {
            return Err(AuthError::invalid_response(format!(
                "tokeninfo failed ({status}): {body}"
            )));
        }

        let parsed: TokenInfoResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::invalid_response("invalid tokeninfo response").with_source(e))?;

        let expires_in = match parsed.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };

        Ok(TokenInfo {
            email: parsed.email,
            scopes: parsed
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            expires_in,
        })
    }

    /// Sends a form-encoded POST and returns status and body.
    pub(crate) async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
        context: &str,
    ) -> AuthResult<(reqwest::StatusCode, String)> {
        let response = self
            .http_client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| from_reqwest(context, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(context, e))?;
        Ok((status, body))
    }
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<AuthResult<String>>>>>;

/// Loopback HTTP server task. Aborted when dropped.
///
/// Every connection is served on its own task, so a browser preconnect that
/// never sends a request cannot hold up the redirect. The connection tasks
/// live in a set owned by the accept task and are aborted along with it.
struct CallbackServer {
    handle: JoinHandle<()>,
}

impl CallbackServer {
    fn spawn(
        listener: TcpListener,
        expected_state: String,
        tx: oneshot::Sender<AuthResult<String>>,
    ) -> Self {
        let expected_state: Arc<str> = expected_state.into();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        let handle = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(conn) => conn,
                            Err(e) => {
                                warn!("failed to accept connection: {}", e);
                                continue;
                            }
                        };
                        debug!(%peer, "callback connection");

                        let expected_state = Arc::clone(&expected_state);
                        let tx = Arc::clone(&tx);
                        connections.spawn(async move {
                            let handled = tokio::time::timeout(
                                CONNECTION_READ_TIMEOUT,
                                handle_connection(stream, &expected_state),
                            )
                            .await;
                            match handled {
                                Ok(Some(result)) => deliver(&tx, result),
                                Ok(None) => {}
                                Err(_) => debug!(%peer, "callback connection went idle"),
                            }
                        });
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }
        });
        Self { handle }
    }

    /// Stops the server and waits until the listener is closed.
    async fn shutdown(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Hands the first callback result to the waiting flow. Later results are
/// dropped.
fn deliver(tx: &CallbackSender, result: AuthResult<String>) {
    let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }
}

/// Serves one request. Returns `None` for requests that are not the OAuth
/// redirect (favicon, preconnects) so the listener keeps waiting.
async fn handle_connection(
    mut stream: TcpStream,
    expected_state: &str,
) -> Option<AuthResult<String>> {
    let mut reader = BufReader::new(&mut stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;

    // Drain headers so the browser sees a clean response.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }

    let target = match parse_request_target(&request_line) {
        Some(target) if target.path() == CALLBACK_PATH => target,
        _ => {
            let _ = write_response(&mut stream, "404 Not Found", "").await;
            return None;
        }
    };

    let result = evaluate_callback(&target, expected_state);
    let (status, page) = match result {
        Ok(_) => ("200 OK", SUCCESS_PAGE),
        Err(_) => ("400 Bad Request", FAILURE_PAGE),
    };
    let _ = write_response(&mut stream, status, page).await;
    Some(result)
}

/// Parses `GET /callback?code=... HTTP/1.1` into a URL.
fn parse_request_target(request_line: &str) -> Option<url::Url> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    url::Url::parse("http://127.0.0.1")
        .ok()?
        .join(target)
        .ok()
}

/// Validates the redirect parameters: state first, then provider error,
/// then the code itself.
fn evaluate_callback(target: &url::Url, expected_state: &str) -> AuthResult<String> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in target.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::state_mismatch(
            "OAuth state mismatch, possible CSRF attempt",
        ));
    }
    if let Some(error) = error {
        return Err(AuthError::flow_denied(format!(
            "authorization denied: {error}"
        )));
    }
    match code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(AuthError::flow_denied(
            "missing authorization code in callback",
        )),
    }
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthErrorCode;
    use crate::config::OAuthCredentials;

    fn target(query: &str) -> url::Url {
        parse_request_target(&format!("GET /callback?{query} HTTP/1.1\r\n")).unwrap()
    }

    #[test]
    fn pkce_verifier_length() {
        let flow = PkceFlow::new();
        // 32 bytes → 43 base64url characters
        assert_eq!(flow.verifier.len(), 43);
        assert_eq!(flow.state.len(), 22);
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_example() {
        let challenge = PkceFlow::compute_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn pkce_values_are_random() {
        let a = PkceFlow::new();
        let b = PkceFlow::new();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.state, b.state);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn auth_url_format() {
        let flow = PkceFlow::new();
        let url = flow.build_auth_url(
            "https://accounts.example/auth",
            "test-client.apps.googleusercontent.com",
            "http://127.0.0.1:8080/callback",
            &["openid".to_string(), "https://www.googleapis.com/auth/drive".to_string()],
        );

        let parsed = url::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "test-client.apps.googleusercontent.com");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8080/callback");
        assert_eq!(params["scope"], "openid https://www.googleapis.com/auth/drive");
        assert_eq!(params["code_challenge"], flow.challenge);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], flow.state);
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert!(!url.contains(&flow.verifier));
    }

    #[test]
    fn callback_accepts_matching_state() {
        let code = evaluate_callback(&target("code=abc%2F123&state=s1"), "s1").unwrap();
        assert_eq!(code, "abc/123");
    }

    #[test]
    fn callback_rejects_wrong_or_missing_state() {
        let err = evaluate_callback(&target("code=abc&state=other"), "s1").unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::StateMismatch);
        let err = evaluate_callback(&target("code=abc"), "s1").unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::StateMismatch);
    }

    #[test]
    fn callback_reports_denial_and_missing_code() {
        let err = evaluate_callback(&target("error=access_denied&state=s1"), "s1").unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::FlowDenied);
        assert!(err.message().contains("access_denied"));

        let err = evaluate_callback(&target("state=s1"), "s1").unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::FlowDenied);
    }

    #[test]
    fn request_target_parsing() {
        assert!(parse_request_target("POST /callback HTTP/1.1").is_none());
        assert!(parse_request_target("").is_none());
        let t = parse_request_target("GET /favicon.ico HTTP/1.1").unwrap();
        assert_eq!(t.path(), "/favicon.ico");
    }

    #[test]
    fn token_response_conversion() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","refresh_token":"rt","expires_in":3599,"token_type":"Bearer","scope":"x"}"#,
        )
        .unwrap();
        let token: Token = response.into();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.refresh_token(), Some("rt"));
        assert!(token.expiry.is_some());
        assert!(!token.is_expired());

        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"at2"}"#).unwrap();
        let token: Token = response.into();
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token.is_none());
        assert!(token.expiry.is_none());
    }

    /// Records the authorization URL. With `deny_after_idle_connection` it
    /// also opens a connection that never sends anything, then redirects
    /// with a denial 100ms later, like a browser that preconnects.
    #[derive(Default)]
    struct RecordingOpener {
        auth_url: Mutex<Option<String>>,
        deny_after_idle_connection: bool,
    }

    impl RecordingOpener {
        fn redirect_and_state(&self) -> (String, String) {
            let auth_url = self.auth_url.lock().unwrap().clone().expect("browser was not opened");
            let parsed = url::Url::parse(&auth_url).unwrap();
            let param = |name: &str| {
                parsed
                    .query_pairs()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.into_owned())
                    .unwrap()
            };
            (param("redirect_uri"), param("state"))
        }

        fn port(&self) -> u16 {
            let (redirect, _) = self.redirect_and_state();
            url::Url::parse(&redirect).unwrap().port().unwrap()
        }
    }

    impl UrlOpener for RecordingOpener {
        fn open(&self, url: &str) -> std::io::Result<()> {
            *self.auth_url.lock().unwrap() = Some(url.to_string());
            if self.deny_after_idle_connection {
                let (redirect, state) = self.redirect_and_state();
                let port = self.port();
                tokio::spawn(async move {
                    let _idle = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let _ = reqwest::get(format!("{redirect}?error=access_denied&state={state}")).await;
                });
            }
            Ok(())
        }
    }

    fn client_with_callback_timeout(timeout: Duration) -> OAuthClient {
        let config = AuthConfig::new(OAuthCredentials::new("id.apps.googleusercontent.com", "s"))
            .with_callback_timeout(timeout);
        OAuthClient::new(config).unwrap()
    }

    async fn assert_port_released(port: u16) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok() {
            assert!(
                std::time::Instant::now() < deadline,
                "port {port} still accepts connections"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn flow_times_out_and_releases_port() {
        let client = client_with_callback_timeout(Duration::from_millis(200));
        let opener = RecordingOpener::default();

        let err = client
            .authorize(&["openid".to_string()], &opener)
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::FlowTimeout);

        // shutdown waits for the listener to close
        let port = opener.port();
        assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_flow_releases_port() {
        let client = client_with_callback_timeout(Duration::from_secs(30));
        let opener = RecordingOpener::default();

        let pending = tokio::time::timeout(
            Duration::from_millis(200),
            client.authorize(&["openid".to_string()], &opener),
        )
        .await;
        assert!(pending.is_err(), "flow finished without a redirect");

        assert_port_released(opener.port()).await;
    }

    #[tokio::test]
    async fn idle_connection_does_not_block_redirect() {
        let client = client_with_callback_timeout(Duration::from_secs(5));
        let opener = RecordingOpener {
            deny_after_idle_connection: true,
            ..RecordingOpener::default()
        };

        let started = std::time::Instant::now();
        let err = client
            .authorize(&["openid".to_string()], &opener)
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::FlowDenied);
        assert!(err.message().contains("access_denied"));
        assert!(started.elapsed() < Duration::from_secs(3));

        assert_port_released(opener.port()).await;
    }
}
