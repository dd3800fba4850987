//! Sources of currently valid access tokens.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::oauth::OAuthClient;
use crate::store::CredentialStore;
use crate::token::{Token, merge};

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Yields a valid access token, renewing it when needed.
pub trait TokenSource: Send + Sync {
    /// Returns a token that is valid right now.
    fn token(&self) -> BoxFuture<'_, AuthResult<Token>>;

    /// Renews the token even if it has not expired. Sources that cannot
    /// renew return their current token.
    fn refresh(&self) -> BoxFuture<'_, AuthResult<Token>> {
        self.token()
    }
}

/// Always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: Token,
}

impl StaticTokenSource {
    pub fn new(token: Token) -> Self {
        Self { token }
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self) -> BoxFuture<'_, AuthResult<Token>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// Renews the access token through the token endpoint when it expires.
///
/// Concurrent callers share one renewal: the current token sits behind an
/// async mutex held for the duration of the refresh request.
#[derive(Debug)]
pub struct RefreshingTokenSource {
    client: Arc<OAuthClient>,
    current: tokio::sync::Mutex<Token>,
}

impl RefreshingTokenSource {
    pub fn new(client: Arc<OAuthClient>, token: Token) -> Self {
        Self {
            client,
            current: tokio::sync::Mutex::new(token),
        }
    }

    async fn renew(&self, force: bool) -> AuthResult<Token> {
        let mut current = self.current.lock().await;
        if !force && current.is_valid() {
            return Ok(current.clone());
        }

        let Some(refresh_token) = current.refresh_token().map(str::to_string) else {
            if force && current.is_valid() {
                return Ok(current.clone());
            }
            return Err(AuthError::refresh_failed(
                "access token expired and no refresh token is stored",
            ));
        };

        debug!(forced = force, "refreshing access token");
        let fresh = self.client.refresh(&refresh_token).await?;
        let merged = merge(Some(&*current), Some(fresh))
            .ok_or_else(|| AuthError::internal("merge produced no token"))?;
        *current = merged.clone();
        Ok(merged)
    }
}

impl TokenSource for RefreshingTokenSource {
    fn token(&self) -> BoxFuture<'_, AuthResult<Token>> {
        Box::pin(self.renew(false))
    }

    fn refresh(&self) -> BoxFuture<'_, AuthResult<Token>> {
        Box::pin(self.renew(true))
    }
}

/// Writes renewed tokens back to the credential store so later processes
/// start from the fresh token instead of refreshing again.
pub struct PersistingTokenSource {
    inner: Arc<dyn TokenSource>,
    store: CredentialStore,
    last_access_token: Mutex<String>,
}

impl std::fmt::Debug for PersistingTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistingTokenSource")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl PersistingTokenSource {
    /// `loaded_access_token` is the access token currently on disk.
    pub fn new(
        inner: Arc<dyn TokenSource>,
        store: CredentialStore,
        loaded_access_token: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            store,
            last_access_token: Mutex::new(loaded_access_token.into()),
        }
    }

    /// Saves `token` (merged with the stored one) if its access token differs
    /// from the last one persisted. Failure to save is logged, not returned:
    /// the token is still good for this process.
    async fn persist_if_changed(&self, token: &Token) {
        {
            let last = self
                .last_access_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last == token.access_token {
                return;
            }
        }

        let store = self.store.clone();
        let incoming = token.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_merged(incoming)).await;
        match saved {
            Ok(Ok(_)) => {
                debug!(path = %self.store.token_path().display(), "persisted refreshed token");
                *self
                    .last_access_token
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = token.access_token.clone();
            }
            Ok(Err(e)) => warn!(error = %e, "failed to persist refreshed token"),
            Err(e) => warn!(error = %e, "token persistence task failed"),
        }
    }
}

impl TokenSource for PersistingTokenSource {
    fn token(&self) -> BoxFuture<'_, AuthResult<Token>> {
        Box::pin(async move {
            let token = self.inner.token().await?;
            self.persist_if_changed(&token).await;
            Ok(token)
        })
    }

    fn refresh(&self) -> BoxFuture<'_, AuthResult<Token>> {
        Box::pin(async move {
            let token = self.inner.refresh().await?;
            self.persist_if_changed(&token).await;
            Ok(token)
        })
    }
}
