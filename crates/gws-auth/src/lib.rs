//! OAuth 2.0 login and credential lifecycle for the `gws` CLI.
//!
//! The crate covers the interactive PKCE login through a loopback redirect,
//! multi-process safe persistence of the resulting token, revocation, and
//! provisioning of per-service API clients that refresh tokens on demand.

pub mod config;
pub mod error;
pub mod factory;
pub mod lock;
pub mod oauth;
pub mod revoke;
pub mod store;
pub mod token;
pub mod token_source;

pub use config::{AuthConfig, OAuthCredentials, OAuthEndpoints};
pub use error::{AuthError, AuthErrorCode, AuthResult};
pub use factory::{ClientFactory, ServiceClient};
pub use lock::{CredentialLock, LockOptions};
pub use oauth::{NoBrowser, OAuthClient, PkceFlow, SystemBrowser, TokenInfo, UrlOpener};
pub use revoke::revocation_target;
pub use store::CredentialStore;
pub use token::{Token, merge};
pub use token_source::{
    BoxFuture, PersistingTokenSource, RefreshingTokenSource, StaticTokenSource, TokenSource,
};
