//! Server-side token revocation.

use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};
use crate::oauth::OAuthClient;
use crate::token::Token;

/// Picks the credential to revoke. Revoking the refresh token invalidates
/// the whole grant; the access token alone may leave it usable.
pub fn revocation_target(token: &Token) -> Option<&str> {
    token
        .refresh_token()
        .or_else(|| Some(token.access_token.as_str()).filter(|t| !t.is_empty()))
}

impl OAuthClient {
    /// Revokes `token` at the provider.
    ///
    /// Callers treat this as best effort: local logout proceeds regardless.
    ///
    /// # Errors
    ///
    /// `RevocationFailed` when the token carries nothing to revoke or the
    /// provider answers with a non-200 status (the body is included).
    pub async fn revoke(&self, token: &Token) -> AuthResult<()> {
        let target = revocation_target(token)
            .ok_or_else(|| AuthError::revocation_failed("token has nothing to revoke"))?;
        debug!(
            kind = if token.is_refreshable() { "refresh" } else { "access" },
            "revoking token"
        );

        let (status, body) = self
            .post_form(
                &self.config.endpoints.revoke_url,
                &[("token", target)],
                "token revocation",
            )
            .await?;

        if status != reqwest::StatusCode::OK {
            return Err(AuthError::revocation_failed(format!(
                "revocation endpoint returned {status}: {body}"
            )));
        }

        info!("token revoked at provider");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthErrorCode;
    use crate::config::{AuthConfig, OAuthCredentials, OAuthEndpoints};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OAuthClient {
        let config = AuthConfig::new(OAuthCredentials::new("id.apps.googleusercontent.com", "s"))
            .with_endpoints(OAuthEndpoints::with_base(&server.uri()));
        OAuthClient::new(config).unwrap()
    }

    #[test]
    fn target_prefers_refresh_token() {
        let token = Token::new("access").with_refresh_token("refresh");
        assert_eq!(revocation_target(&token), Some("refresh"));

        let token = Token::new("access");
        assert_eq!(revocation_target(&token), Some("access"));

        let mut token = Token::new("");
        token.refresh_token = Some(String::new());
        assert_eq!(revocation_target(&token), None);
    }

    #[tokio::test]
    async fn revoke_sends_refresh_token_in_form_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let token = Token::new("access-value").with_refresh_token("refresh-value");
        client_for(&server).revoke(&token).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert_eq!(body, "token=refresh-value");
        assert!(!body.contains("access-value"));
        let content_type = requests[0].headers.get("content-type").unwrap();
        assert_eq!(content_type, "application/x-www-form-urlencoded");
    }

    #[tokio::test]
    async fn revoke_surfaces_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_token"}"#))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .revoke(&Token::new("access"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::RevocationFailed);
        assert!(err.message().contains("invalid_token"));
    }

    #[tokio::test]
    async fn revoke_without_credentials_fails_before_network() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .revoke(&Token::new(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::RevocationFailed);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
