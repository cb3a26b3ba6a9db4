//! OAuth 2.0 authorization-code flow primitives.
//!
//! This module knows how to build the consent URL and how to talk to a
//! provider's token endpoint. It holds no token state; that lives in
//! [`TokenManager`](crate::manager::TokenManager).
//!
//! Requests to the token endpoint authenticate the client with HTTP Basic
//! (`client_id:client_secret`), as both Spotify and the RFC 6749 default
//! expect.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::Rng as _;
use serde::Deserialize;
use tracing::{debug, info};

use crate::BoxFuture;
use crate::error::{AuthError, ProviderError, ProviderResult};

pub const SPOTIFY_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const SPOTIFY_DEFAULT_SCOPE: &str = "user-read-currently-playing";

/// Length of the random CSRF `state` value, in bytes before encoding.
const STATE_LENGTH: usize = 16;

/// Client registration with the OAuth provider. Immutable once loaded.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: vec![SPOTIFY_DEFAULT_SCOPE.to_string()],
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.trim().is_empty() {
            return Err("client_id is required");
        }
        if self.client_secret.trim().is_empty() {
            return Err("client_secret is required");
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err("at least one scope is required");
        }
        Ok(())
    }

    /// Scopes in the space-separated form the authorize endpoint expects.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Where the provider lives and where it sends the user back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// Must match the redirect URI registered with the provider.
    pub redirect_uri: String,
}

impl OAuthEndpoints {
    pub fn spotify(redirect_uri: impl Into<String>) -> Self {
        Self {
            authorize_url: SPOTIFY_AUTHORIZE_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            redirect_uri: redirect_uri.into(),
        }
    }
}

/// A single-use code delivered by the provider redirect.
///
/// Deliberately not `Clone`: handing it to
/// [`TokenManager::exchange`](crate::manager::TokenManager::exchange)
/// consumes it.
#[derive(PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationCode(<redacted>)")
    }
}

/// One authorization attempt: the consent URL plus the CSRF state the
/// callback must echo back.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    url: String,
    state: String,
}

impl AuthorizationRequest {
    /// Builds a request with a fresh random state.
    pub fn new(credentials: &OAuthCredentials, endpoints: &OAuthEndpoints) -> Self {
        Self::with_state(credentials, endpoints, generate_state())
    }

    pub fn with_state(
        credentials: &OAuthCredentials,
        endpoints: &OAuthEndpoints,
        state: impl Into<String>,
    ) -> Self {
        let state = state.into();
        let url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            endpoints.authorize_url,
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(&endpoints.redirect_uri),
            urlencoding::encode(&credentials.scope_param()),
            urlencoding::encode(&state),
        );
        Self { url, state }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> &str {
        &self.state
    }
}

fn generate_state() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..STATE_LENGTH).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Body of a successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Present on code exchange; usually absent on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Informational only; expiry is detected reactively.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// The provider's token endpoint.
///
/// Implementations perform exactly one request per call and never retry.
pub trait TokenEndpoint: Send + Sync {
    /// `grant_type=authorization_code`.
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<TokenResponse, AuthError>>;

    /// `grant_type=refresh_token`.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, AuthError>>;
}

/// [`TokenEndpoint`] over HTTPS.
#[derive(Debug)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    endpoints: OAuthEndpoints,
    http_client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(
        credentials: OAuthCredentials,
        endpoints: OAuthEndpoints,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::internal("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            credentials,
            endpoints,
            http_client,
        })
    }

    pub fn credentials(&self) -> &OAuthCredentials {
        &self.credentials
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        debug!(url = %self.endpoints.token_url, "requesting token");

        let response = self
            .http_client
            .post(&self.endpoints.token_url)
            .header(
                reqwest::header::AUTHORIZATION,
                self.credentials.basic_auth_header(),
            )
            .form(params)
            .send()
            .await
            .map_err(ProviderError::from_request)?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::network("failed to read token response").with_source(e)
        })?;

        if !status.is_success() {
            let reason = token_error_reason(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(AuthError::rejected(status.as_u16(), reason));
        }

        serde_json::from_str(&body).map_err(|e| {
            AuthError::from(
                ProviderError::invalid_response("invalid token response").with_source(e),
            )
        })
    }
}

impl TokenEndpoint for OAuthClient {
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<TokenResponse, AuthError>> {
        Box::pin(async move {
            let response = self
                .request_token(&[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.endpoints.redirect_uri.as_str()),
                ])
                .await?;
            info!("exchanged authorization code for tokens");
            Ok(response)
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, AuthError>> {
        Box::pin(async move {
            let response = self
                .request_token(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ])
                .await?;
            info!("refreshed access token");
            Ok(response)
        })
    }
}

/// Extracts `error_description` (or `error`) from an RFC 6749 error body.
fn token_error_reason(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        error_description: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match (parsed.error, parsed.error_description) {
        (Some(error), Some(description)) => Some(format!("{}: {}", error, description)),
        (Some(error), None) => Some(error),
        (None, description) => description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> OAuthCredentials {
        OAuthCredentials::new("my-client", "my-secret")
    }

    fn endpoints() -> OAuthEndpoints {
        OAuthEndpoints::spotify("http://127.0.0.1:3000/callback")
    }

    #[test]
    fn authorize_url_carries_request_parameters() {
        let request = AuthorizationRequest::with_state(&credentials(), &endpoints(), "xyz");
        assert_eq!(
            request.url(),
            "https://accounts.spotify.com/authorize?response_type=code&client_id=my-client\
             &redirect_uri=http%3A%2F%2F127.0.0.1%3A3000%2Fcallback\
             &scope=user-read-currently-playing&state=xyz"
        );
        assert_eq!(request.state(), "xyz");
    }

    #[test]
    fn authorize_url_joins_scopes_with_spaces() {
        let creds = credentials().with_scopes(vec!["a".to_string(), "b".to_string()]);
        let request = AuthorizationRequest::with_state(&creds, &endpoints(), "s");
        assert!(request.url().contains("scope=a%20b"));
    }

    #[test]
    fn random_state_differs_between_requests() {
        let first = AuthorizationRequest::new(&credentials(), &endpoints());
        let second = AuthorizationRequest::new(&credentials(), &endpoints());
        assert_ne!(first.state(), second.state());
        // 16 bytes, base64 without padding.
        assert_eq!(first.state().len(), 22);
    }

    #[test]
    fn basic_auth_header_encodes_client_pair() {
        assert_eq!(
            credentials().basic_auth_header(),
            format!("Basic {}", STANDARD.encode("my-client:my-secret"))
        );
    }

    #[test]
    fn credentials_validation() {
        assert!(credentials().validate().is_ok());
        assert_eq!(
            OAuthCredentials::new("", "secret").validate(),
            Err("client_id is required")
        );
        assert_eq!(
            OAuthCredentials::new("id", " ").validate(),
            Err("client_secret is required")
        );
        assert!(credentials().with_scopes(Vec::new()).validate().is_err());
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("my-client"));
        assert!(!debug.contains("my-secret"));
    }

    #[test]
    fn token_response_without_refresh_token() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"AT2","token_type":"Bearer","expires_in":3600}"#)
                .unwrap();
        assert_eq!(response.access_token, "AT2");
        assert!(response.refresh_token.is_none());
        assert_eq!(response.expires_in, Some(3600));
    }

    #[test]
    fn token_error_reason_prefers_description() {
        assert_eq!(
            token_error_reason(r#"{"error":"invalid_grant","error_description":"Invalid authorization code"}"#),
            Some("invalid_grant: Invalid authorization code".to_string())
        );
        assert_eq!(
            token_error_reason(r#"{"error":"invalid_client"}"#),
            Some("invalid_client".to_string())
        );
        assert_eq!(token_error_reason("<html>oops</html>"), None);
    }
}
