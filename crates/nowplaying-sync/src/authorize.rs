//! The interactive authorization-code flow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nowplaying_providers::{
    AuthorizationCode, AuthorizationCompleter, AuthorizationRequest, CallbackReceiver,
    OAuthCredentials, OAuthEndpoints, TokenManager, TokenSet,
};
use tracing::{info, warn};

use crate::error::SyncResult;

/// Everything needed to walk a user through consent once.
#[derive(Clone)]
pub struct AuthorizationFlow {
    credentials: OAuthCredentials,
    endpoints: OAuthEndpoints,
    completer: Arc<dyn AuthorizationCompleter>,
    callback_addr: SocketAddr,
    timeout: Duration,
}

impl AuthorizationFlow {
    pub fn new(
        credentials: OAuthCredentials,
        endpoints: OAuthEndpoints,
        completer: Arc<dyn AuthorizationCompleter>,
    ) -> Self {
        let defaults = crate::SyncConfig::default();
        Self {
            credentials,
            endpoints,
            completer,
            callback_addr: defaults.callback_addr,
            timeout: defaults.authorization_timeout,
        }
    }

    pub fn with_callback_addr(mut self, addr: SocketAddr) -> Self {
        self.callback_addr = addr;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the flow and exchanges the resulting code with `tokens`.
    pub async fn run(&self, tokens: &TokenManager) -> SyncResult<TokenSet> {
        let code = self.receive_code().await?;
        Ok(tokens.exchange(code).await?)
    }

    /// Opens the consent page and waits for the provider to redirect back.
    ///
    /// The callback listener lives for the duration of this call only.
    /// Dropping the returned future tears it down.
    pub async fn receive_code(&self) -> SyncResult<AuthorizationCode> {
        let request = AuthorizationRequest::new(&self.credentials, &self.endpoints);
        let mut receiver = CallbackReceiver::bind(self.callback_addr, request).await?;

        info!(
            url = %receiver.login_url(),
            timeout_secs = self.timeout.as_secs(),
            "waiting for authorization"
        );
        if let Err(e) = self.completer.complete(&receiver.login_url()).await {
            warn!(error = %e, "authorization completer failed, waiting for a manual login");
        }

        let code = receiver.wait_for_code(self.timeout).await;
        receiver.shutdown().await;
        Ok(code?)
    }
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow")
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .field("callback_addr", &self.callback_addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
