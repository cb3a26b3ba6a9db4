//! The token lifecycle state machine.
//!
//! ```text
//!                 exchange ok                 auth failure reported
//! Unauthenticated ──────────▶ Authenticated ─────────────────────▶ NeedsRefresh
//!        ▲                        ▲                                  │    ▲
//!        │ forget                 └──────────── refresh ok ──────────┘    │
//!        │                                                                │
//!        └── (any state)                           refresh failed ────────┘
//! ```
//!
//! The manager owns the in-memory [`TokenSet`] and writes it through to a
//! [`TokenStore`] after every successful exchange or refresh. Writes run on
//! the blocking pool after the state lock is released, so readers never
//! wait on the disk. A failed write is logged and does not fail the
//! operation: the token stays usable for the rest of the process lifetime.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::oauth::{AuthorizationCode, TokenEndpoint};
use crate::tokens::{TokenSet, TokenStore};

/// Where the manager is in the token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthPhase {
    /// No access token yet.
    Unauthenticated,
    /// Holding an access token that was accepted last time it was used.
    Authenticated,
    /// The access token was rejected; a refresh is due.
    NeedsRefresh,
}

impl AuthPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::NeedsRefresh => "needs_refresh",
        }
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct TokenState {
    tokens: Option<TokenSet>,
    phase: AuthPhase,
}

/// Owns the OAuth token state for one user.
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn TokenStore>,
    state: RwLock<TokenState>,
    /// Every code ever handed to the endpoint, successful or not.
    consumed_codes: Mutex<HashSet<String>>,
    /// Serializes refreshes so two callers never spend the same refresh
    /// token concurrently.
    refresh_lock: AsyncMutex<()>,
    /// Taken under the state lock and held across the store write, so the
    /// store sees updates in the order the state did.
    store_lock: AsyncMutex<()>,
}

impl TokenManager {
    /// Creates a manager in the `Unauthenticated` phase. Call
    /// [`load_persisted`](Self::load_persisted) to pick up stored tokens.
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            endpoint,
            store,
            state: RwLock::new(TokenState {
                tokens: None,
                phase: AuthPhase::Unauthenticated,
            }),
            consumed_codes: Mutex::new(HashSet::new()),
            refresh_lock: AsyncMutex::new(()),
            store_lock: AsyncMutex::new(()),
        }
    }

    /// Hydrates state from the store.
    ///
    /// Returns true when a usable access token was found, meaning the
    /// authorization-code flow can be skipped. An unreadable store is logged
    /// and treated as empty.
    pub async fn load_persisted(&self) -> bool {
        match self.store.load() {
            Ok(Some(tokens)) => {
                let mut state = self.state.write().await;
                state.tokens = Some(tokens);
                state.phase = AuthPhase::Authenticated;
                info!("using persisted tokens");
                true
            }
            Ok(None) => {
                debug!("no persisted tokens");
                false
            }
            Err(e) => {
                warn!(error = %e, "could not read persisted tokens, authorization required");
                false
            }
        }
    }

    /// Exchanges a one-time authorization code for a token set.
    ///
    /// The code is consumed whatever the outcome. Presenting it again fails
    /// with [`AuthError::CodeAlreadyConsumed`] without contacting the
    /// provider. On rejection, the current state is left untouched.
    pub async fn exchange(&self, code: AuthorizationCode) -> Result<TokenSet, AuthError> {
        let code = code.into_inner();
        {
            let mut consumed = self
                .consumed_codes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !consumed.insert(code.clone()) {
                warn!("refusing to exchange an authorization code twice");
                return Err(AuthError::CodeAlreadyConsumed);
            }
        }

        let response = self.endpoint.exchange_code(&code).await?;
        if response.refresh_token.is_none() {
            warn!("token endpoint issued no refresh token, expiry will need re-authorization");
        }
        let tokens = TokenSet::new(response.access_token, response.refresh_token);

        let store_guard = {
            let mut state = self.state.write().await;
            state.tokens = Some(tokens.clone());
            state.phase = AuthPhase::Authenticated;
            self.store_lock.lock().await
        };
        info!("authorization code exchanged");
        self.persist(tokens.clone(), store_guard).await;

        Ok(tokens)
    }

    /// Mints a new access token with the stored refresh token.
    ///
    /// Fails with [`AuthError::MissingRefreshToken`] before any network I/O
    /// when there is nothing to refresh with. The refresh token is kept
    /// unless the provider rotated it. On failure the stale token set stays
    /// in place so a later attempt can retry.
    pub async fn refresh(&self) -> Result<TokenSet, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let state = self.state.read().await;
            state
                .tokens
                .as_ref()
                .filter(|t| t.has_refresh_token())
                .and_then(|t| t.refresh_token.clone())
        }
        .ok_or(AuthError::MissingRefreshToken)?;

        let response = match self.endpoint.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                let mut state = self.state.write().await;
                if state.tokens.is_some() {
                    state.phase = AuthPhase::NeedsRefresh;
                }
                return Err(e);
            }
        };

        let (tokens, store_guard) = {
            let mut state = self.state.write().await;
            let tokens = match state.tokens {
                Some(ref current) => {
                    current.refreshed(response.access_token, response.refresh_token)
                }
                // Forgotten while the request was in flight; keep what we spent.
                None => TokenSet::new(
                    response.access_token,
                    response.refresh_token.or(Some(refresh_token)),
                ),
            };
            state.tokens = Some(tokens.clone());
            state.phase = AuthPhase::Authenticated;
            (tokens, self.store_lock.lock().await)
        };
        self.persist(tokens.clone(), store_guard).await;

        Ok(tokens)
    }

    /// Returns the last known access token.
    ///
    /// The token may be stale (phase `NeedsRefresh`); callers find out when
    /// the API rejects it.
    pub async fn current_access_token(&self) -> Result<String, AuthError> {
        self.state
            .read()
            .await
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Records that an API call was rejected with an authorization failure.
    pub async fn mark_expired(&self) {
        let mut state = self.state.write().await;
        if state.phase == AuthPhase::Authenticated {
            debug!("access token rejected, refresh required");
            state.phase = AuthPhase::NeedsRefresh;
        }
    }

    pub async fn phase(&self) -> AuthPhase {
        self.state.read().await.phase
    }

    /// Returns a copy of the current token set, if any.
    pub async fn tokens(&self) -> Option<TokenSet> {
        self.state.read().await.tokens.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.tokens.is_some()
    }

    /// Drops all tokens, in memory and in the store.
    pub async fn forget(&self) -> Result<(), crate::error::StoreError> {
        let _store_guard = {
            let mut state = self.state.write().await;
            state.tokens = None;
            state.phase = AuthPhase::Unauthenticated;
            self.store_lock.lock().await
        };
        self.store.clear()
    }

    async fn persist(&self, tokens: TokenSet, _store_guard: AsyncMutexGuard<'_, ()>) {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&tokens)).await {
            Ok(Ok(())) => debug!("tokens persisted"),
            Ok(Err(e)) => warn!(
                error = %e,
                "failed to persist tokens, they will be lost on restart"
            ),
            Err(e) => warn!(error = %e, "token store write panicked"),
        }
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
