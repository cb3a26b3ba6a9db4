//! OAuth token lifecycle and the remote collaborators of the sync engine.
//!
//! ```text
//!  browser ──▶ CallbackReceiver ──code──▶ TokenManager ◀──▶ TokenStore
//!                                             │
//!                                    access token
//!                                             ▼
//!                                      ActivitySource ──▶ StatusSink
//! ```
//!
//! - [`TokenManager`] owns the token state machine and talks to a
//!   [`TokenEndpoint`] ([`OAuthClient`] over HTTPS).
//! - [`TokenStore`] persists tokens ([`FileTokenStore`], [`MemoryTokenStore`]).
//! - [`CallbackReceiver`] captures the authorization code from the provider
//!   redirect; an [`AuthorizationCompleter`] gets the user there.
//! - [`ActivitySource`] and [`StatusSink`] are the read and write ends of a
//!   sync tick ([`SpotifyActivitySource`], [`SlackStatusSink`]).

use std::future::Future;
use std::pin::Pin;

pub mod activity;
pub mod callback;
pub mod completer;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod status;
pub mod tokens;

/// A boxed future, used to keep the provider traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use activity::{
    ActivitySource, FetchOutcome, SPOTIFY_CURRENTLY_PLAYING_URL, SpotifyActivitySource,
    parse_currently_playing,
};
pub use callback::{CallbackReceiver, DEFAULT_CALLBACK_PORT};
pub use completer::{AuthorizationCompleter, BrowserCompleter, PrintCompleter};
pub use error::{AuthError, ProviderError, ProviderErrorCode, ProviderResult, StoreError};
pub use manager::{AuthPhase, TokenManager};
pub use oauth::{
    AuthorizationCode, AuthorizationRequest, OAuthClient, OAuthCredentials, OAuthEndpoints,
    SPOTIFY_AUTHORIZE_URL, SPOTIFY_DEFAULT_SCOPE, SPOTIFY_TOKEN_URL, TokenEndpoint, TokenResponse,
};
pub use status::{SLACK_PROFILE_SET_URL, SlackStatusSink, StatusSink, parse_slack_response};
pub use tokens::{FileTokenStore, MemoryTokenStore, TokenSet, TokenStore};
