//! Subcommand implementations and the wiring they share.

pub mod auth;
pub mod clear;
pub mod config;
pub mod run;
pub mod tokens;

use std::sync::Arc;

use nowplaying_providers::{
    AuthorizationCompleter, BrowserCompleter, FileTokenStore, OAuthClient, PrintCompleter,
    SlackStatusSink, SpotifyActivitySource, TokenManager,
};
use nowplaying_sync::{AuthorizationFlow, LifecycleController, SyncComponents};

use crate::config::ClientConfig;
use crate::error::ClientResult;

pub(crate) fn token_store(config: &ClientConfig) -> Arc<FileTokenStore> {
    Arc::new(FileTokenStore::new(config.token_dir()))
}

pub(crate) fn token_manager(config: &ClientConfig) -> ClientResult<Arc<TokenManager>> {
    let client = OAuthClient::new(
        config.oauth.resolve_credentials()?,
        config.oauth.endpoints(),
        config.sync.request_timeout(),
    )?;
    Ok(Arc::new(TokenManager::new(
        Arc::new(client),
        token_store(config),
    )))
}

pub(crate) fn authorization_flow(
    config: &ClientConfig,
    no_browser: bool,
) -> ClientResult<AuthorizationFlow> {
    let completer: Arc<dyn AuthorizationCompleter> = if no_browser {
        Arc::new(PrintCompleter)
    } else {
        Arc::new(BrowserCompleter)
    };

    Ok(AuthorizationFlow::new(
        config.oauth.resolve_credentials()?,
        config.oauth.endpoints(),
        completer,
    )
    .with_callback_addr(config.oauth.callback_addr())
    .with_timeout(config.sync.authorization_timeout()))
}

pub(crate) fn status_sink(config: &ClientConfig) -> ClientResult<Arc<SlackStatusSink>> {
    Ok(Arc::new(SlackStatusSink::with_url(
        config.status.resolve_token()?,
        config.status.api_url.clone(),
        config.sync.request_timeout(),
    )?))
}

/// Builds a controller from a validated configuration.
pub(crate) fn controller(
    config: &ClientConfig,
    no_browser: bool,
) -> ClientResult<LifecycleController> {
    let source = SpotifyActivitySource::with_url(
        config.activity.api_url.clone(),
        config.sync.request_timeout(),
    )?;

    Ok(LifecycleController::new(
        config.sync_config(),
        SyncComponents {
            tokens: token_manager(config)?,
            source: Arc::new(source),
            sink: status_sink(config)?,
            authorization: authorization_flow(config, no_browser)?,
        },
    ))
}
