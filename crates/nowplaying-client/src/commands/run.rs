//! Run command: syncs the status in the foreground until interrupted.

use nowplaying_sync::{
    LifecycleController, PidFile, RunState, ShutdownHandle, SignalHandler, default_pid_path,
};
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Blocks until SIGINT/SIGTERM, or until the engine gives up on its own
/// (for example when authorization fails).
pub async fn run(config: &ClientConfig, no_browser: bool) -> ClientResult<()> {
    config.validate()?;
    let controller = super::controller(config, no_browser)?;

    let _pid_file = PidFile::create(default_pid_path())?;

    let signals = SignalHandler::new();
    signals.spawn_listener();

    info!(
        interval_secs = config.sync.interval_secs,
        token_dir = %config.token_dir().display(),
        "starting sync"
    );
    supervise(&controller, signals.shutdown_handle()).await
}

async fn supervise(
    controller: &LifecycleController,
    shutdown: ShutdownHandle,
) -> ClientResult<()> {
    let mut states = controller.subscribe();
    controller.start();
    let stopped = async move {
        let _ = states.wait_for(|state| *state == RunState::Stopped).await;
    };

    tokio::select! {
        _ = shutdown.wait() => {
            info!("shutting down");
            controller.shutdown().await;
            Ok(())
        }
        () = stopped => {
            controller.shutdown().await;
            match controller.last_error() {
                Some(reason) => Err(ClientError::Stopped(reason)),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use nowplaying_core::Track;
    use nowplaying_providers::{
        ActivitySource, AuthError, AuthorizationCompleter, BoxFuture, FetchOutcome,
        MemoryTokenStore, OAuthCredentials, OAuthEndpoints, ProviderResult, StatusSink,
        TokenEndpoint, TokenManager, TokenResponse, TokenSet,
    };
    use nowplaying_sync::{AuthorizationFlow, SyncComponents, SyncConfig};

    struct NoEndpoint;

    impl TokenEndpoint for NoEndpoint {
        fn exchange_code<'a>(
            &'a self,
            _code: &'a str,
        ) -> BoxFuture<'a, Result<TokenResponse, AuthError>> {
            Box::pin(async { Err(AuthError::rejected(400, "invalid_grant")) })
        }

        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> BoxFuture<'a, Result<TokenResponse, AuthError>> {
            Box::pin(async { Err(AuthError::rejected(400, "invalid_grant")) })
        }
    }

    struct Playing;

    impl ActivitySource for Playing {
        fn name(&self) -> &str {
            "playing"
        }

        fn fetch_current<'a>(&'a self, _access_token: &'a str) -> BoxFuture<'a, FetchOutcome> {
            Box::pin(async {
                FetchOutcome::Active(Track::new(
                    "Song A",
                    ["Artist B"],
                    Some("2020".to_string()),
                ))
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl StatusSink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn publish<'a>(
            &'a self,
            text: &'a str,
            _icon: &'a str,
        ) -> BoxFuture<'a, ProviderResult<()>> {
            self.0.lock().unwrap().push(text.to_string());
            Box::pin(async { Ok(()) })
        }
    }

    /// Never opens anything, so authorization can only time out.
    struct Idle;

    impl AuthorizationCompleter for Idle {
        fn complete<'a>(&'a self, _login_url: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn controller(store: MemoryTokenStore, sink: Arc<Recorder>) -> LifecycleController {
        let addr = "127.0.0.1:0".parse().unwrap();
        LifecycleController::new(
            SyncConfig::new(Duration::from_secs(3600)).with_callback_addr(addr),
            SyncComponents {
                tokens: Arc::new(TokenManager::new(Arc::new(NoEndpoint), Arc::new(store))),
                source: Arc::new(Playing),
                sink,
                authorization: AuthorizationFlow::new(
                    OAuthCredentials::new("id", "secret"),
                    OAuthEndpoints::spotify("http://127.0.0.1:3000/callback"),
                    Arc::new(Idle),
                )
                .with_callback_addr(addr)
                .with_timeout(Duration::from_millis(50)),
            },
        )
    }

    #[tokio::test]
    async fn shutdown_signal_clears_status() {
        let sink = Arc::new(Recorder::default());
        let store = MemoryTokenStore::with_tokens(TokenSet::new("AT1", None));
        let controller = controller(store, sink.clone());
        let signals = SignalHandler::new();
        let handle = signals.shutdown_handle();

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.trigger();
        });

        let supervised = supervise(&controller, signals.shutdown_handle());
        tokio::time::timeout(Duration::from_secs(5), supervised)
            .await
            .unwrap()
            .unwrap();
        trigger.await.unwrap();

        assert_eq!(controller.run_state(), RunState::Stopped);
        let published = sink.0.lock().unwrap().clone();
        assert_eq!(
            published.first().map(String::as_str),
            Some("Song A by Artist B - 2020")
        );
        assert_eq!(published.last().map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn authorization_failure_is_reported() {
        let sink = Arc::new(Recorder::default());
        let controller = controller(MemoryTokenStore::new(), sink.clone());
        let signals = SignalHandler::new();

        let supervised = supervise(&controller, signals.shutdown_handle());
        let err = tokio::time::timeout(Duration::from_secs(5), supervised)
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ClientError::Stopped(_)));
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
