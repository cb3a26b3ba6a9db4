//! Start/stop orchestration.
//!
//! ```text
//!            start()                 tokens ready
//! Stopped ───────────▶ Starting ─────────────────▶ Running
//!  ▲  ▲                   │                           │
//!  │  └── auth failure ───┤ stop()                    │ stop()
//!  │                      ▼                           │
//!  └── status cleared ─ Stopping ◀────────────────────┘
//! ```
//!
//! One background task (the session) runs per start: it makes sure tokens
//! are available, then runs the [`SyncLoop`] until cancelled. Waiting for
//! consent can be cancelled; exchanging a received code cannot. Stopping
//! cancels the session, waits for it, clears the status and only then
//! reports `Stopped`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use nowplaying_providers::{ActivitySource, AuthorizationCode, StatusSink, TokenManager};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::authorize::AuthorizationFlow;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::publisher::StatusPublisher;
use crate::sync::{SharedSyncState, SyncLoop, SyncState, cancelled, new_sync_state};

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Stopped,
    /// Acquiring tokens, possibly waiting on the user.
    Starting,
    Running,
    /// Tearing down; `Stopped` follows.
    Stopping,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The collaborators a controller drives.
pub struct SyncComponents {
    pub tokens: Arc<TokenManager>,
    pub source: Arc<dyn ActivitySource>,
    pub sink: Arc<dyn StatusSink>,
    pub authorization: AuthorizationFlow,
}

#[derive(Default)]
struct Session {
    cancel_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    config: SyncConfig,
    tokens: Arc<TokenManager>,
    source: Arc<dyn ActivitySource>,
    publisher: Arc<StatusPublisher>,
    authorization: AuthorizationFlow,
    sync_state: SharedSyncState,
    state_tx: watch::Sender<RunState>,
    /// Held only while a transition is decided and recorded.
    session: Mutex<Session>,
    last_error: Mutex<Option<String>>,
}

/// Owns the background sync session and its [`RunState`].
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    pub fn new(config: SyncConfig, components: SyncComponents) -> Self {
        let publisher = Arc::new(StatusPublisher::new(
            components.sink,
            config.status_format.clone(),
        ));
        let (state_tx, _) = watch::channel(RunState::Stopped);

        Self {
            inner: Arc::new(Inner {
                config,
                tokens: components.tokens,
                source: components.source,
                publisher,
                authorization: components.authorization,
                sync_state: new_sync_state(),
                state_tx,
                session: Mutex::new(Session::default()),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.inner.state_tx.borrow()
    }

    /// Watches [`RunState`] changes.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    pub async fn sync_state(&self) -> SyncState {
        self.inner.sync_state.read().await.clone()
    }

    /// Why the last session ended on its own, if it did.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts a session. Does nothing unless `Stopped`.
    ///
    /// Returns once the transition to `Starting` is recorded; token
    /// acquisition and syncing happen on a background task. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut session = self.inner.lock_session();
        let current = self.run_state();
        if current != RunState::Stopped {
            debug!(state = %current, "start ignored");
            return false;
        }

        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.transition(RunState::Starting);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        session.cancel_tx = Some(cancel_tx);
        session.task = Some(tokio::spawn(async move {
            inner.run_session(cancel_rx).await;
        }));
        true
    }

    /// Stops the session. Does nothing when `Stopped` or `Stopping`.
    ///
    /// Returns once the transition to `Stopping` is recorded. The teardown
    /// (cancel, wait for the in-flight tick, clear the status) runs in the
    /// background and ends in `Stopped`.
    pub fn stop(&self) -> bool {
        let mut session = self.inner.lock_session();
        let current = self.run_state();
        if matches!(current, RunState::Stopped | RunState::Stopping) {
            debug!(state = %current, "stop ignored");
            return false;
        }

        self.inner.transition(RunState::Stopping);
        let cancel_tx = session.cancel_tx.take();
        let task = session.task.take();
        drop(session);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.teardown(cancel_tx, task).await;
        });
        true
    }

    /// Stops and waits (bounded) for `Stopped`.
    pub async fn shutdown(&self) {
        self.stop();

        let mut rx = self.subscribe();
        let stopped = tokio::time::timeout(
            self.inner.config.shutdown_timeout,
            rx.wait_for(|state| *state == RunState::Stopped),
        )
        .await
        .map(|r| r.is_ok());

        match stopped {
            Ok(true) => info!("shutdown complete"),
            Ok(false) => warn!("controller went away during shutdown"),
            Err(_) => warn!(
                timeout_secs = self.inner.config.shutdown_timeout.as_secs(),
                "timed out waiting for the sync engine to stop"
            ),
        }
    }

    /// Waits until the controller reaches `state`.
    pub async fn wait_for(&self, state: RunState) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Runs the authorization flow outside of a session.
    pub async fn authorize(&self) -> SyncResult<()> {
        self.inner
            .authorization
            .run(&self.inner.tokens)
            .await
            .map(|_| ())
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.run_state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a transition. Callers hold the session lock.
    fn transition(&self, to: RunState) {
        let from = self.state_tx.send_replace(to);
        info!(from = %from, to = %to, "run state changed");
    }

    async fn run_session(self: Arc<Self>, mut cancel_rx: watch::Receiver<bool>) {
        let pending = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => {
                debug!("session cancelled before tokens were ready");
                return;
            }
            pending = self.pending_code() => pending,
        };

        // A received code is single use: the exchange runs to completion
        // even when a stop arrives meanwhile.
        let ready = match pending {
            Ok(Some(code)) => self
                .tokens
                .exchange(code)
                .await
                .map(|_| ())
                .map_err(SyncError::from),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = ready {
            error!(error = %e, "could not obtain tokens, stopping");
            let mut session = self.lock_session();
            if *self.state_tx.borrow() == RunState::Starting {
                *self
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                session.cancel_tx = None;
                session.task = None;
                self.transition(RunState::Stopped);
            }
            return;
        }

        {
            let _session = self.lock_session();
            if *self.state_tx.borrow() != RunState::Starting {
                return;
            }
            self.transition(RunState::Running);
        }

        let sync_loop = SyncLoop::new(
            Arc::clone(&self.tokens),
            Arc::clone(&self.source),
            Arc::clone(&self.publisher),
            Arc::clone(&self.sync_state),
        );
        sync_loop.run(self.config.interval, cancel_rx).await;
    }

    /// Returns a code to exchange, or `None` when tokens are already usable.
    async fn pending_code(&self) -> SyncResult<Option<AuthorizationCode>> {
        if self.tokens.is_authenticated().await {
            debug!("tokens already in memory");
            return Ok(None);
        }
        if self.tokens.load_persisted().await {
            return Ok(None);
        }
        info!("no stored tokens, starting authorization");
        self.authorization.receive_code().await.map(Some)
    }

    async fn teardown(
        self: Arc<Self>,
        cancel_tx: Option<watch::Sender<bool>>,
        task: Option<JoinHandle<()>>,
    ) {
        if let Some(tx) = cancel_tx {
            let _ = tx.send(true);
        }
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "sync session ended abnormally");
        }

        match tokio::time::timeout(self.config.clear_timeout, self.publisher.clear()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to clear status"),
            Err(_) => warn!(
                timeout_secs = self.config.clear_timeout.as_secs(),
                "timed out clearing status"
            ),
        }

        let _session = self.lock_session();
        self.transition(RunState::Stopped);
    }
}
