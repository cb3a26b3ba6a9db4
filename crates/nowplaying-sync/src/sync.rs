//! The poll-and-publish loop.
//!
//! Each tick reads the current access token, asks the activity source what
//! is playing and hands the result to the [`StatusPublisher`]. An
//! authorization failure triggers one refresh and one retry of the fetch;
//! every other failure is logged and left for the next tick.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use nowplaying_core::{Activity, ActivitySnapshot, StatusUpdate};
use nowplaying_providers::{ActivitySource, FetchOutcome, TokenManager};
use tokio::sync::{RwLock, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::publisher::StatusPublisher;

/// Ticks between two `sync summary` log lines.
const SUMMARY_EVERY: u64 = 20;

/// Bookkeeping across ticks.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Ticks run since the controller was created.
    pub ticks: u64,
    /// Ticks in a row that published nothing because of an error.
    pub consecutive_failures: u32,
    /// Last tick that reached the sink.
    pub last_success: Option<DateTime<Utc>>,
    /// Last tick, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Last update the sink accepted.
    pub last_status: Option<StatusUpdate>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, published: Option<StatusUpdate>) {
        self.ticks += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
        if published.is_some() {
            self.last_status = published;
        }
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.ticks += 1;
        self.consecutive_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
    }

    /// Returns the time since the last successful tick.
    pub fn time_since_success(&self) -> Option<Duration> {
        self.last_success.map(|last| {
            let elapsed = Utc::now() - last;
            Duration::from_secs(elapsed.num_seconds().max(0) as u64)
        })
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks={} failures={}",
            self.ticks, self.consecutive_failures
        )?;
        match self.last_success {
            Some(at) => write!(
                f,
                " last_success={}",
                at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?,
            None => f.write_str(" last_success=never")?,
        }
        if let Some(error) = &self.last_error {
            write!(f, " last_error=\"{}\"", error)?;
        }
        Ok(())
    }
}

/// Shared sync state.
pub type SharedSyncState = Arc<RwLock<SyncState>>;

pub fn new_sync_state() -> SharedSyncState {
    Arc::new(RwLock::new(SyncState::new()))
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The update was sent to the sink.
    Published(StatusUpdate),
    /// Nothing was published; the reason was logged.
    Skipped(String),
}

/// Periodic activity-to-status synchronization.
pub struct SyncLoop {
    tokens: Arc<TokenManager>,
    source: Arc<dyn ActivitySource>,
    publisher: Arc<StatusPublisher>,
    state: SharedSyncState,
}

impl SyncLoop {
    pub fn new(
        tokens: Arc<TokenManager>,
        source: Arc<dyn ActivitySource>,
        publisher: Arc<StatusPublisher>,
        state: SharedSyncState,
    ) -> Self {
        Self {
            tokens,
            source,
            publisher,
            state,
        }
    }

    pub fn state(&self) -> SharedSyncState {
        self.state.clone()
    }

    /// Ticks every `interval`, starting right away, until `cancel` turns
    /// true or its sender goes away.
    ///
    /// Cancellation is only observed between ticks: a tick in flight always
    /// runs to completion.
    pub async fn run(&self, interval: Duration, mut cancel: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            source = self.source.name(),
            "sync loop started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    debug!(?outcome, "tick finished");
                    let state = self.state.read().await;
                    if state.ticks % SUMMARY_EVERY == 0 {
                        info!(summary = %*state, "sync summary");
                    }
                }
            }
        }

        let state = self.state.read().await;
        info!(summary = %*state, "sync loop stopped");
    }

    /// Runs one poll-and-publish cycle.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = match self.poll().await {
            Ok(activity) => self.publish(&activity).await,
            Err(reason) => Err(reason),
        };

        let mut state = self.state.write().await;
        match outcome {
            Ok(update) => {
                if state.consecutive_failures > 0 {
                    info!(
                        failures = state.consecutive_failures,
                        "sync recovered"
                    );
                }
                state.record_success(Some(update.clone()));
                TickOutcome::Published(update)
            }
            Err(reason) => {
                warn!(
                    error = %reason,
                    failures = state.consecutive_failures + 1,
                    since_success_secs = ?state.time_since_success().map(|d| d.as_secs()),
                    "tick skipped"
                );
                state.record_failure(reason.clone());
                TickOutcome::Skipped(reason)
            }
        }
    }

    async fn poll(&self) -> Result<Activity, String> {
        let access_token = self
            .tokens
            .current_access_token()
            .await
            .map_err(|e| e.to_string())?;

        let outcome = match self.source.fetch_current(&access_token).await {
            FetchOutcome::AuthExpired => {
                info!("access token expired, refreshing");
                self.tokens.mark_expired().await;
                let refreshed = self
                    .tokens
                    .refresh()
                    .await
                    .map_err(|e| format!("token refresh failed: {}", e))?;
                self.source.fetch_current(&refreshed.access_token).await
            }
            other => other,
        };

        match outcome {
            FetchOutcome::Active(track) => Ok(Activity::Active(track)),
            FetchOutcome::Idle => Ok(Activity::Idle),
            FetchOutcome::AuthExpired => {
                self.tokens.mark_expired().await;
                Err("access token rejected right after refresh".to_string())
            }
            FetchOutcome::Transient(e) => Err(e.to_string()),
        }
    }

    async fn publish(&self, activity: &Activity) -> Result<StatusUpdate, String> {
        let snapshot = ActivitySnapshot::from(activity);
        self.publisher
            .publish_snapshot(&snapshot)
            .await
            .map_err(|e| format!("publish failed: {}", e))
    }
}

/// Resolves once `rx` reads true or its sender is dropped.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
