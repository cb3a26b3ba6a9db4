//! Pushing rendered snapshots to the status sink.

use std::sync::Arc;

use nowplaying_core::{ActivitySnapshot, StatusFormat, StatusUpdate};
use nowplaying_providers::{ProviderResult, StatusSink};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Adapter between snapshots and a [`StatusSink`].
///
/// Every call reaches the sink, so a status edited or expired on the
/// remote side is restored on the next tick.
pub struct StatusPublisher {
    sink: Arc<dyn StatusSink>,
    format: StatusFormat,
    last: Mutex<Option<StatusUpdate>>,
}

impl StatusPublisher {
    pub fn new(sink: Arc<dyn StatusSink>, format: StatusFormat) -> Self {
        Self {
            sink,
            format,
            last: Mutex::new(None),
        }
    }

    pub fn format(&self) -> &StatusFormat {
        &self.format
    }

    /// Renders `snapshot` and publishes it.
    pub async fn publish_snapshot(
        &self,
        snapshot: &ActivitySnapshot,
    ) -> ProviderResult<StatusUpdate> {
        self.publish(self.format.render(snapshot)).await
    }

    /// Sends `update` to the sink and returns it once accepted.
    pub async fn publish(&self, update: StatusUpdate) -> ProviderResult<StatusUpdate> {
        let mut last = self.last.lock().await;
        match self.sink.publish(&update.text, &update.icon).await {
            Ok(()) => {
                if update.is_clear() {
                    info!(sink = self.sink.name(), "status cleared");
                } else {
                    info!(sink = self.sink.name(), text = %update.text, "status published");
                }
                *last = Some(update.clone());
                Ok(update)
            }
            Err(e) => {
                debug!(sink = self.sink.name(), error = %e, "sink rejected status");
                *last = None;
                Err(e)
            }
        }
    }

    /// Clears the status.
    pub async fn clear(&self) -> ProviderResult<()> {
        self.publish(StatusUpdate::clear()).await.map(|_| ())
    }

    /// The last update the sink accepted, if the most recent call succeeded.
    pub async fn last_published(&self) -> Option<StatusUpdate> {
        self.last.lock().await.clone()
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("sink", &self.sink.name())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
