//! Clear command.

use nowplaying_sync::StatusPublisher;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Publishes the empty status once, e.g. after a crash left a stale one.
pub async fn clear(config: &ClientConfig) -> ClientResult<()> {
    let publisher = StatusPublisher::new(super::status_sink(config)?, config.status.format());
    publisher.clear().await?;
    println!("Status cleared.");
    Ok(())
}
