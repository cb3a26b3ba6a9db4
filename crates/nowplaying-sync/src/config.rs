//! Sync engine configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use nowplaying_core::StatusFormat;
use nowplaying_providers::DEFAULT_CALLBACK_PORT;

/// Timing and addressing for one [`LifecycleController`](crate::LifecycleController).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period between ticks.
    pub interval: Duration,

    /// How long to wait for the user to finish the consent screen.
    pub authorization_timeout: Duration,

    /// Upper bound on the status clear sent while stopping.
    pub clear_timeout: Duration,

    /// Upper bound on `shutdown` waiting for the controller to stop.
    pub shutdown_timeout: Duration,

    /// Where the OAuth callback listener binds.
    pub callback_addr: SocketAddr,

    /// How snapshots are rendered for the status sink.
    pub status_format: StatusFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            authorization_timeout: Duration::from_secs(300),
            clear_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            callback_addr: default_callback_addr(),
            status_format: StatusFormat::default(),
        }
    }
}

impl SyncConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    pub fn with_clear_timeout(mut self, timeout: Duration) -> Self {
        self.clear_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_callback_addr(mut self, addr: SocketAddr) -> Self {
        self.callback_addr = addr;
        self
    }

    pub fn with_status_format(mut self, format: StatusFormat) -> Self {
        self.status_format = format;
        self
    }
}

/// `127.0.0.1:3000`, the loopback address registered as redirect URI.
pub fn default_callback_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CALLBACK_PORT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.authorization_timeout, Duration::from_secs(300));
        assert_eq!(config.clear_timeout, Duration::from_secs(5));
        assert_eq!(config.callback_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.status_format.icon, ":headphones:");
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new(Duration::from_secs(30))
            .with_clear_timeout(Duration::from_secs(1))
            .with_callback_addr("127.0.0.1:0".parse().unwrap());
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.clear_timeout, Duration::from_secs(1));
        assert_eq!(config.callback_addr.port(), 0);
    }
}
