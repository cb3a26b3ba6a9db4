//! Sync engine error types.

use std::io;

use nowplaying_providers::{AuthError, ProviderError};
use thiserror::Error;

/// Result type for sync engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while running the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// IO error (PID file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The token lifecycle failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A remote collaborator failed outside of a tick.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Another instance owns the PID file.
    #[error("Already running (PID file exists: {path})")]
    AlreadyRunning { path: String },
}

impl SyncError {
    pub fn already_running(path: impl Into<String>) -> Self {
        Self::AlreadyRunning { path: path.into() }
    }
}
