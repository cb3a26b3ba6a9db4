//! Client error types.

use std::io;

use nowplaying_providers::{AuthError, ProviderError, StoreError};
use nowplaying_sync::SyncError;
use thiserror::Error;

use crate::secret::SecretError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that end a CLI invocation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration file is missing something or could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to resolve {field}: {source}")]
    Secret {
        field: &'static str,
        #[source]
        source: SecretError,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The sync engine stopped without being asked to.
    #[error("sync stopped: {0}")]
    Stopped(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn secret(field: &'static str, source: SecretError) -> Self {
        Self::Secret { field, source }
    }
}
