//! Sync engine: poll loop, status publishing, lifecycle control.
//!
//! The [`LifecycleController`] drives one user's sync session:
//!
//! - makes sure an access token is available, running the
//!   [`AuthorizationFlow`] when none is stored
//! - runs the [`SyncLoop`] on a fixed interval
//! - on stop, waits for the in-flight tick and clears the status
//!
//! # Example
//!
//! ```rust,ignore
//! use nowplaying_sync::{LifecycleController, SyncComponents, SyncConfig};
//!
//! let controller = LifecycleController::new(SyncConfig::default(), components);
//! controller.start();
//! signals.shutdown_handle().wait().await;
//! controller.shutdown().await;
//! ```

mod authorize;
mod config;
mod error;
mod lifecycle;
mod pidfile;
mod publisher;
mod signals;
mod sync;

pub use authorize::AuthorizationFlow;
pub use config::{SyncConfig, default_callback_addr};
pub use error::{SyncError, SyncResult};
pub use lifecycle::{LifecycleController, RunState, SyncComponents};
pub use pidfile::{PidFile, default_pid_path};
pub use publisher::StatusPublisher;
pub use signals::{ShutdownHandle, SignalHandler};
pub use sync::{SharedSyncState, SyncLoop, SyncState, TickOutcome, new_sync_state};
