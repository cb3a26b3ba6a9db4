//! Core types: activity snapshots, status formatting, tracing setup

pub mod activity;
pub mod tracing;

pub use activity::{
    Activity, ActivitySnapshot, DEFAULT_ICON, DEFAULT_MAX_LENGTH, StatusFormat, StatusUpdate,
    Track, ellipsis,
};
pub use tracing::{LogFormat, TracingConfig, TracingError, init_tracing};
