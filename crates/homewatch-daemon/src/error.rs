//! Error types for the monitoring layer.

use homewatch_core::DetectError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// A second detector was requested for an entity that already has one.
    #[error("{0} is already being monitored")]
    AlreadyMonitored(String),

    #[error("unknown or already resolved alert: {0}")]
    UnknownAlert(String),
}
