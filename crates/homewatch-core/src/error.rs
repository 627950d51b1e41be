//! Error types for the detection engines.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectError {
    /// Invalid construction parameters. Fatal: the engine is never built.
    #[error("invalid configuration: {field} {reason}")]
    Configuration { field: &'static str, reason: String },

    /// A sample timestamp went backwards for the same instance.
    #[error("out-of-order evidence for {entity}: {observed_at} is earlier than {last_seen_at}")]
    OutOfOrderEvidence {
        entity: String,
        observed_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
    },

    /// The evidence source failed for a single tick.
    #[error("transient source failure on {source_id}: {detail}")]
    TransientSource { source_id: String, detail: String },
}

impl DetectError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        DetectError::Configuration {
            field,
            reason: reason.into(),
        }
    }
}
