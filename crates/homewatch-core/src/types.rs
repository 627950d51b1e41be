//! Shared evidence types.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

// ─── Source Kind ─────────────────────────────────────────────────────

/// Family of an evidence producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Wifi,
    Bluetooth,
    Camera,
    Accelerometer,
    Power,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Wifi => "wifi",
            SourceKind::Bluetooth => "bluetooth",
            SourceKind::Camera => "camera",
            SourceKind::Accelerometer => "accelerometer",
            SourceKind::Power => "power",
        }
    }

    /// Network-presence sources feed fusion; the rest feed confirmers.
    pub fn is_network(self) -> bool {
        matches!(self, SourceKind::Wifi | SourceKind::Bluetooth)
    }
}

// ─── Evidence Sample ─────────────────────────────────────────────────

/// One judgment from one source at one instant. Consumed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSample {
    pub source_id: String,
    pub present: bool,
    pub observed_at: DateTime<Utc>,
    /// Free-form details (SSID, device name, classifier label).
    #[serde(default)]
    pub metadata: String,
}

impl EvidenceSample {
    pub fn new(source_id: impl Into<String>, present: bool, observed_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            present,
            observed_at,
            metadata: String::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }
}

// ─── Duration helpers ────────────────────────────────────────────────

/// Convert a configured millisecond count into a `TimeDelta`.
pub(crate) fn millis(field: &'static str, ms: u64) -> Result<TimeDelta, DetectError> {
    let ms = i64::try_from(ms).map_err(|_| DetectError::config(field, "is out of range"))?;
    TimeDelta::try_milliseconds(ms).ok_or_else(|| DetectError::config(field, "is out of range"))
}

/// Same as [`millis`] but rejects zero.
pub(crate) fn positive_millis(field: &'static str, ms: u64) -> Result<TimeDelta, DetectError> {
    if ms == 0 {
        return Err(DetectError::config(field, "must be greater than zero"));
    }
    millis(field, ms)
}

/// Render a duration as `1.5s` / `250ms` for diagnostics.
pub fn format_age(age: TimeDelta) -> String {
    let ms = age.num_milliseconds();
    if ms.abs() >= 1000 {
        let whole = ms / 1000;
        let tenths = (ms % 1000).abs() / 100;
        format!("{whole}.{tenths}s")
    } else {
        format!("{ms}ms")
    }
}
