//! JSON-lines evidence input.
//!
//! One record per line, tagged by `type`:
//!
//! ```text
//! {"type":"scan","source_id":"wifi","kind":"wifi","bssid":"aa:bb:cc:dd:ee:ff","details":"HomeAP","at_ms":1700000000000}
//! {"type":"frame","channel_id":"front","person":true,"snapshot":{"path":"/tmp/f.jpg"}}
//! {"type":"frame_error","channel_id":"front","detail":"decode failed"}
//! {"type":"sensor","x":0.1,"y":0.0,"z":9.8}
//! {"type":"power_disconnected"}
//! {"type":"arm"} / {"type":"disarm"}
//! {"type":"stop_source","source_id":"wifi"}
//! {"type":"ack","alert_id":"alert-3","snooze_until_ms":1700000600000}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use homewatch_core::{EvidenceSample, EvidenceSink, SourceKind};
use homewatch_daemon::{Acknowledgement, EvidenceSnapshot, Monitor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputLine {
    /// Epoch milliseconds. Replay requires it; the daemon uses wall-clock
    /// time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_ms: Option<i64>,
    #[serde(flatten)]
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Scan {
        source_id: String,
        #[serde(default = "default_scan_kind")]
        kind: SourceKind,
        #[serde(default = "default_present")]
        present: bool,
        #[serde(default)]
        bssid: Option<String>,
        #[serde(default)]
        details: String,
    },
    Frame {
        channel_id: String,
        person: bool,
        #[serde(default)]
        snapshot: Option<SnapshotRef>,
    },
    FrameError {
        channel_id: String,
        detail: String,
    },
    Sensor {
        x: f64,
        y: f64,
        z: f64,
    },
    PowerDisconnected,
    Arm,
    Disarm,
    StopSource {
        source_id: String,
    },
    Ack {
        alert_id: String,
        /// Present: snooze until then. Absent: stop.
        #[serde(default)]
        snooze_until_ms: Option<i64>,
    },
}

fn default_scan_kind() -> SourceKind {
    SourceKind::Wifi
}

fn default_present() -> bool {
    true
}

fn default_content_type() -> String {
    "image/jpeg".to_string()
}

/// Image file captured with a frame verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub path: PathBuf,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl SnapshotRef {
    /// Read the image. A missing file only loses the snapshot, not the
    /// verdict.
    pub fn load(&self, captured_at: DateTime<Utc>) -> Option<EvidenceSnapshot> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Some(EvidenceSnapshot {
                captured_at,
                content_type: self.content_type.clone(),
                bytes,
            }),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "snapshot unreadable: {e}");
                None
            }
        }
    }
}

/// Parse one line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<InputLine>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

pub fn from_epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

impl InputLine {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.at_ms.and_then(from_epoch_ms)
    }
}

/// Stop, or snooze until the given epoch milliseconds.
pub fn acknowledgement(snooze_until_ms: Option<i64>) -> Option<Acknowledgement> {
    match snooze_until_ms {
        None => Some(Acknowledgement::Stop),
        Some(ms) => from_epoch_ms(ms).map(|until| Acknowledgement::Snooze { until }),
    }
}

/// Apply a scan record to presence fusion. Network sources with a BSSID
/// alert when they reappear; everything else goes through the sink.
pub fn apply_scan(
    monitor: &Monitor,
    source_id: &str,
    kind: SourceKind,
    present: bool,
    bssid: Option<&str>,
    details: &str,
    now: DateTime<Utc>,
) {
    match bssid {
        Some(bssid) if present && kind.is_network() => {
            monitor.report_network(source_id, bssid, now, details);
        }
        _ => {
            monitor.push(EvidenceSample::new(source_id, present, now).with_metadata(details));
        }
    }
}
