//! Dispatcher that logs every alert and writes it as a JSON line.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use homewatch_core::{IntrusionEvent, PresenceSnapshot};
use homewatch_daemon::{AlertDispatcher, AlertEntry, ChannelConfirmation};

/// One output line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DispatchRecord<'a> {
    Alert {
        alert: &'a AlertEntry,
    },
    Presence {
        alert: &'a AlertEntry,
        present: bool,
        since: DateTime<Utc>,
        description: &'a str,
    },
    Intrusion {
        alert: &'a AlertEntry,
        intrusion: &'a IntrusionEvent,
    },
    Silence {
        alert_id: &'a str,
    },
}

pub struct LogDispatcher {
    out: Mutex<Box<dyn Write + Send>>,
}

impl LogDispatcher {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn write(&self, record: &DispatchRecord<'_>) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("failed to serialize dispatch record: {e}");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!("dispatch output failed: {e}");
        }
    }
}

impl AlertDispatcher for LogDispatcher {
    fn raise_alert(&self, alert: &AlertEntry) {
        tracing::info!(alert_id = %alert.alert_id, severity = ?alert.severity, "{}", alert.message);
        self.write(&DispatchRecord::Alert { alert });
    }

    fn raise_confirmed_presence(
        &self,
        alert: &AlertEntry,
        snapshot: &PresenceSnapshot,
        description: &str,
    ) {
        tracing::info!(alert_id = %alert.alert_id, present = snapshot.present, "{}", alert.message);
        self.write(&DispatchRecord::Presence {
            alert,
            present: snapshot.present,
            since: snapshot.since,
            description,
        });
    }

    fn raise_confirmed_intrusion(&self, alert: &AlertEntry, event: &IntrusionEvent) {
        tracing::warn!(alert_id = %alert.alert_id, "{}", alert.message);
        self.write(&DispatchRecord::Intrusion {
            alert,
            intrusion: event,
        });
    }

    fn silence(&self, alert_id: &str) {
        tracing::info!(alert_id, "alert silenced");
        self.write(&DispatchRecord::Silence { alert_id });
    }
}

/// `on_confirmed` consumer used by both the daemon and replay. The snapshot
/// is dropped here; a recorder would take ownership of the bytes instead.
pub fn log_confirmation(confirmation: ChannelConfirmation) {
    tracing::info!(
        channel_id = %confirmation.channel_id,
        accumulated_ms = confirmation.event.accumulated_ms,
        snapshot_bytes = confirmation.snapshot.as_ref().map_or(0, |s| s.bytes.len()),
        throttled = confirmation.alert.is_none(),
        "person confirmed"
    );
}
