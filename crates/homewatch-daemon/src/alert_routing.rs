//! Alert ledger with severities, acknowledgements and pruning.
//!
//! Pure, testable state machine with no IO. Delivery happens through
//! [`AlertDispatcher`](crate::dispatch::AlertDispatcher) after an entry has
//! been recorded here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use homewatch_core::IntrusionCause;
use homewatch_core::throttle::{INTRUSION_KEY, PRESENCE_KEY, bssid_key, channel_key};

// ─── Alert Severity ──────────────────────────────────────────────

/// Ordered: `Info` < `Warn` < `Escalate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warn,
    Escalate,
}

// ─── Alert Kind ──────────────────────────────────────────────────

/// What the alert is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    /// Someone is home.
    Arrived,
    /// Every presence source lapsed.
    Departed,
    /// A known network or device started reporting again.
    NetworkSeen { source_id: String, bssid: String },
    /// A person stayed in front of a camera past the confirm threshold.
    PersonLingering { channel_id: String },
    /// Motion or power loss while armed.
    Intrusion { cause: IntrusionCause },
    /// An evidence source keeps failing.
    SourceUnhealthy { source_id: String },
}

impl AlertKind {
    /// Throttle key for this alert class.
    pub fn throttle_key(&self) -> String {
        match self {
            AlertKind::Arrived => PRESENCE_KEY.to_string(),
            AlertKind::Departed => format!("{PRESENCE_KEY}:departed"),
            AlertKind::NetworkSeen { bssid, .. } => bssid_key(bssid),
            AlertKind::PersonLingering { channel_id } => channel_key(channel_id),
            AlertKind::Intrusion { .. } => INTRUSION_KEY.to_string(),
            AlertKind::SourceUnhealthy { source_id } => format!("health:{source_id}"),
        }
    }

    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            AlertKind::Arrived | AlertKind::Departed | AlertKind::NetworkSeen { .. } => {
                AlertSeverity::Info
            }
            AlertKind::PersonLingering { .. } | AlertKind::SourceUnhealthy { .. } => {
                AlertSeverity::Warn
            }
            AlertKind::Intrusion { .. } => AlertSeverity::Escalate,
        }
    }
}

// ─── Acknowledgements ────────────────────────────────────────────

/// User response to a raised alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Acknowledgement {
    /// Silence now.
    Stop,
    /// Silence now and hold back this alert class until `until`.
    Snooze { until: DateTime<Utc> },
}

/// How an alert left the unresolved set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Stopped,
    Snoozed,
    /// Condition cleared (disarm, monitoring stopped).
    Cleared,
}

// ─── Alert Entry ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub alert_id: String,
    pub severity: AlertSeverity,
    #[serde(flatten)]
    pub kind: AlertKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
}

impl AlertEntry {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

// ─── Alert Router ────────────────────────────────────────────────

/// Append-only ledger of [`AlertEntry`] records.
#[derive(Debug, Default)]
pub struct AlertRouter {
    ledger: Vec<AlertEntry>,
    next_id: u64,
}

impl AlertRouter {
    pub fn new() -> Self {
        Self {
            ledger: Vec::new(),
            next_id: 1,
        }
    }

    /// Record a new alert at its default severity. Returns the stored entry.
    pub fn emit(&mut self, kind: AlertKind, message: &str, now: DateTime<Utc>) -> AlertEntry {
        let severity = kind.default_severity();
        self.emit_with_severity(kind, severity, message, now)
    }

    pub fn emit_with_severity(
        &mut self,
        kind: AlertKind,
        severity: AlertSeverity,
        message: &str,
        now: DateTime<Utc>,
    ) -> AlertEntry {
        let alert_id = format!("alert-{}", self.next_id.max(1));
        self.next_id = self.next_id.max(1) + 1;

        let entry = AlertEntry {
            alert_id,
            severity,
            kind,
            message: message.to_owned(),
            created_at: now,
            resolved_at: None,
            resolution: None,
        };
        self.ledger.push(entry.clone());
        entry
    }

    /// Resolve an alert by ID. `false` if unknown or already resolved.
    pub fn resolve(&mut self, alert_id: &str, resolution: Resolution, now: DateTime<Utc>) -> bool {
        match self.ledger.iter_mut().find(|e| e.alert_id == alert_id) {
            Some(entry) if !entry.is_resolved() => {
                entry.resolved_at = Some(now);
                entry.resolution = Some(resolution);
                true
            }
            _ => false,
        }
    }

    /// Apply a user acknowledgement. Returns the acknowledged entry.
    pub fn acknowledge(
        &mut self,
        alert_id: &str,
        ack: Acknowledgement,
        now: DateTime<Utc>,
    ) -> Option<AlertEntry> {
        let resolution = match ack {
            Acknowledgement::Stop => Resolution::Stopped,
            Acknowledgement::Snooze { .. } => Resolution::Snoozed,
        };
        if self.resolve(alert_id, resolution, now) {
            self.get(alert_id).cloned()
        } else {
            None
        }
    }

    pub fn unresolved(&self) -> Vec<&AlertEntry> {
        self.ledger.iter().filter(|e| !e.is_resolved()).collect()
    }

    pub fn unresolved_at_severity(&self, min_severity: AlertSeverity) -> Vec<&AlertEntry> {
        self.ledger
            .iter()
            .filter(|e| !e.is_resolved() && e.severity >= min_severity)
            .collect()
    }

    pub fn get(&self, alert_id: &str) -> Option<&AlertEntry> {
        self.ledger.iter().find(|e| e.alert_id == alert_id)
    }

    /// Total entries, resolved or not.
    pub fn ledger_size(&self) -> usize {
        self.ledger.len()
    }

    /// Prune resolved alerts resolved before `before`. Returns the count removed.
    pub fn prune_resolved(&mut self, before: DateTime<Utc>) -> usize {
        let original_len = self.ledger.len();
        self.ledger.retain(|entry| match entry.resolved_at {
            Some(resolved_at) => resolved_at >= before,
            None => true,
        });
        original_len - self.ledger.len()
    }

    /// Drop everything (monitoring stopped).
    pub fn clear(&mut self) {
        self.ledger.clear();
    }
}

// ─── Tests ───────────────────────────────────────────────────────
