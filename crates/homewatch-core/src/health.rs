//! Evidence source health finite state machine.
//!
//! Tracks transient read failures per source. Purely diagnostic: a failing
//! source is fed to its confirmer as absence, health never gates
//! confirmation. [`transition_health`] is the single entry point for all
//! state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealthState {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Recovering,
}

/// Outcome of one read from an evidence source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceReading {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHealth {
    pub state: SourceHealthState,
    pub reason: String,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl SourceHealth {
    #[must_use]
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            state: SourceHealthState::Unknown,
            reason: "no readings yet".to_string(),
            checked_at: now,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == SourceHealthState::Healthy
    }
}

/// Thresholds for health transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    /// Consecutive failures before Unhealthy.
    pub failure_threshold: u32,
    /// Consecutive successes before an Unhealthy source is Healthy again.
    pub recovery_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Pure state machine: next health given one reading.
///
/// `None` for `previous` is treated as [`SourceHealthState::Unknown`].
#[must_use]
pub fn transition_health(
    previous: Option<&SourceHealth>,
    reading: SourceReading,
    policy: &HealthPolicy,
    now: DateTime<Utc>,
) -> SourceHealth {
    let previous = previous
        .cloned()
        .unwrap_or_else(|| SourceHealth::unknown(now));

    // Thresholds of zero would promote or demote on nothing.
    let failure_threshold = policy.failure_threshold.max(1);
    let recovery_threshold = policy.recovery_threshold.max(1);

    match reading {
        SourceReading::Ok => {
            let consecutive_successes = previous.consecutive_successes.saturating_add(1);
            let state = match previous.state {
                SourceHealthState::Unhealthy | SourceHealthState::Recovering => {
                    if consecutive_successes >= recovery_threshold {
                        SourceHealthState::Healthy
                    } else {
                        SourceHealthState::Recovering
                    }
                }
                _ => SourceHealthState::Healthy,
            };
            let reason = if state == SourceHealthState::Recovering {
                format!("recovering ({consecutive_successes}/{recovery_threshold})")
            } else {
                "reading ok".to_string()
            };
            SourceHealth {
                state,
                reason,
                checked_at: now,
                consecutive_failures: 0,
                consecutive_successes,
            }
        }
        SourceReading::Failed => {
            let consecutive_failures = previous.consecutive_failures.saturating_add(1);
            let state = if consecutive_failures >= failure_threshold {
                SourceHealthState::Unhealthy
            } else {
                SourceHealthState::Degraded
            };
            SourceHealth {
                state,
                reason: format!("{consecutive_failures} consecutive read failures"),
                checked_at: now,
                consecutive_failures,
                consecutive_successes: 0,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
