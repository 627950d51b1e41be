//! Sustained-evidence confirmation state machine.
//!
//! Turns a per-tick boolean into at most one confirmation per cooldown
//! window:
//!
//! - **Accumulating**: evidence is present; accumulated true-time grows.
//! - **Grace**: evidence vanished less than `grace_period` ago; progress is
//!   kept and the gap is not counted once evidence returns.
//! - **Cooldown**: a confirmation fired less than `cooldown` ago. Evidence
//!   keeps being tracked, but nothing is emitted until the window lapses.
//!
//! ```text
//!          true                 accumulated >= threshold
//!  Idle ─────────► Accumulating ─────────────────────────► Cooldown
//!   ▲                 │    ▲                                  │
//!   │           false │    │ true                             │ elapsed >= cooldown
//!   │                 ▼    │                                  │
//!   └──────────────── Grace ◄─────────────────────────────────┘
//!     gap >= grace                   (or Idle / Accumulating)
//! ```
//!
//! The machine is driven entirely by the caller's clock; it never reads
//! time itself.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DetectError;
use crate::types::{millis, positive_millis};

// ─── Config ──────────────────────────────────────────────────────────

/// Timing parameters for a [`DebounceConfirmer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmerConfig {
    /// Accumulated evidence time required before confirming. Zero confirms
    /// on the first present sample.
    pub confirm_threshold_ms: u64,
    /// How long evidence may vanish without losing progress.
    pub grace_period_ms: u64,
    /// Suppression window after a confirmation.
    pub cooldown_ms: u64,
}

impl Default for ConfirmerConfig {
    fn default() -> Self {
        Self {
            confirm_threshold_ms: 5_000,
            grace_period_ms: 1_000,
            cooldown_ms: 60_000,
        }
    }
}

impl ConfirmerConfig {
    pub fn new(confirm_threshold_ms: u64, grace_period_ms: u64, cooldown_ms: u64) -> Self {
        Self {
            confirm_threshold_ms,
            grace_period_ms,
            cooldown_ms,
        }
    }

    /// Check the durations without building a confirmer.
    pub fn validate(&self) -> Result<(), DetectError> {
        Timing::from_config(self).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timing {
    threshold: TimeDelta,
    grace: TimeDelta,
    cooldown: TimeDelta,
}

impl Timing {
    fn from_config(config: &ConfirmerConfig) -> Result<Self, DetectError> {
        Ok(Self {
            threshold: millis("confirm_threshold_ms", config.confirm_threshold_ms)?,
            grace: positive_millis("grace_period_ms", config.grace_period_ms)?,
            cooldown: positive_millis("cooldown_ms", config.cooldown_ms)?,
        })
    }
}

// ─── Public state ────────────────────────────────────────────────────

/// Externally visible phase of a confirmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    Idle,
    Accumulating,
    Grace,
    Cooldown,
}

/// Emitted once when sustained evidence crosses the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedEvent {
    /// Tick at which the threshold was crossed.
    pub confirmed_at: DateTime<Utc>,
    /// Effective start of the run, shifted forward by tolerated gaps.
    pub evidence_since: DateTime<Utc>,
    /// Accumulated evidence time at confirmation, in milliseconds.
    pub accumulated_ms: i64,
}

// ─── Run tracking ────────────────────────────────────────────────────

/// One run of evidence. `lost_at` is set while in grace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    started_at: DateTime<Utc>,
    lost_at: Option<DateTime<Utc>>,
}

impl Run {
    fn begin(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            lost_at: None,
        }
    }

    /// Apply one sample. `None` means the run ended (grace expired).
    fn advance(self, evidence: bool, now: DateTime<Utc>, grace: TimeDelta) -> Option<Self> {
        match (self.lost_at, evidence) {
            (None, true) => Some(self),
            (None, false) => Some(Self {
                lost_at: Some(now),
                ..self
            }),
            // Gap excluded: shift the origin forward by its length.
            (Some(lost_at), true) => Some(Self {
                started_at: self.started_at + (now - lost_at),
                lost_at: None,
            }),
            (Some(lost_at), false) => {
                if now - lost_at >= grace {
                    None
                } else {
                    Some(self)
                }
            }
        }
    }

    fn accumulated(&self, now: DateTime<Utc>) -> TimeDelta {
        match self.lost_at {
            Some(lost_at) => lost_at - self.started_at,
            None => now - self.started_at,
        }
    }

    /// Confirmation is only possible while evidence is currently present.
    fn is_confirmed(&self, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
        self.lost_at.is_none() && self.accumulated(now) >= threshold
    }

    fn state(&self) -> DetectionState {
        if self.lost_at.is_some() {
            DetectionState::Grace
        } else {
            DetectionState::Accumulating
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active(Run),
    Cooldown {
        since: DateTime<Utc>,
        run: Option<Run>,
    },
}

// ─── DebounceConfirmer ───────────────────────────────────────────────

/// Parametric debounce machine shared by person and motion confirmation.
///
/// Owned by exactly one producer; every method that changes state takes
/// `&mut self`.
#[derive(Debug, Clone)]
pub struct DebounceConfirmer {
    config: ConfirmerConfig,
    timing: Timing,
    phase: Phase,
    last_observed_at: Option<DateTime<Utc>>,
    entity: String,
}

impl DebounceConfirmer {
    /// Build a confirmer; fails if the grace period or cooldown is zero.
    pub fn new(entity: impl Into<String>, config: ConfirmerConfig) -> Result<Self, DetectError> {
        let timing = Timing::from_config(&config)?;
        Ok(Self {
            config,
            timing,
            phase: Phase::Idle,
            last_observed_at: None,
            entity: entity.into(),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn config(&self) -> &ConfirmerConfig {
        &self.config
    }

    pub fn state(&self) -> DetectionState {
        match &self.phase {
            Phase::Idle => DetectionState::Idle,
            Phase::Active(run) => run.state(),
            Phase::Cooldown { .. } => DetectionState::Cooldown,
        }
    }

    /// Accumulated evidence time of the current run, if any.
    pub fn accumulated(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        match &self.phase {
            Phase::Active(run) | Phase::Cooldown { run: Some(run), .. } => {
                Some(run.accumulated(now))
            }
            _ => None,
        }
    }

    /// Feed one tick. Out-of-order samples are logged and dropped.
    pub fn observe(&mut self, evidence: bool, now: DateTime<Utc>) -> Option<ConfirmedEvent> {
        match self.try_observe(evidence, now) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(entity = %self.entity, "dropping sample: {err}");
                None
            }
        }
    }

    /// Feed a tick on which the evidence source failed. Treated as absence,
    /// so an accumulating run passes through grace instead of resetting.
    pub fn observe_failure(&mut self, now: DateTime<Utc>, detail: &str) -> Option<ConfirmedEvent> {
        let err = DetectError::TransientSource {
            source_id: self.entity.clone(),
            detail: detail.to_owned(),
        };
        tracing::debug!(state = ?self.state(), "{err}");
        self.observe(false, now)
    }

    /// Feed one tick, rejecting timestamps earlier than the last accepted one.
    pub fn try_observe(
        &mut self,
        evidence: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<ConfirmedEvent>, DetectError> {
        if let Some(last) = self.last_observed_at {
            if now < last {
                return Err(DetectError::OutOfOrderEvidence {
                    entity: self.entity.clone(),
                    observed_at: now,
                    last_seen_at: last,
                });
            }
        }
        self.last_observed_at = Some(now);

        let (next, event) = self.step(evidence, now);
        if next != self.phase {
            tracing::trace!(
                entity = %self.entity,
                evidence,
                from = ?self.state(),
                "confirmer transition"
            );
        }
        self.phase = next;
        Ok(event)
    }

    /// Return to `Idle` and forget sample ordering. Used when monitoring stops.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.last_observed_at = None;
    }

    fn step(&self, evidence: bool, now: DateTime<Utc>) -> (Phase, Option<ConfirmedEvent>) {
        let Timing {
            threshold,
            grace,
            cooldown,
        } = self.timing;

        match self.phase {
            Phase::Idle => {
                if evidence {
                    self.settle(Run::begin(now), now)
                } else {
                    (Phase::Idle, None)
                }
            }
            Phase::Active(run) => match run.advance(evidence, now, grace) {
                Some(run) => self.settle(run, now),
                None => (Phase::Idle, None),
            },
            Phase::Cooldown { since, run } => {
                let run = match run {
                    Some(run) => run.advance(evidence, now, grace),
                    None if evidence => Some(Run::begin(now)),
                    None => None,
                };
                if now - since < cooldown {
                    return (Phase::Cooldown { since, run }, None);
                }
                match run {
                    Some(run) if run.is_confirmed(now, threshold) => self.confirm(run, now),
                    Some(run) => (Phase::Active(run), None),
                    None => (Phase::Idle, None),
                }
            }
        }
    }

    fn settle(&self, run: Run, now: DateTime<Utc>) -> (Phase, Option<ConfirmedEvent>) {
        if run.is_confirmed(now, self.timing.threshold) {
            self.confirm(run, now)
        } else {
            (Phase::Active(run), None)
        }
    }

    fn confirm(&self, run: Run, now: DateTime<Utc>) -> (Phase, Option<ConfirmedEvent>) {
        let event = ConfirmedEvent {
            confirmed_at: now,
            evidence_since: run.started_at,
            accumulated_ms: run.accumulated(now).num_milliseconds(),
        };
        tracing::debug!(
            entity = %self.entity,
            accumulated_ms = event.accumulated_ms,
            "evidence confirmed"
        );
        (
            Phase::Cooldown {
                since: now,
                run: None,
            },
            Some(event),
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
