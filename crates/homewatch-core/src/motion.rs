//! Motion-triggered intrusion detection for an armed device.
//!
//! Accelerometer samples are reduced to a boolean per tick (delta magnitude
//! above `sensitivity`) and fed to a [`DebounceConfirmer`] with a zero
//! threshold, so the first qualifying delta confirms. Samples inside the
//! arming grace window only refresh the baseline. Power disconnect while
//! armed is a separate, instantaneous trigger that never touches the
//! confirmer.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::confirmer::{ConfirmerConfig, DebounceConfirmer, DetectionState};
use crate::error::DetectError;
use crate::types::millis;

// ─── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Time to set the device down after arming.
    pub arming_grace_ms: u64,
    /// Minimum delta magnitude (m/s²) that counts as movement.
    pub sensitivity: f64,
    pub grace_period_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            arming_grace_ms: 5_000,
            sensitivity: 1.5,
            grace_period_ms: 1_000,
            cooldown_ms: 30_000,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<(), DetectError> {
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(DetectError::Configuration {
                field: "sensitivity",
                reason: format!("must be a positive number, got {}", self.sensitivity),
            });
        }
        millis("arming_grace_ms", self.arming_grace_ms)?;
        self.confirmer_config().validate()
    }

    fn confirmer_config(&self) -> ConfirmerConfig {
        ConfirmerConfig::new(0, self.grace_period_ms, self.cooldown_ms)
    }
}

// ─── Types ──────────────────────────────────────────────────────────

/// One 3-axis accelerometer reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of `self - other`.
    pub fn distance(&self, other: &Vector3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntrusionCause {
    Motion { magnitude: f64 },
    PowerDisconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntrusionEvent {
    pub cause: IntrusionCause,
    pub at: DateTime<Utc>,
}

/// Outcome of [`MotionIntrusionConfirmer::disarm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disarmed {
    pub was_armed: bool,
    /// An intrusion alert was in flight and must be silenced now.
    pub silence_alert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Armed {
    armed_at: DateTime<Utc>,
    previous: Option<Vector3>,
    last_sample_at: Option<DateTime<Utc>>,
}

// ─── MotionIntrusionConfirmer ───────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MotionIntrusionConfirmer {
    sensitivity: f64,
    arming_grace: TimeDelta,
    confirmer: DebounceConfirmer,
    armed: Option<Armed>,
    alerting: bool,
}

impl MotionIntrusionConfirmer {
    pub fn new(config: MotionConfig) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            sensitivity: config.sensitivity,
            arming_grace: millis("arming_grace_ms", config.arming_grace_ms)?,
            confirmer: DebounceConfirmer::new("motion", config.confirmer_config())?,
            armed: None,
            alerting: false,
        })
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// An intrusion was confirmed since arming. Whether it reached the user
    /// is up to the caller.
    pub fn is_alerting(&self) -> bool {
        self.alerting
    }

    pub fn state(&self) -> DetectionState {
        self.confirmer.state()
    }

    /// True while samples only refresh the baseline.
    pub fn in_arming_grace(&self, now: DateTime<Utc>) -> bool {
        self.armed
            .is_some_and(|armed| now - armed.armed_at < self.arming_grace)
    }

    /// Arm (or re-arm) the device. Re-arming restarts the arming grace.
    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.confirmer.reset();
        self.alerting = false;
        self.armed = Some(Armed {
            armed_at: now,
            previous: None,
            last_sample_at: None,
        });
        tracing::info!(armed_at = %now, "motion detection armed");
    }

    pub fn disarm(&mut self, now: DateTime<Utc>) -> Disarmed {
        let outcome = Disarmed {
            was_armed: self.armed.is_some(),
            silence_alert: self.alerting,
        };
        self.armed = None;
        self.alerting = false;
        self.confirmer.reset();
        if outcome.was_armed {
            tracing::info!(
                disarmed_at = %now,
                silenced = outcome.silence_alert,
                "motion detection disarmed"
            );
        }
        outcome
    }

    /// Feed one accelerometer reading. A reading older than the last one
    /// is dropped without touching the baseline.
    pub fn on_sensor_sample(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        now: DateTime<Utc>,
    ) -> Option<IntrusionEvent> {
        let in_grace = self.in_arming_grace(now);
        let armed = self.armed.as_mut()?;
        if let Some(last) = armed.last_sample_at.filter(|last| now < *last) {
            let err = DetectError::OutOfOrderEvidence {
                entity: self.confirmer.entity().to_owned(),
                observed_at: now,
                last_seen_at: last,
            };
            tracing::warn!("dropping sensor sample: {err}");
            return None;
        }
        armed.last_sample_at = Some(now);
        let current = Vector3::new(x, y, z);
        let previous = armed.previous.replace(current);

        if in_grace {
            return None;
        }
        let magnitude = previous.map_or(0.0, |p| current.distance(&p));
        let evidence = magnitude > self.sensitivity;
        if evidence {
            tracing::debug!(magnitude, threshold = self.sensitivity, "motion delta over threshold");
        }

        let confirmed = self.confirmer.observe(evidence, now)?;
        self.alerting = true;
        Some(IntrusionEvent {
            cause: IntrusionCause::Motion { magnitude },
            at: confirmed.confirmed_at,
        })
    }

    /// Power removed. Instant trigger while armed, no debounce.
    pub fn on_power_disconnected(&mut self, now: DateTime<Utc>) -> Option<IntrusionEvent> {
        self.armed?;
        self.alerting = true;
        tracing::info!(at = %now, "power disconnected while armed");
        Some(IntrusionEvent {
            cause: IntrusionCause::PowerDisconnected,
            at: now,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
            + TimeDelta::milliseconds(ms)
    }

    fn armed_at_zero() -> MotionIntrusionConfirmer {
        let mut m = MotionIntrusionConfirmer::new(MotionConfig::default()).expect("valid");
        m.arm(at(0));
        m
    }

    #[test]
    fn invalid_sensitivity_rejected() {
        for sensitivity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = MotionConfig {
                sensitivity,
                ..MotionConfig::default()
            };
            assert!(MotionIntrusionConfirmer::new(config).is_err(), "{sensitivity}");
        }
    }

    #[test]
    fn zero_cooldown_rejected() {
        let config = MotionConfig {
            cooldown_ms: 0,
            ..MotionConfig::default()
        };
        assert!(MotionIntrusionConfirmer::new(config).is_err());
    }

    #[test]
    fn zero_arming_grace_is_allowed() {
        let config = MotionConfig {
            arming_grace_ms: 0,
            ..MotionConfig::default()
        };
        let mut m = MotionIntrusionConfirmer::new(config).expect("valid");
        m.arm(at(0));
        assert!(!m.in_arming_grace(at(0)));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Vector3::new(0.0, 0.0, 9.8);
        let b = Vector3::new(3.0, 4.0, 9.8);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn samples_ignored_while_disarmed() {
        let mut m = MotionIntrusionConfirmer::new(MotionConfig::default()).expect("valid");
        assert!(m.on_sensor_sample(0.0, 0.0, 0.0, at(0)).is_none());
        assert!(m.on_sensor_sample(50.0, 0.0, 0.0, at(100)).is_none());
        assert!(!m.is_alerting());
    }

    #[test]
    fn arming_grace_then_immediate_trigger() {
        let mut m = armed_at_zero();
        assert!(m.on_sensor_sample(0.0, 0.0, 9.8, at(1_000)).is_none());
        // Large delta inside the arming grace.
        assert!(m.on_sensor_sample(8.0, 3.0, 9.8, at(2_000)).is_none());
        assert!(m.on_sensor_sample(8.0, 3.0, 9.8, at(5_500)).is_none());
        // Large delta after the grace.
        let event = m
            .on_sensor_sample(0.0, 0.0, 9.8, at(6_000))
            .expect("intrusion");
        assert_eq!(event.at, at(6_000));
        match event.cause {
            IntrusionCause::Motion { magnitude } => assert!(magnitude > 8.0),
            IntrusionCause::PowerDisconnected => panic!("wrong cause"),
        }
        assert!(m.is_alerting());
    }

    #[test]
    fn small_deltas_do_not_trigger() {
        let mut m = armed_at_zero();
        m.on_sensor_sample(0.0, 0.0, 9.8, at(5_000));
        for step in 1..20 {
            let jitter = if step % 2 == 0 { 0.3 } else { -0.3 };
            assert!(
                m.on_sensor_sample(jitter, 0.0, 9.8, at(5_000 + step * 100))
                    .is_none()
            );
        }
    }

    #[test]
    fn first_sample_after_grace_only_sets_baseline() {
        let mut m = armed_at_zero();
        // No sample during grace: first one has nothing to compare against.
        assert!(m.on_sensor_sample(20.0, 0.0, 0.0, at(6_000)).is_none());
        assert!(m.on_sensor_sample(0.0, 0.0, 0.0, at(6_100)).is_some());
    }

    #[test]
    fn out_of_order_sample_keeps_baseline() {
        let mut m = armed_at_zero();
        assert!(m.on_sensor_sample(0.0, 0.0, 0.0, at(6_000)).is_none());
        // Older than the last reading: dropped, baseline stays at the origin.
        assert!(m.on_sensor_sample(10.0, 0.0, 0.0, at(5_500)).is_none());
        let event = m
            .on_sensor_sample(10.0, 0.0, 0.0, at(7_000))
            .expect("intrusion");
        assert_eq!(event.cause, IntrusionCause::Motion { magnitude: 10.0 });
    }

    #[test]
    fn cooldown_suppresses_repeat_motion() {
        let mut m = armed_at_zero();
        m.on_sensor_sample(0.0, 0.0, 0.0, at(5_000));
        assert!(m.on_sensor_sample(5.0, 0.0, 0.0, at(6_000)).is_some());
        assert!(m.on_sensor_sample(0.0, 0.0, 0.0, at(7_000)).is_none());
        assert_eq!(m.state(), DetectionState::Cooldown);
    }

    #[test]
    fn power_disconnect_triggers_only_when_armed() {
        let mut m = MotionIntrusionConfirmer::new(MotionConfig::default()).expect("valid");
        assert!(m.on_power_disconnected(at(0)).is_none());
        m.arm(at(0));
        // Even inside the arming grace: no debounce for power.
        let event = m.on_power_disconnected(at(100)).expect("intrusion");
        assert_eq!(event.cause, IntrusionCause::PowerDisconnected);
        assert!(m.is_alerting());
    }

    #[test]
    fn disarm_silences_in_flight_alert() {
        let mut m = armed_at_zero();
        m.on_sensor_sample(0.0, 0.0, 0.0, at(5_000));
        m.on_sensor_sample(5.0, 0.0, 0.0, at(6_000));
        assert_eq!(m.state(), DetectionState::Cooldown);

        let outcome = m.disarm(at(7_000));
        assert!(outcome.was_armed);
        assert!(outcome.silence_alert);
        assert!(!m.is_alerting());
        assert_eq!(m.state(), DetectionState::Idle);
        assert!(m.on_sensor_sample(50.0, 0.0, 0.0, at(8_000)).is_none());
    }

    #[test]
    fn disarm_when_idle_reports_nothing_to_silence() {
        let mut m = MotionIntrusionConfirmer::new(MotionConfig::default()).expect("valid");
        assert_eq!(
            m.disarm(at(0)),
            Disarmed {
                was_armed: false,
                silence_alert: false
            }
        );
    }

    #[test]
    fn rearm_restarts_grace_and_baseline() {
        let mut m = armed_at_zero();
        m.on_sensor_sample(0.0, 0.0, 0.0, at(5_000));
        m.arm(at(10_000));
        assert!(m.in_arming_grace(at(12_000)));
        assert!(m.on_sensor_sample(30.0, 0.0, 0.0, at(12_000)).is_none());
        assert!(m.on_sensor_sample(0.0, 0.0, 0.0, at(16_000)).is_some());
    }
}
