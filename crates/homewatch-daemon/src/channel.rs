//! Per-camera-channel person detection.
//!
//! Each channel gets its own [`ChannelDetector`] wrapping a debounce
//! confirmer. A frame verdict arrives per tick; once a person has been in
//! view long enough the channel reports to presence fusion, raises a
//! throttled "person lingering" alert and hands the evidence snapshot to
//! the registered callback.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use homewatch_core::throttle::channel_key;
use homewatch_core::types::format_age;
use homewatch_core::{
    ConfirmedEvent, ConfirmerConfig, DebounceConfirmer, DetectError, DetectionState,
    SignalSource, SourceHealth, SourceHealthState, SourceReading, transition_health,
};

use crate::alert_routing::{AlertEntry, AlertKind};
use crate::error::MonitorError;
use crate::monitor::Monitor;

/// Frame captured alongside a positive verdict. Ownership moves to the
/// confirmation callback; the detector keeps no copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceSnapshot {
    pub captured_at: DateTime<Utc>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct ChannelConfirmation {
    pub channel_id: String,
    pub event: ConfirmedEvent,
    /// Snapshot from the confirming frame, if the producer attached one.
    pub snapshot: Option<EvidenceSnapshot>,
    /// `None` when the alert was throttled.
    pub alert: Option<AlertEntry>,
}

type ConfirmedCallback = Box<dyn FnMut(ChannelConfirmation) + Send>;

pub struct ChannelDetector {
    channel_id: String,
    entity: String,
    confirmer: DebounceConfirmer,
    health: Option<SourceHealth>,
    monitor: Arc<Monitor>,
    on_confirmed: Option<ConfirmedCallback>,
}

impl std::fmt::Debug for ChannelDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDetector")
            .field("channel_id", &self.channel_id)
            .field("confirmer", &self.confirmer)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl ChannelDetector {
    pub(crate) fn entity_for(channel_id: &str) -> String {
        channel_key(channel_id)
    }

    pub(crate) fn new(
        monitor: Arc<Monitor>,
        channel_id: &str,
        config: ConfirmerConfig,
    ) -> Result<Self, MonitorError> {
        let entity = Self::entity_for(channel_id);
        let confirmer = DebounceConfirmer::new(entity.clone(), config)?;
        tracing::info!(channel_id, "channel detector started");
        Ok(Self {
            channel_id: channel_id.to_owned(),
            entity,
            confirmer,
            health: None,
            monitor,
            on_confirmed: None,
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn state(&self) -> DetectionState {
        self.confirmer.state()
    }

    pub fn health(&self) -> Option<&SourceHealth> {
        self.health.as_ref()
    }

    /// Register the confirmation consumer (UI, recorder). Replaces any
    /// previous callback.
    pub fn on_confirmed(&mut self, callback: impl FnMut(ChannelConfirmation) + Send + 'static) {
        self.on_confirmed = Some(Box::new(callback));
    }

    /// Feed one classified frame.
    pub fn observe(
        &mut self,
        person: bool,
        now: DateTime<Utc>,
        snapshot: Option<EvidenceSnapshot>,
    ) -> Option<ConfirmedEvent> {
        self.record_health(SourceReading::Ok, now, "");
        let event = self.confirmer.observe(person, now)?;
        self.confirmed(event, snapshot);
        Some(event)
    }

    /// The frame or classifier failed this tick; counts as absence.
    pub fn observe_failure(&mut self, now: DateTime<Utc>, detail: &str) -> Option<ConfirmedEvent> {
        self.record_health(SourceReading::Failed, now, detail);
        let event = self.confirmer.observe_failure(now, detail)?;
        self.confirmed(event, None);
        Some(event)
    }

    /// Poll a frame producer once and feed the verdict.
    pub fn poll(
        &mut self,
        source: &mut dyn SignalSource,
        now: DateTime<Utc>,
    ) -> Option<ConfirmedEvent> {
        match source.poll(now) {
            Ok(sample) => self.observe(sample.present, sample.observed_at, None),
            Err(DetectError::TransientSource { detail, .. }) => self.observe_failure(now, &detail),
            Err(err) => self.observe_failure(now, &err.to_string()),
        }
    }

    /// Forget accumulated evidence (camera switched, view changed).
    pub fn reset(&mut self) {
        self.confirmer.reset();
    }

    /// Stop detecting on this channel. Its presence contribution is
    /// withdrawn and the channel can be monitored again.
    pub fn stop(self) {}

    fn confirmed(&mut self, event: ConfirmedEvent, snapshot: Option<EvidenceSnapshot>) {
        self.monitor
            .report(&self.entity, true, event.confirmed_at, "person in frame");
        let message = format!(
            "person in view on {} for {}",
            self.channel_id,
            format_age(TimeDelta::milliseconds(event.accumulated_ms))
        );
        let alert = self.monitor.raise(
            AlertKind::PersonLingering {
                channel_id: self.channel_id.clone(),
            },
            &message,
            event.confirmed_at,
        );
        if let Some(callback) = self.on_confirmed.as_mut() {
            callback(ChannelConfirmation {
                channel_id: self.channel_id.clone(),
                event,
                snapshot,
                alert,
            });
        }
    }

    fn record_health(&mut self, reading: SourceReading, now: DateTime<Utc>, detail: &str) {
        let was = self.health.as_ref().map(|h| h.state);
        let next = transition_health(
            self.health.as_ref(),
            reading,
            &self.monitor.config().health,
            now,
        );
        let became_unhealthy = next.state == SourceHealthState::Unhealthy
            && was != Some(SourceHealthState::Unhealthy);
        if became_unhealthy {
            tracing::warn!(
                channel_id = %self.channel_id,
                detail,
                reason = %next.reason,
                "channel unhealthy"
            );
            self.monitor.raise(
                AlertKind::SourceUnhealthy {
                    source_id: self.entity.clone(),
                },
                &format!("{} is failing: {}", self.channel_id, next.reason),
                now,
            );
        } else if next.is_healthy()
            && matches!(
                was,
                Some(SourceHealthState::Unhealthy | SourceHealthState::Recovering)
            )
        {
            tracing::info!(channel_id = %self.channel_id, "channel recovered");
        }
        self.health = Some(next);
    }
}

impl Drop for ChannelDetector {
    fn drop(&mut self) {
        self.monitor.stop_source(&self.entity);
        self.monitor.release_entity(&self.entity);
        tracing::info!(channel_id = %self.channel_id, "channel detector stopped");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatched, RecordingDispatcher};
    use crate::monitor::MonitorConfig;
    use homewatch_core::{HealthPolicy, ScriptedSource, SourceKind};
    use std::sync::Mutex;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
            + TimeDelta::milliseconds(ms)
    }

    fn start() -> (Arc<Monitor>, Arc<RecordingDispatcher>) {
        let config = MonitorConfig {
            person: ConfirmerConfig::new(3_000, 1_000, 20_000),
            health: HealthPolicy {
                failure_threshold: 2,
                recovery_threshold: 1,
            },
            ..MonitorConfig::default()
        };
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let monitor = Monitor::start(config, dispatcher.clone()).expect("valid");
        (monitor, dispatcher)
    }

    fn snapshot(ms: i64) -> EvidenceSnapshot {
        EvidenceSnapshot {
            captured_at: at(ms),
            content_type: "image/jpeg".into(),
            bytes: vec![0xff, 0xd8, 0xff],
        }
    }

    #[test]
    fn confirmation_reports_presence_and_alerts() {
        let (monitor, dispatcher) = start();
        let mut detector = monitor.channel("front-door").expect("channel");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        detector.on_confirmed(move |c| sink.lock().expect("lock").push(c));

        let mut fired = Vec::new();
        for ms in (0..=4_000).step_by(1_000) {
            if detector.observe(true, at(ms), Some(snapshot(ms))).is_some() {
                fired.push(ms);
            }
        }
        assert_eq!(fired, vec![3_000]);
        assert!(monitor.is_present(at(3_000)));
        assert!(monitor.describe(at(3_000)).contains("channel:front-door (person in frame)"));

        let received = received.lock().expect("lock");
        assert_eq!(received.len(), 1);
        let confirmation = &received[0];
        assert_eq!(confirmation.channel_id, "front-door");
        assert_eq!(confirmation.snapshot, Some(snapshot(3_000)));
        let alert = confirmation.alert.as_ref().expect("not throttled");
        assert_eq!(alert.message, "person in view on front-door for 3.0s");

        assert!(matches!(
            dispatcher.calls().as_slice(),
            [Dispatched::Alert(entry)] if entry.alert_id == alert.alert_id
        ));
    }

    #[test]
    fn snapshot_without_confirmation_is_dropped() {
        let (monitor, _) = start();
        let mut detector = monitor.channel("yard").expect("channel");
        assert!(detector.observe(true, at(0), Some(snapshot(0))).is_none());
        assert_eq!(detector.state(), DetectionState::Accumulating);
    }

    #[test]
    fn repeated_failures_raise_unhealthy_once() {
        let (monitor, dispatcher) = start();
        let mut detector = monitor.channel("garage").expect("channel");
        for ms in [0, 1_000, 2_000, 3_000] {
            detector.observe_failure(at(ms), "decoder error");
        }
        let unhealthy: Vec<_> = dispatcher
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(c, Dispatched::Alert(a)
                    if matches!(a.kind, AlertKind::SourceUnhealthy { .. }))
            })
            .collect();
        assert_eq!(unhealthy.len(), 1);
        assert_eq!(
            detector.health().map(|h| h.state),
            Some(SourceHealthState::Unhealthy)
        );

        detector.observe(false, at(4_000), None);
        assert_eq!(
            detector.health().map(|h| h.state),
            Some(SourceHealthState::Healthy)
        );
    }

    #[test]
    fn failure_inside_grace_keeps_run() {
        let (monitor, _) = start();
        let mut detector = monitor.channel("hall").expect("channel");
        detector.observe(true, at(0), None);
        detector.observe_failure(at(500), "timeout");
        assert_eq!(detector.state(), DetectionState::Grace);
        detector.observe(true, at(1_000), None);
        assert_eq!(detector.state(), DetectionState::Accumulating);
    }

    #[test]
    fn poll_treats_transient_errors_as_absence() {
        let (monitor, _) = start();
        let mut detector = monitor.channel("porch").expect("channel");
        let mut source = ScriptedSource::new(
            "porch",
            SourceKind::Camera,
            [Ok(true), Err("frame dropped".to_owned()), Ok(true), Ok(true), Ok(true)],
        );
        let mut fired = Vec::new();
        for ms in (0..5_000).step_by(1_000) {
            if detector.poll(&mut source, at(ms)).is_some() {
                fired.push(ms);
            }
        }
        // The failed tick at 1000 opens grace; the run resumes at 2000 with
        // the gap excluded, so 3s accumulate at 4000.
        assert_eq!(fired, vec![4_000]);
    }

    #[test]
    fn dropping_detector_withdraws_presence() {
        let (monitor, _) = start();
        let mut detector = monitor.channel("lobby").expect("channel");
        for ms in (0..=3_000).step_by(1_000) {
            detector.observe(true, at(ms), None);
        }
        assert!(monitor.is_present(at(3_000)));
        detector.stop();
        assert!(!monitor.is_present(at(3_001)));
        assert!(!monitor.is_monitoring("channel:lobby"));
    }
}
