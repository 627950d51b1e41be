//! Monitoring session: the explicitly owned store shared by all producers.
//!
//! A [`Monitor`] is created when monitoring starts and torn down when it
//! stops. It owns the shared engines (presence fusion, notification
//! throttle, alert ledger) and hands out per-entity detectors. Producers hold
//! an `Arc<Monitor>`; nothing here is global.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use homewatch_core::fusion::DEFAULT_DECAY_MS;
use homewatch_core::throttle::bssid_key;
use homewatch_core::{
    ConfirmerConfig, EvidenceSample, EvidenceSink, HealthPolicy, MotionConfig,
    NotificationThrottle, PresenceFusion, PresenceSnapshot,
};

use crate::alert_routing::{Acknowledgement, AlertEntry, AlertKind, AlertRouter, Resolution};
use crate::channel::ChannelDetector;
use crate::dispatch::AlertDispatcher;
use crate::error::MonitorError;
use crate::intrusion::IntrusionMonitor;

// ─── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How long one sighting keeps the household present.
    pub decay_ms: u64,
    /// Also alert when everyone has left.
    pub announce_departures: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            decay_ms: DEFAULT_DECAY_MS,
            announce_departures: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum spacing between alerts of the same class.
    pub min_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 60_000,
        }
    }
}

/// Everything a monitoring session needs, one section per engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub presence: PresenceConfig,
    pub person: ConfirmerConfig,
    pub motion: MotionConfig,
    pub throttle: ThrottleConfig,
    pub health: HealthPolicy,
}

impl MonitorConfig {
    /// Reject non-positive durations and invalid sensitivity up front.
    pub fn validate(&self) -> Result<(), MonitorError> {
        PresenceFusion::new(self.presence.decay_ms)?;
        NotificationThrottle::new(self.throttle.min_interval_ms)?;
        self.person.validate()?;
        self.motion.validate()?;
        Ok(())
    }
}

// ─── Monitor ────────────────────────────────────────────────────────

pub struct Monitor {
    config: MonitorConfig,
    fusion: PresenceFusion,
    /// Last sighting per access point, keyed by `bssid:<addr>`.
    networks: PresenceFusion,
    throttle: NotificationThrottle,
    router: Mutex<AlertRouter>,
    /// Entities with a live detector ("channel:<id>", "motion").
    entities: Mutex<HashSet<String>>,
    dispatcher: Arc<dyn AlertDispatcher>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("fusion", &self.fusion)
            .field("networks", &self.networks)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

pub(crate) const MOTION_ENTITY: &str = "motion";

impl Monitor {
    /// Start a monitoring session. Fails fast on invalid configuration.
    pub fn start(
        config: MonitorConfig,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Result<Arc<Self>, MonitorError> {
        config.validate()?;
        let monitor = Self {
            fusion: PresenceFusion::new(config.presence.decay_ms)?,
            networks: PresenceFusion::new(config.presence.decay_ms)?,
            throttle: NotificationThrottle::new(config.throttle.min_interval_ms)?,
            router: Mutex::new(AlertRouter::new()),
            entities: Mutex::new(HashSet::new()),
            dispatcher,
            config,
        };
        tracing::info!(
            decay_ms = monitor.config.presence.decay_ms,
            min_interval_ms = monitor.config.throttle.min_interval_ms,
            "monitoring started"
        );
        Ok(Arc::new(monitor))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ── Presence ────────────────────────────────────────────────────

    /// Feed one sighting into presence fusion. Returns `true` when the
    /// source just started contributing.
    pub fn report(
        &self,
        source_id: &str,
        present: bool,
        now: DateTime<Utc>,
        details: &str,
    ) -> bool {
        self.fusion
            .report_with_details(source_id, present, now, details)
    }

    /// Like [`report`](Self::report) for a known network/device; alerts
    /// (throttled per BSSID) when that BSSID was unseen for the decay window.
    pub fn report_network(
        &self,
        source_id: &str,
        bssid: &str,
        now: DateTime<Utc>,
        details: &str,
    ) -> Option<AlertEntry> {
        self.report(source_id, true, now, details);
        if !self
            .networks
            .report_with_details(&bssid_key(bssid), true, now, source_id)
        {
            return None;
        }
        let message = if details.is_empty() {
            format!("{source_id} sees {bssid}")
        } else {
            format!("{source_id} sees {bssid} ({details})")
        };
        self.raise(
            AlertKind::NetworkSeen {
                source_id: source_id.to_owned(),
                bssid: bssid.to_owned(),
            },
            &message,
            now,
        )
    }

    pub fn is_present(&self, now: DateTime<Utc>) -> bool {
        self.fusion.is_present(now)
    }

    pub fn describe(&self, now: DateTime<Utc>) -> String {
        self.fusion.describe(now)
    }

    /// Evaluate fused presence and dispatch arrival/departure on edges.
    /// Call on a periodic tick: presence can lapse without any report.
    pub fn evaluate_presence(&self, now: DateTime<Utc>) -> PresenceSnapshot {
        let snapshot = self.fusion.evaluate(now);
        if !snapshot.changed {
            return snapshot;
        }

        let description = self.fusion.describe(now);
        tracing::info!(present = snapshot.present, "{description}");

        let kind = if snapshot.present {
            AlertKind::Arrived
        } else if self.config.presence.announce_departures {
            AlertKind::Departed
        } else {
            return snapshot;
        };
        if !self.throttle.try_fire(&kind.throttle_key(), now) {
            return snapshot;
        }
        let message = if snapshot.present {
            "someone is home"
        } else {
            "everyone has left"
        };
        let entry = self.record(kind, message, now);
        self.dispatcher
            .raise_confirmed_presence(&entry, &snapshot, &description);
        snapshot
    }

    /// Stop tracking a presence source. Its sightings no longer count.
    pub fn stop_source(&self, source_id: &str) -> bool {
        let removed = self.fusion.forget(source_id);
        if removed {
            tracing::info!(source_id, "presence source stopped");
        }
        removed
    }

    // ── Detectors ───────────────────────────────────────────────────

    /// Create the person detector for one camera channel. At most one
    /// detector per channel may be live.
    pub fn channel(self: &Arc<Self>, channel_id: &str) -> Result<ChannelDetector, MonitorError> {
        let entity = ChannelDetector::entity_for(channel_id);
        self.claim_entity(&entity)?;
        ChannelDetector::new(Arc::clone(self), channel_id, self.config.person).inspect_err(|_| {
            self.release_entity(&entity);
        })
    }

    /// Create the (single) motion intrusion detector.
    pub fn intrusion(self: &Arc<Self>) -> Result<IntrusionMonitor, MonitorError> {
        self.claim_entity(MOTION_ENTITY)?;
        IntrusionMonitor::new(Arc::clone(self), self.config.motion).inspect_err(|_| {
            self.release_entity(MOTION_ENTITY);
        })
    }

    pub fn is_monitoring(&self, entity: &str) -> bool {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(entity)
    }

    // ── Alerts ──────────────────────────────────────────────────────

    /// Apply a user acknowledgement: resolve, silence, and for snooze hold
    /// back the alert class until the deadline.
    pub fn acknowledge(
        &self,
        alert_id: &str,
        ack: Acknowledgement,
        now: DateTime<Utc>,
    ) -> Result<AlertEntry, MonitorError> {
        let entry = self
            .router()
            .acknowledge(alert_id, ack, now)
            .ok_or_else(|| MonitorError::UnknownAlert(alert_id.to_owned()))?;
        if let Acknowledgement::Snooze { until } = ack {
            self.throttle.snooze(&entry.kind.throttle_key(), until);
        }
        self.dispatcher.silence(alert_id);
        tracing::info!(alert_id, ?ack, "alert acknowledged");
        Ok(entry)
    }

    pub fn alert(&self, alert_id: &str) -> Option<AlertEntry> {
        self.router().get(alert_id).cloned()
    }

    pub fn unresolved_alerts(&self) -> Vec<AlertEntry> {
        self.router().unresolved().into_iter().cloned().collect()
    }

    /// Drop resolved alerts older than `before`.
    pub fn prune_alerts(&self, before: DateTime<Utc>) -> usize {
        self.router().prune_resolved(before)
    }

    /// Tear down: forget every source, throttle key and alert. Live
    /// detectors keep working but start from empty shared state.
    pub fn stop(&self) {
        self.fusion.clear();
        self.networks.clear();
        self.throttle.clear();
        self.router().clear();
        tracing::info!("monitoring stopped");
    }

    // ── Crate-internal plumbing ─────────────────────────────────────

    /// Throttled: record and dispatch a generic alert if its class permits.
    pub(crate) fn raise(
        &self,
        kind: AlertKind,
        message: &str,
        now: DateTime<Utc>,
    ) -> Option<AlertEntry> {
        if !self.throttle.try_fire(&kind.throttle_key(), now) {
            return None;
        }
        let entry = self.record(kind, message, now);
        self.dispatcher.raise_alert(&entry);
        Some(entry)
    }

    /// Unthrottled ledger write; the caller dispatches.
    pub(crate) fn record(&self, kind: AlertKind, message: &str, now: DateTime<Utc>) -> AlertEntry {
        self.router().emit(kind, message, now)
    }

    /// Resolve as cleared and silence. Used on disarm.
    pub(crate) fn clear_alert(&self, alert_id: &str, now: DateTime<Utc>) {
        if self.router().resolve(alert_id, Resolution::Cleared, now) {
            self.dispatcher.silence(alert_id);
        }
    }

    pub(crate) fn dispatcher(&self) -> &dyn AlertDispatcher {
        self.dispatcher.as_ref()
    }

    pub(crate) fn release_entity(&self, entity: &str) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity);
    }

    fn claim_entity(&self, entity: &str) -> Result<(), MonitorError> {
        let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        if !entities.insert(entity.to_owned()) {
            return Err(MonitorError::AlreadyMonitored(entity.to_owned()));
        }
        Ok(())
    }

    fn router(&self) -> std::sync::MutexGuard<'_, AlertRouter> {
        self.router.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Push-style network sources deliver straight into presence fusion.
impl EvidenceSink for Monitor {
    fn push(&self, sample: EvidenceSample) -> bool {
        self.report(
            &sample.source_id,
            sample.present,
            sample.observed_at,
            &sample.metadata,
        );
        true
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
