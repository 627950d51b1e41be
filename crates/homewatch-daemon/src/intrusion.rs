//! Armed-device intrusion monitoring.
//!
//! Wraps the motion confirmer with the alert side: confirmed intrusions are
//! recorded and dispatched immediately (never throttled), disarming silences
//! whatever is still sounding.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use homewatch_core::{
    DetectionState, Disarmed, IntrusionCause, IntrusionEvent, MotionConfig,
    MotionIntrusionConfirmer,
};

use crate::alert_routing::{Acknowledgement, AlertEntry, AlertKind};
use crate::error::MonitorError;
use crate::monitor::{MOTION_ENTITY, Monitor};

#[derive(Debug)]
pub struct IntrusionMonitor {
    confirmer: MotionIntrusionConfirmer,
    monitor: Arc<Monitor>,
    /// Alerts raised since arming and not yet acknowledged.
    active_alerts: Vec<String>,
    snoozed_until: Option<DateTime<Utc>>,
}

impl IntrusionMonitor {
    pub(crate) fn new(monitor: Arc<Monitor>, config: MotionConfig) -> Result<Self, MonitorError> {
        Ok(Self {
            confirmer: MotionIntrusionConfirmer::new(config)?,
            monitor,
            active_alerts: Vec::new(),
            snoozed_until: None,
        })
    }

    pub fn is_armed(&self) -> bool {
        self.confirmer.is_armed()
    }

    /// An intrusion alert was raised and is still unacknowledged.
    pub fn is_alerting(&self) -> bool {
        !self.active_alerts.is_empty()
    }

    pub fn state(&self) -> DetectionState {
        self.confirmer.state()
    }

    pub fn active_alerts(&self) -> &[String] {
        &self.active_alerts
    }

    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.snoozed_until = None;
        self.confirmer.arm(now);
    }

    /// Disarm and clear any alert still sounding. Intrusions held back by a
    /// snooze never reached the user, so they need no silencing.
    pub fn disarm(&mut self, now: DateTime<Utc>) -> Disarmed {
        let outcome = Disarmed {
            silence_alert: self.is_alerting(),
            ..self.confirmer.disarm(now)
        };
        for alert_id in self.active_alerts.drain(..) {
            self.monitor.clear_alert(&alert_id, now);
        }
        self.snoozed_until = None;
        outcome
    }

    pub fn on_sensor_sample(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        now: DateTime<Utc>,
    ) -> Option<AlertEntry> {
        let event = self.confirmer.on_sensor_sample(x, y, z, now)?;
        self.raise(event, now)
    }

    pub fn on_power_disconnected(&mut self, now: DateTime<Utc>) -> Option<AlertEntry> {
        let event = self.confirmer.on_power_disconnected(now)?;
        self.raise(event, now)
    }

    /// Stop disarms the device. Snooze silences the alert and holds back
    /// further intrusion alerts until the deadline while staying armed.
    pub fn acknowledge(
        &mut self,
        alert_id: &str,
        ack: Acknowledgement,
        now: DateTime<Utc>,
    ) -> Result<AlertEntry, MonitorError> {
        let entry = self.monitor.acknowledge(alert_id, ack, now)?;
        self.active_alerts.retain(|id| id != alert_id);
        match ack {
            Acknowledgement::Stop => {
                self.disarm(now);
            }
            Acknowledgement::Snooze { until } => self.snoozed_until = Some(until),
        }
        Ok(entry)
    }

    fn raise(&mut self, event: IntrusionEvent, now: DateTime<Utc>) -> Option<AlertEntry> {
        if let Some(until) = self.snoozed_until {
            if now < until {
                tracing::info!(cause = ?event.cause, %until, "intrusion while snoozed");
                return None;
            }
        }
        let message = match event.cause {
            IntrusionCause::Motion { magnitude } => {
                format!("device moved while armed (delta {magnitude:.2})")
            }
            IntrusionCause::PowerDisconnected => "power disconnected while armed".to_string(),
        };
        tracing::warn!(cause = ?event.cause, at = %event.at, "intrusion confirmed");
        let entry = self.monitor.record(
            AlertKind::Intrusion { cause: event.cause },
            &message,
            event.at,
        );
        self.monitor
            .dispatcher()
            .raise_confirmed_intrusion(&entry, &event);
        self.active_alerts.push(entry.alert_id.clone());
        Some(entry)
    }
}

impl Drop for IntrusionMonitor {
    fn drop(&mut self) {
        self.monitor.release_entity(MOTION_ENTITY);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
