//! Alert delivery boundary.
//!
//! The engines never render UI or send network requests; they hand recorded
//! alerts to an [`AlertDispatcher`] implemented by the embedding
//! application.

use std::sync::{Mutex, PoisonError};

use homewatch_core::{IntrusionEvent, PresenceSnapshot};

use crate::alert_routing::AlertEntry;

/// Implemented by the notification/messaging collaborator.
///
/// Called outside of any engine lock; implementations must not block for
/// long since producers call in from their own tasks.
pub trait AlertDispatcher: Send + Sync {
    /// Generic alert (person lingering, network seen, source unhealthy).
    fn raise_alert(&self, alert: &AlertEntry);

    /// Household presence changed.
    fn raise_confirmed_presence(
        &self,
        alert: &AlertEntry,
        snapshot: &PresenceSnapshot,
        description: &str,
    );

    /// Intrusion while armed.
    fn raise_confirmed_intrusion(&self, alert: &AlertEntry, event: &IntrusionEvent);

    /// Stop any sound/vibration still running for `alert_id`.
    fn silence(&self, alert_id: &str);
}

/// One call received by a [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Alert(AlertEntry),
    Presence {
        alert: AlertEntry,
        present: bool,
        description: String,
    },
    Intrusion {
        alert: AlertEntry,
        event: IntrusionEvent,
    },
    Silenced(String),
}

/// In-memory dispatcher; keeps every call in order.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<Dispatched>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Dispatched> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain recorded calls.
    pub fn take(&self) -> Vec<Dispatched> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, call: Dispatched) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl AlertDispatcher for RecordingDispatcher {
    fn raise_alert(&self, alert: &AlertEntry) {
        self.push(Dispatched::Alert(alert.clone()));
    }

    fn raise_confirmed_presence(
        &self,
        alert: &AlertEntry,
        snapshot: &PresenceSnapshot,
        description: &str,
    ) {
        self.push(Dispatched::Presence {
            alert: alert.clone(),
            present: snapshot.present,
            description: description.to_owned(),
        });
    }

    fn raise_confirmed_intrusion(&self, alert: &AlertEntry, event: &IntrusionEvent) {
        self.push(Dispatched::Intrusion {
            alert: alert.clone(),
            event: *event,
        });
    }

    fn silence(&self, alert_id: &str) {
        self.push(Dispatched::Silenced(alert_id.to_owned()));
    }
}
