//! Per-key minimum spacing between user-visible alerts.
//!
//! Keys are caller-defined so unrelated alert classes never throttle each
//! other. Denied firings are dropped, not queued.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::DetectError;
use crate::types::positive_millis;

/// Key for household presence alerts.
pub const PRESENCE_KEY: &str = "presence";

/// Key for intrusion alerts.
pub const INTRUSION_KEY: &str = "intrusion";

/// Key for alerts about one access point.
pub fn bssid_key(addr: &str) -> String {
    format!("bssid:{}", addr.to_ascii_lowercase())
}

/// Key for alerts about one camera channel.
pub fn channel_key(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KeyState {
    last_fired_at: Option<DateTime<Utc>>,
    snoozed_until: Option<DateTime<Utc>>,
}

/// Shared across producers; all methods take `&self`.
#[derive(Debug)]
pub struct NotificationThrottle {
    min_interval: TimeDelta,
    per_key: Mutex<HashMap<String, KeyState>>,
}

impl NotificationThrottle {
    pub fn new(min_interval_ms: u64) -> Result<Self, DetectError> {
        Ok(Self {
            min_interval: positive_millis("min_interval_ms", min_interval_ms)?,
            per_key: Mutex::new(HashMap::new()),
        })
    }

    pub fn min_interval(&self) -> TimeDelta {
        self.min_interval
    }

    /// Permit a firing for `key` at `now`, recording it. A denied attempt
    /// leaves the state untouched.
    pub fn try_fire(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut per_key = self.per_key.lock().unwrap_or_else(PoisonError::into_inner);
        let state = per_key.get(key).copied().unwrap_or_default();

        if let Some(until) = state.snoozed_until {
            if now < until {
                tracing::debug!(key, snoozed_until = %until, "alert dropped: snoozed");
                return false;
            }
        }
        if let Some(last) = state.last_fired_at {
            if now - last < self.min_interval {
                tracing::debug!(
                    key,
                    since_last_ms = (now - last).num_milliseconds(),
                    "alert dropped: throttled"
                );
                return false;
            }
        }

        per_key.insert(
            key.to_owned(),
            KeyState {
                last_fired_at: Some(now),
                snoozed_until: None,
            },
        );
        true
    }

    /// Deny `key` until `until`, independent of the minimum interval.
    pub fn snooze(&self, key: &str, until: DateTime<Utc>) {
        let mut per_key = self.per_key.lock().unwrap_or_else(PoisonError::into_inner);
        per_key.entry(key.to_owned()).or_default().snoozed_until = Some(until);
    }

    /// When `key` last fired, if ever.
    pub fn last_fired_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.per_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|s| s.last_fired_at)
    }

    pub fn forget(&self, key: &str) -> bool {
        self.per_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn clear(&self) {
        self.per_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
            + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(NotificationThrottle::new(0).is_err());
    }

    #[test]
    fn spacing_boundary() {
        let t = NotificationThrottle::new(30_000).expect("valid");
        assert!(t.try_fire("presence", at(0)));
        assert!(!t.try_fire("presence", at(29_999)));
        assert!(t.try_fire("presence", at(30_000)));
    }

    #[test]
    fn denied_attempt_does_not_extend_window() {
        let t = NotificationThrottle::new(10_000).expect("valid");
        assert!(t.try_fire("k", at(0)));
        assert!(!t.try_fire("k", at(9_000)));
        assert_eq!(t.last_fired_at("k"), Some(at(0)));
        assert!(t.try_fire("k", at(10_000)));
    }

    #[test]
    fn keys_are_independent() {
        let t = NotificationThrottle::new(10_000).expect("valid");
        assert!(t.try_fire(&channel_key("cam-1"), at(0)));
        assert!(t.try_fire(&channel_key("cam-2"), at(1)));
        assert!(t.try_fire(&bssid_key("AA:BB:CC:00:11:22"), at(2)));
        assert!(!t.try_fire(&channel_key("cam-1"), at(3)));
    }

    #[test]
    fn bssid_key_normalises_case() {
        assert_eq!(bssid_key("AA:BB:CC:00:11:22"), "bssid:aa:bb:cc:00:11:22");
    }

    #[test]
    fn snooze_blocks_until_deadline() {
        let t = NotificationThrottle::new(1_000).expect("valid");
        t.snooze(PRESENCE_KEY, at(60_000));
        assert!(!t.try_fire(PRESENCE_KEY, at(59_999)));
        assert!(t.try_fire(PRESENCE_KEY, at(60_000)));
        // Other keys unaffected.
        assert!(t.try_fire(INTRUSION_KEY, at(0)));
    }

    #[test]
    fn forget_and_clear() {
        let t = NotificationThrottle::new(10_000).expect("valid");
        t.try_fire("a", at(0));
        t.try_fire("b", at(0));
        assert!(t.forget("a"));
        assert!(t.try_fire("a", at(1)));
        t.clear();
        assert!(t.try_fire("b", at(2)));
    }
}
