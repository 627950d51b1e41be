//! Multi-source presence fusion with timestamp decay.
//!
//! Each source contributes only positive sightings. A source keeps the
//! household "present" for `decay` after its most recent sighting; the
//! fused answer is false only once every source has lapsed. Sources scan at
//! different cadences (Wi-Fi every few seconds, Bluetooth every ten), so the
//! absence of a report is never treated as evidence of absence.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DetectError;
use crate::types::{format_age, positive_millis};

/// Default decay window (milliseconds).
pub const DEFAULT_DECAY_MS: u64 = 30_000;

// ─── Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sighting {
    last_detected_at: DateTime<Utc>,
    details: String,
}

/// Result of [`PresenceFusion::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub present: bool,
    /// The fused answer differs from the previous evaluation.
    pub changed: bool,
    /// When the current answer was first observed.
    pub since: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FusionInner {
    per_source: HashMap<String, Sighting>,
    last_state: Option<(bool, DateTime<Utc>)>,
}

// ─── PresenceFusion ─────────────────────────────────────────────────

/// Shared across producers; all methods take `&self`.
#[derive(Debug)]
pub struct PresenceFusion {
    decay: TimeDelta,
    inner: RwLock<FusionInner>,
}

impl PresenceFusion {
    pub fn new(decay_ms: u64) -> Result<Self, DetectError> {
        Ok(Self {
            decay: positive_millis("decay_ms", decay_ms)?,
            inner: RwLock::new(FusionInner::default()),
        })
    }

    pub fn decay(&self) -> TimeDelta {
        self.decay
    }

    /// Record a sighting. `present = false` is a no-op.
    pub fn report(&self, source_id: &str, present: bool, now: DateTime<Utc>) {
        self.report_with_details(source_id, present, now, "");
    }

    /// Record a sighting with a diagnostic note (SSID, device name).
    ///
    /// Returns `true` when the source was absent or lapsed before this
    /// report, i.e. it has just started contributing to presence.
    pub fn report_with_details(
        &self,
        source_id: &str,
        present: bool,
        now: DateTime<Utc>,
        details: &str,
    ) -> bool {
        if !present {
            return false;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.per_source.get_mut(source_id) {
            Some(sighting) if now < sighting.last_detected_at => {
                tracing::debug!(
                    source_id,
                    observed_at = %now,
                    last_detected_at = %sighting.last_detected_at,
                    "ignoring stale sighting"
                );
                false
            }
            Some(sighting) => {
                let lapsed = now - sighting.last_detected_at >= self.decay;
                sighting.last_detected_at = now;
                if !details.is_empty() {
                    sighting.details = details.to_owned();
                }
                lapsed
            }
            None => {
                tracing::debug!(source_id, "new presence source");
                inner.per_source.insert(
                    source_id.to_owned(),
                    Sighting {
                        last_detected_at: now,
                        details: details.to_owned(),
                    },
                );
                true
            }
        }
    }

    /// True iff some source was seen less than `decay` ago.
    pub fn is_present(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        self.any_fresh(&inner, now)
    }

    /// Fused answer plus edge detection against the previous evaluation.
    pub fn evaluate(&self, now: DateTime<Utc>) -> PresenceSnapshot {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let present = self.any_fresh(&inner, now);
        let (changed, since) = match inner.last_state {
            Some((previous, since)) if previous == present => (false, since),
            // The very first evaluation is only an edge when someone is there.
            None => (present, now),
            Some(_) => (true, now),
        };
        inner.last_state = Some((present, since));
        PresenceSnapshot {
            present,
            changed,
            since,
        }
    }

    /// Last fused answer recorded by [`evaluate`](Self::evaluate).
    pub fn last_state(&self) -> Option<(bool, DateTime<Utc>)> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_state
    }

    /// Sources currently keeping presence alive, freshest first.
    pub fn active_sources(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut fresh: Vec<(&String, &Sighting)> = inner
            .per_source
            .iter()
            .filter(|(_, s)| self.is_fresh(s, now))
            .collect();
        fresh.sort_by(|a, b| b.1.last_detected_at.cmp(&a.1.last_detected_at));
        fresh.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Human-readable justification of the current answer.
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if inner.per_source.is_empty() {
            return "absent: no sources have reported".to_string();
        }

        let mut entries: Vec<(&String, &Sighting)> = inner.per_source.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let parts: Vec<String> = entries
            .into_iter()
            .map(|(id, s)| {
                let age = format_age(now - s.last_detected_at);
                let status = if self.is_fresh(s, now) {
                    "seen"
                } else {
                    "expired, seen"
                };
                if s.details.is_empty() {
                    format!("{id} {status} {age} ago")
                } else {
                    format!("{id} ({}) {status} {age} ago", s.details)
                }
            })
            .collect();

        let verdict = if self.any_fresh(&inner, now) {
            "present"
        } else {
            "absent"
        };
        format!("{verdict}: {}", parts.join("; "))
    }

    /// Drop a source entirely (monitoring of it stopped).
    pub fn forget(&self, source_id: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .per_source
            .remove(source_id)
            .is_some()
    }

    /// Drop every source and the recorded edge state.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.per_source.clear();
        inner.last_state = None;
    }

    pub fn source_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .per_source
            .len()
    }

    fn is_fresh(&self, sighting: &Sighting, now: DateTime<Utc>) -> bool {
        now - sighting.last_detected_at < self.decay
    }

    fn any_fresh(&self, inner: &FusionInner, now: DateTime<Utc>) -> bool {
        inner.per_source.values().any(|s| self.is_fresh(s, now))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
            + TimeDelta::milliseconds(ms)
    }

    fn fusion(decay_ms: u64) -> PresenceFusion {
        PresenceFusion::new(decay_ms).expect("valid decay")
    }

    #[test]
    fn zero_decay_rejected() {
        assert!(PresenceFusion::new(0).is_err());
    }

    #[test]
    fn empty_fusion_is_absent() {
        let f = fusion(10_000);
        assert!(!f.is_present(at(0)));
        assert_eq!(f.describe(at(0)), "absent: no sources have reported");
    }

    #[test]
    fn single_report_decays_at_window() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        assert!(f.is_present(at(0)));
        assert!(f.is_present(at(9_999)));
        assert!(!f.is_present(at(10_000)));
        assert!(!f.is_present(at(20_000)));
    }

    #[test]
    fn false_report_does_not_refresh() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        f.report("wifi", false, at(8_000));
        assert!(!f.is_present(at(10_000)));
    }

    #[test]
    fn false_report_does_not_register_source() {
        let f = fusion(10_000);
        f.report("bt", false, at(0));
        assert_eq!(f.source_count(), 0);
    }

    #[test]
    fn later_report_extends_window() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        f.report("wifi", true, at(6_000));
        assert!(f.is_present(at(15_000)));
        assert!(!f.is_present(at(16_000)));
    }

    #[test]
    fn report_flags_newly_fresh_sources() {
        let f = fusion(10_000);
        assert!(f.report_with_details("wifi", true, at(0), ""));
        assert!(!f.report_with_details("wifi", true, at(5_000), ""));
        assert!(!f.report_with_details("wifi", false, at(6_000), ""));
        // Lapsed at 15000, so the next sighting counts as new.
        assert!(f.report_with_details("wifi", true, at(15_000), ""));
    }

    #[test]
    fn stale_report_does_not_move_backwards() {
        let f = fusion(10_000);
        f.report("wifi", true, at(6_000));
        f.report("wifi", true, at(1_000));
        assert!(f.is_present(at(15_000)));
    }

    #[test]
    fn disjoint_windows_cover_union() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        f.report("bluetooth", true, at(8_000));
        for ms in (0..18_000).step_by(500) {
            assert!(f.is_present(at(ms)), "gap at {ms}");
        }
        assert!(!f.is_present(at(18_000)));
    }

    #[test]
    fn one_source_expiring_does_not_force_absence() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        f.report("bluetooth", true, at(5_000));
        assert!(f.is_present(at(12_000)));
        assert_eq!(f.active_sources(at(12_000)), vec!["bluetooth".to_string()]);
    }

    #[test]
    fn active_sources_sorted_freshest_first() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        f.report("bluetooth", true, at(2_000));
        assert_eq!(
            f.active_sources(at(3_000)),
            vec!["bluetooth".to_string(), "wifi".to_string()]
        );
    }

    #[test]
    fn evaluate_reports_edges() {
        let f = fusion(10_000);
        let s0 = f.evaluate(at(0));
        assert!(!s0.present);
        assert!(!s0.changed);

        f.report("wifi", true, at(1_000));
        let s1 = f.evaluate(at(1_000));
        assert!(s1.present && s1.changed);
        assert_eq!(s1.since, at(1_000));

        let s2 = f.evaluate(at(5_000));
        assert!(s2.present && !s2.changed);
        assert_eq!(s2.since, at(1_000));

        let s3 = f.evaluate(at(11_000));
        assert!(!s3.present && s3.changed);
        assert_eq!(f.last_state(), Some((false, at(11_000))));
    }

    #[test]
    fn first_evaluation_with_presence_is_an_edge() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        assert!(f.evaluate(at(0)).changed);
    }

    #[test]
    fn describe_lists_sources_with_details() {
        let f = fusion(10_000);
        f.report_with_details("wifi", true, at(0), "HomeAP");
        f.report("bluetooth", true, at(500));
        let text = f.describe(at(2_000));
        assert_eq!(
            text,
            "present: bluetooth seen 1.5s ago; wifi (HomeAP) seen 2.0s ago"
        );
        let later = f.describe(at(20_000));
        assert!(later.starts_with("absent: "));
        assert!(later.contains("wifi (HomeAP) expired, seen 20.0s ago"));
    }

    #[test]
    fn forget_drops_source() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        assert!(f.forget("wifi"));
        assert!(!f.forget("wifi"));
        assert!(!f.is_present(at(1)));
    }

    #[test]
    fn clear_resets_everything() {
        let f = fusion(10_000);
        f.report("wifi", true, at(0));
        f.evaluate(at(0));
        f.clear();
        assert_eq!(f.source_count(), 0);
        assert!(f.last_state().is_none());
    }

    #[test]
    fn concurrent_reports_and_reads() {
        let f = Arc::new(fusion(10_000));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    for step in 0..100 {
                        f.report(&format!("src-{i}"), true, at(step * 10));
                        let _ = f.is_present(at(step * 10));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread finished");
        }
        assert_eq!(f.source_count(), 4);
        assert!(f.is_present(at(1_000)));
    }
}
