//! Keep-only-latest admission for asynchronous evidence callbacks.
//!
//! A classifier callback may deliver a new frame verdict while the previous
//! one is still being evaluated. Such samples are discarded, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct GateInner {
    busy: AtomicBool,
    dropped: AtomicU64,
}

/// Cloneable handle; clones share the same busy flag.
#[derive(Debug, Clone, Default)]
pub struct InFlightGate {
    inner: Arc<GateInner>,
}

/// Held while a sample is being evaluated. Dropping it reopens the gate.
#[derive(Debug)]
pub struct InFlightPermit {
    inner: Arc<GateInner>,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate, or `None` (sample dropped) if an evaluation is running.
    pub fn try_enter(&self) -> Option<InFlightPermit> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(InFlightPermit {
                inner: Arc::clone(&self.inner),
            })
        } else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Samples discarded since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_dropped_while_busy() {
        let gate = InFlightGate::new();
        let permit = gate.try_enter().expect("gate open");
        assert!(gate.is_busy());
        assert!(gate.try_enter().is_none());
        assert!(gate.clone().try_enter().is_none());
        assert_eq!(gate.dropped(), 2);
        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_enter().is_some());
    }
}
