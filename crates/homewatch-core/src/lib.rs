//! homewatch-core: temporal detection engines.
//! Debounce confirmation, multi-source presence fusion, motion intrusion
//! confirmation and notification throttling as pure, clock-injected state
//! machines. No async, no IO.

pub mod confirmer;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod health;
pub mod motion;
pub mod source;
pub mod throttle;
pub mod types;

pub use confirmer::{ConfirmedEvent, ConfirmerConfig, DebounceConfirmer, DetectionState};
pub use error::DetectError;
pub use fusion::{PresenceFusion, PresenceSnapshot};
pub use gate::{InFlightGate, InFlightPermit};
pub use health::{HealthPolicy, SourceHealth, SourceHealthState, SourceReading, transition_health};
pub use motion::{
    Disarmed, IntrusionCause, IntrusionEvent, MotionConfig, MotionIntrusionConfirmer, Vector3,
};
pub use source::{EvidenceSink, ScriptedSource, SignalSource};
pub use throttle::NotificationThrottle;
pub use types::{EvidenceSample, SourceKind};
