//! homewatch-daemon: monitoring session wiring.
//!
//! Binds the core engines into a [`Monitor`] store shared by producers:
//! per-channel person detectors, the armed-device intrusion monitor, fused
//! household presence and the alert ledger with its dispatcher.

pub mod alert_routing;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod intrusion;
pub mod monitor;

pub use alert_routing::{
    Acknowledgement, AlertEntry, AlertKind, AlertRouter, AlertSeverity, Resolution,
};
pub use channel::{ChannelConfirmation, ChannelDetector, EvidenceSnapshot};
pub use dispatch::{AlertDispatcher, Dispatched, RecordingDispatcher};
pub use error::MonitorError;
pub use intrusion::IntrusionMonitor;
pub use monitor::{Monitor, MonitorConfig, PresenceConfig, ThrottleConfig};
