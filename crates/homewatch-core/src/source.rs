//! Evidence producer contract.
//!
//! Scanning, frame classification and sensor acquisition live outside the
//! core. They either answer a poll or push samples into an [`EvidenceSink`].

use chrono::{DateTime, Utc};

use crate::error::DetectError;
use crate::types::{EvidenceSample, SourceKind};

/// Pull-style producer, polled once per tick by its owning task.
pub trait SignalSource: Send {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Current evidence. A [`DetectError::TransientSource`] is treated as
    /// absence for this tick.
    fn poll(&mut self, now: DateTime<Utc>) -> Result<EvidenceSample, DetectError>;
}

/// Push-style delivery target for producers that report asynchronously.
pub trait EvidenceSink: Send + Sync {
    /// Returns `false` if the sample was discarded (receiver gone or busy).
    fn push(&self, sample: EvidenceSample) -> bool;
}

/// Scripted source returning canned samples in order; absence once drained.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    source_id: String,
    kind: SourceKind,
    script: std::collections::VecDeque<Result<bool, String>>,
}

impl ScriptedSource {
    pub fn new(
        source_id: impl Into<String>,
        kind: SourceKind,
        script: impl IntoIterator<Item = Result<bool, String>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            script: script.into_iter().collect(),
        }
    }
}

impl SignalSource for ScriptedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn poll(&mut self, now: DateTime<Utc>) -> Result<EvidenceSample, DetectError> {
        match self.script.pop_front() {
            Some(Ok(present)) => Ok(EvidenceSample::new(self.source_id.clone(), present, now)),
            Some(Err(detail)) => Err(DetectError::TransientSource {
                source_id: self.source_id.clone(),
                detail,
            }),
            None => Ok(EvidenceSample::new(self.source_id.clone(), false, now)),
        }
    }
}
