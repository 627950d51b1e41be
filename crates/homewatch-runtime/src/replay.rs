//! Deterministic replay of recorded evidence.
//!
//! Records are applied in file order on a virtual clock taken from their
//! `at_ms`. Presence is evaluated on every tick boundary the clock crosses,
//! so departures surface exactly as they would have live.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};

use homewatch_daemon::{
    AlertDispatcher, AlertKind, ChannelDetector, IntrusionMonitor, Monitor, MonitorError,
};

use crate::config::AppConfig;
use crate::dispatch::log_confirmation;
use crate::input::{self, InputLine, Record};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub skipped: usize,
    pub ticks: usize,
}

/// Single-threaded owner of every detector for one replay.
pub struct Session {
    monitor: Arc<Monitor>,
    channels: HashMap<String, ChannelDetector>,
    intrusion: IntrusionMonitor,
    tick: TimeDelta,
    retention: TimeDelta,
    next_tick: Option<DateTime<Utc>>,
    summary: ReplaySummary,
}

impl Session {
    pub fn new(config: &AppConfig, dispatcher: Arc<dyn AlertDispatcher>) -> anyhow::Result<Self> {
        let monitor = Monitor::start(config.monitor_config(), dispatcher)?;
        let intrusion = monitor.intrusion()?;
        Ok(Self {
            monitor,
            channels: HashMap::new(),
            intrusion,
            tick: millis(config.runtime.tick_ms)?,
            retention: millis(config.runtime.alert_retention_ms)?,
            next_tick: None,
            summary: ReplaySummary::default(),
        })
    }

    #[cfg(test)]
    fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Apply one timestamped line. Ticks before it are evaluated first; a
    /// tick landing on the record's own timestamp sees the record.
    pub fn apply(&mut self, line: InputLine) -> anyhow::Result<()> {
        let now = line
            .timestamp()
            .context("replay records need a valid at_ms")?;
        if self.next_tick.is_some_and(|next| now < next - self.tick) {
            anyhow::bail!("record at {now} is earlier than the replay clock");
        }
        self.advance(now, false);
        self.apply_record(line.record, now)?;
        self.advance(now, true);
        self.summary.applied += 1;
        Ok(())
    }

    fn advance(&mut self, now: DateTime<Utc>, inclusive: bool) {
        let mut next = self.next_tick.unwrap_or(now);
        while next < now || (inclusive && next == now) {
            self.monitor.evaluate_presence(next);
            self.summary.ticks += 1;
            next += self.tick;
        }
        self.next_tick = Some(next);
        if inclusive {
            self.monitor.prune_alerts(now - self.retention);
        }
    }

    fn apply_record(&mut self, record: Record, now: DateTime<Utc>) -> Result<(), MonitorError> {
        match record {
            Record::Scan {
                source_id,
                kind,
                present,
                bssid,
                details,
            } => input::apply_scan(
                &self.monitor,
                &source_id,
                kind,
                present,
                bssid.as_deref(),
                &details,
                now,
            ),
            Record::Frame {
                channel_id,
                person,
                snapshot,
            } => {
                let snapshot = snapshot.filter(|_| person).and_then(|s| s.load(now));
                self.channel(&channel_id)?.observe(person, now, snapshot);
            }
            Record::FrameError { channel_id, detail } => {
                self.channel(&channel_id)?.observe_failure(now, &detail);
            }
            Record::Sensor { x, y, z } => {
                self.intrusion.on_sensor_sample(x, y, z, now);
            }
            Record::PowerDisconnected => {
                self.intrusion.on_power_disconnected(now);
            }
            Record::Arm => self.intrusion.arm(now),
            Record::Disarm => {
                self.intrusion.disarm(now);
            }
            Record::StopSource { source_id } => {
                if let Some(detector) = self.channels.remove(&source_id) {
                    detector.stop();
                } else {
                    self.monitor.stop_source(&source_id);
                }
            }
            Record::Ack {
                alert_id,
                snooze_until_ms,
            } => {
                let Some(ack) = input::acknowledgement(snooze_until_ms) else {
                    tracing::warn!(alert_id, "ack with invalid snooze_until_ms ignored");
                    return Ok(());
                };
                let is_intrusion = self
                    .monitor
                    .alert(&alert_id)
                    .is_some_and(|a| matches!(a.kind, AlertKind::Intrusion { .. }));
                if is_intrusion {
                    self.intrusion.acknowledge(&alert_id, ack, now)?;
                } else {
                    self.monitor.acknowledge(&alert_id, ack, now)?;
                }
            }
        }
        Ok(())
    }

    fn channel(&mut self, channel_id: &str) -> Result<&mut ChannelDetector, MonitorError> {
        match self.channels.entry(channel_id.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut detector = self.monitor.channel(channel_id)?;
                detector.on_confirmed(log_confirmation);
                Ok(entry.insert(detector))
            }
        }
    }
}

fn millis(ms: u64) -> anyhow::Result<TimeDelta> {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .with_context(|| format!("{ms}ms is out of range"))
}

/// Replay every line of `reader`. Malformed or untimed lines are logged and
/// skipped; engine errors (unknown alert) are logged and skipped too.
pub fn replay_lines(session: &mut Session, reader: impl BufRead) -> anyhow::Result<ReplaySummary> {
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("reading replay input")?;
        let lineno = index + 1;
        let parsed = match input::parse_line(&line) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(lineno, "skipping malformed record: {e}");
                session.summary.skipped += 1;
                continue;
            }
        };
        if let Err(e) = session.apply(parsed) {
            tracing::warn!(lineno, "skipping record: {e:#}");
            session.summary.skipped += 1;
        }
    }
    Ok(session.summary)
}

pub fn run_replay(
    path: &Path,
    config: &AppConfig,
    dispatcher: Arc<dyn AlertDispatcher>,
) -> anyhow::Result<ReplaySummary> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening replay file {}", path.display()))?;
    let mut session = Session::new(config, dispatcher)?;
    let summary = replay_lines(&mut session, std::io::BufReader::new(file))?;
    tracing::info!(
        applied = summary.applied,
        skipped = summary.skipped,
        ticks = summary.ticks,
        "replay finished"
    );
    Ok(summary)
}
