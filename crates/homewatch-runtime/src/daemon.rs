//! Live daemon: JSON-lines evidence on stdin, alerts on stdout.
//!
//! Task layout:
//! - the reader routes each record; scans and acknowledgements are applied
//!   inline against the shared [`Monitor`]
//! - one task per camera channel owns its detector and evaluates only the
//!   latest frame (`watch`)
//! - one motion task owns the intrusion monitor; arm/disarm/power events
//!   queue, accelerometer samples are dropped while one is in flight
//! - a ticker evaluates presence edges and prunes the alert ledger

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use homewatch_core::{InFlightGate, InFlightPermit};
use homewatch_daemon::{
    Acknowledgement, AlertDispatcher, AlertKind, ChannelDetector, IntrusionMonitor, Monitor,
};

use crate::cli::DaemonOpts;
use crate::config::AppConfig;
use crate::dispatch::{LogDispatcher, log_confirmation};
use crate::input::{self, Record, SnapshotRef};

pub async fn run_daemon(opts: DaemonOpts, config: AppConfig) -> anyhow::Result<()> {
    let tick_ms = opts.tick_ms.unwrap_or(config.runtime.tick_ms);
    if tick_ms == 0 {
        anyhow::bail!("--tick-ms must be greater than zero");
    }
    let retention = TimeDelta::try_milliseconds(
        i64::try_from(config.runtime.alert_retention_ms).context("alert_retention_ms")?,
    )
    .context("alert_retention_ms out of range")?;

    let dispatcher: Arc<dyn AlertDispatcher> = Arc::new(LogDispatcher::stdout());
    let monitor = Monitor::start(config.monitor_config(), dispatcher)?;

    let mut ticker = tokio::spawn(run_presence_ticker(
        Arc::clone(&monitor),
        Duration::from_millis(tick_ms),
        retention,
    ));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let input = drive(stdin, Arc::clone(&monitor), config.runtime.control_queue);

    tokio::select! {
        result = input => {
            result?;
            tracing::info!("input closed, shutting down");
        }
        result = shutdown_signal() => result?,
        _ = &mut ticker => {
            tracing::warn!("presence ticker exited unexpectedly");
        }
    }

    ticker.abort();
    monitor.stop();
    tracing::info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("registering SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("listening for ctrl-c")?;
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("listening for ctrl-c")?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}

async fn run_presence_ticker(monitor: Arc<Monitor>, every: Duration, retention: TimeDelta) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        monitor.evaluate_presence(now);
        let pruned = monitor.prune_alerts(now - retention);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned resolved alerts");
        }
    }
}

/// Route every record from `input` until EOF, then drain the producer tasks.
pub async fn drive<R>(input: R, monitor: Arc<Monitor>, control_queue: usize) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut router = Router::start(monitor, control_queue)?;
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("reading input")? {
        match input::parse_line(&line) {
            Ok(Some(parsed)) => {
                let now = parsed.timestamp().unwrap_or_else(Utc::now);
                router.route(parsed.record, now).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("skipping malformed record: {e}"),
        }
    }
    router.shutdown().await;
    Ok(())
}

// ─── Routing ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Verdict {
    Person {
        person: bool,
        snapshot: Option<SnapshotRef>,
    },
    Failed(String),
}

#[derive(Debug, Clone)]
struct FrameReading {
    at: DateTime<Utc>,
    verdict: Verdict,
}

#[derive(Debug)]
enum MotionCommand {
    Arm(DateTime<Utc>),
    Disarm(DateTime<Utc>),
    PowerDisconnected(DateTime<Utc>),
    Ack {
        alert_id: String,
        ack: Acknowledgement,
        at: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct SensorReading {
    x: f64,
    y: f64,
    z: f64,
    at: DateTime<Utc>,
    /// Released once the motion task has evaluated this sample.
    _permit: InFlightPermit,
}

struct ChannelTask {
    frames: watch::Sender<Option<FrameReading>>,
    handle: JoinHandle<()>,
}

struct Router {
    monitor: Arc<Monitor>,
    channels: HashMap<String, ChannelTask>,
    commands: mpsc::Sender<MotionCommand>,
    sensors: mpsc::Sender<SensorReading>,
    sensor_gate: InFlightGate,
    motion: JoinHandle<()>,
}

impl Router {
    fn start(monitor: Arc<Monitor>, control_queue: usize) -> anyhow::Result<Self> {
        let intrusion = monitor.intrusion()?;
        let (commands, command_rx) = mpsc::channel(control_queue.max(1));
        // The gate admits one sample at a time, so one slot suffices.
        let (sensors, sensor_rx) = mpsc::channel(1);
        let motion = tokio::spawn(run_motion(intrusion, command_rx, sensor_rx));
        Ok(Self {
            monitor,
            channels: HashMap::new(),
            commands,
            sensors,
            sensor_gate: InFlightGate::new(),
            motion,
        })
    }

    async fn route(&mut self, record: Record, now: DateTime<Utc>) {
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
            } => self.frame(&channel_id, now, Verdict::Person { person, snapshot }),
            Record::FrameError { channel_id, detail } => {
                self.frame(&channel_id, now, Verdict::Failed(detail));
            }
            Record::Sensor { x, y, z } => self.sensor(x, y, z, now),
            Record::PowerDisconnected => self.command(MotionCommand::PowerDisconnected(now)).await,
            Record::Arm => self.command(MotionCommand::Arm(now)).await,
            Record::Disarm => self.command(MotionCommand::Disarm(now)).await,
            Record::StopSource { source_id } => self.stop_source(&source_id).await,
            Record::Ack {
                alert_id,
                snooze_until_ms,
            } => {
                let Some(ack) = input::acknowledgement(snooze_until_ms) else {
                    tracing::warn!(alert_id, "ack with invalid snooze_until_ms ignored");
                    return;
                };
                let is_intrusion = self
                    .monitor
                    .alert(&alert_id)
                    .is_some_and(|a| matches!(a.kind, AlertKind::Intrusion { .. }));
                if is_intrusion {
                    self.command(MotionCommand::Ack {
                        alert_id,
                        ack,
                        at: now,
                    })
                    .await;
                } else if let Err(e) = self.monitor.acknowledge(&alert_id, ack, now) {
                    tracing::warn!("ack ignored: {e}");
                }
            }
        }
    }

    fn frame(&mut self, channel_id: &str, at: DateTime<Utc>, verdict: Verdict) {
        if !self.channels.contains_key(channel_id) {
            let detector = match self.monitor.channel(channel_id) {
                Ok(detector) => detector,
                Err(e) => {
                    tracing::warn!(channel_id, "cannot start channel: {e}");
                    return;
                }
            };
            let (frames, frame_rx) = watch::channel(None);
            let handle = tokio::spawn(run_channel(detector, frame_rx));
            self.channels
                .insert(channel_id.to_owned(), ChannelTask { frames, handle });
        }
        if let Some(task) = self.channels.get(channel_id) {
            task.frames.send_replace(Some(FrameReading { at, verdict }));
        }
    }

    fn sensor(&self, x: f64, y: f64, z: f64, at: DateTime<Utc>) {
        let Some(permit) = self.sensor_gate.try_enter() else {
            tracing::trace!(
                dropped = self.sensor_gate.dropped(),
                "sensor sample dropped, previous still in flight"
            );
            return;
        };
        let reading = SensorReading {
            x,
            y,
            z,
            at,
            _permit: permit,
        };
        if self.sensors.try_send(reading).is_err() {
            tracing::debug!("motion task unavailable, sensor sample dropped");
        }
    }

    async fn command(&self, command: MotionCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("motion task has exited; command dropped");
        }
    }

    async fn stop_source(&mut self, source_id: &str) {
        match self.channels.remove(source_id) {
            Some(task) => {
                drop(task.frames);
                if let Err(e) = task.handle.await {
                    tracing::warn!(channel_id = source_id, "channel task failed: {e}");
                }
            }
            None => {
                self.monitor.stop_source(source_id);
            }
        }
    }

    /// Close every producer queue and wait for the tasks to finish their
    /// pending work.
    async fn shutdown(self) {
        let Self {
            channels,
            commands,
            sensors,
            motion,
            ..
        } = self;
        drop(commands);
        drop(sensors);
        for (channel_id, task) in channels {
            drop(task.frames);
            if let Err(e) = task.handle.await {
                tracing::warn!(channel_id, "channel task failed: {e}");
            }
        }
        if let Err(e) = motion.await {
            tracing::warn!("motion task failed: {e}");
        }
    }
}

// ─── Producer tasks ─────────────────────────────────────────────────

async fn run_channel(
    mut detector: ChannelDetector,
    mut frames: watch::Receiver<Option<FrameReading>>,
) {
    detector.on_confirmed(log_confirmation);
    while frames.changed().await.is_ok() {
        let Some(reading) = frames.borrow_and_update().clone() else {
            continue;
        };
        match reading.verdict {
            Verdict::Person { person, snapshot } => {
                let snapshot = snapshot
                    .filter(|_| person)
                    .and_then(|s| s.load(reading.at));
                detector.observe(person, reading.at, snapshot);
            }
            Verdict::Failed(detail) => {
                detector.observe_failure(reading.at, &detail);
            }
        }
    }
    detector.stop();
}

async fn run_motion(
    mut intrusion: IntrusionMonitor,
    mut commands: mpsc::Receiver<MotionCommand>,
    mut sensors: mpsc::Receiver<SensorReading>,
) {
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    MotionCommand::Arm(at) => intrusion.arm(at),
                    MotionCommand::Disarm(at) => {
                        intrusion.disarm(at);
                    }
                    MotionCommand::PowerDisconnected(at) => {
                        intrusion.on_power_disconnected(at);
                    }
                    MotionCommand::Ack { alert_id, ack, at } => {
                        if let Err(e) = intrusion.acknowledge(&alert_id, ack, at) {
                            tracing::warn!("ack ignored: {e}");
                        }
                    }
                }
            }
            Some(reading) = sensors.recv() => {
                intrusion.on_sensor_sample(reading.x, reading.y, reading.z, reading.at);
            }
        }
    }
    tracing::debug!("motion task stopped");
}
