use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use homewatch_core::ConfirmerConfig;
use homewatch_daemon::{
    Acknowledgement, AlertKind, ChannelConfirmation, Dispatched, EvidenceSnapshot, Monitor,
    MonitorConfig, PresenceConfig, RecordingDispatcher, ThrottleConfig,
};

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
        .expect("valid RFC3339")
        .with_timezone(&Utc)
        + TimeDelta::milliseconds(ms)
}

fn config() -> MonitorConfig {
    MonitorConfig {
        presence: PresenceConfig {
            decay_ms: 30_000,
            announce_departures: true,
        },
        person: ConfirmerConfig::new(5_000, 1_000, 60_000),
        throttle: ThrottleConfig {
            min_interval_ms: 10_000,
        },
        ..MonitorConfig::default()
    }
}

#[test]
fn camera_confirmation_drives_household_presence() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let monitor = Monitor::start(config(), dispatcher.clone()).expect("monitor");
    let mut front = monitor.channel("front").expect("channel");

    let confirmations: Arc<Mutex<Vec<ChannelConfirmation>>> = Arc::default();
    let sink = Arc::clone(&confirmations);
    front.on_confirmed(move |c| sink.lock().expect("lock").push(c));

    // Ticks every second; the classifier misses one frame at 2000 and
    // recovers at 2500.
    let mut script = vec![(0, true), (1_000, true), (2_000, false), (2_500, true)];
    script.extend((3_000..=70_000).step_by(1_000).map(|ms| (ms, true)));
    for (ms, person) in script {
        let snapshot = person.then(|| EvidenceSnapshot {
            captured_at: at(ms),
            content_type: "image/jpeg".into(),
            bytes: vec![0xff, 0xd8],
        });
        front.observe(person, at(ms), snapshot);
        if ms % 1_000 == 0 {
            monitor.evaluate_presence(at(ms));
        }
    }

    let confirmations = confirmations.lock().expect("lock");
    let times: Vec<DateTime<Utc>> = confirmations.iter().map(|c| c.event.confirmed_at).collect();
    assert_eq!(times, vec![at(6_000), at(66_000)]);
    assert_eq!(
        confirmations[0].snapshot.as_ref().map(|s| s.captured_at),
        Some(at(6_000))
    );

    // Fusion only hears from the channel on confirmation, so presence
    // lapses one decay window after each.
    let presence: Vec<(bool, DateTime<Utc>)> = dispatcher
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Dispatched::Presence { alert, present, .. } => Some((present, alert.created_at)),
            _ => None,
        })
        .collect();
    assert_eq!(presence, vec![(true, at(6_000)), (false, at(36_000)), (true, at(66_000))]);
}

#[test]
fn network_and_camera_sources_fuse() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let monitor = Monitor::start(config(), dispatcher.clone()).expect("monitor");

    monitor.report_network("wifi", "aa:bb:cc:dd:ee:ff", at(0), "HomeAP");
    monitor.report("bluetooth", true, at(10_000), "Phone");
    assert!(monitor.evaluate_presence(at(10_000)).present);

    // Wi-Fi lapses at 30000 but Bluetooth keeps presence until 40000.
    assert!(monitor.evaluate_presence(at(35_000)).present);
    assert_eq!(
        monitor.describe(at(35_000)),
        "present: bluetooth (Phone) seen 25.0s ago; wifi (HomeAP) expired, seen 35.0s ago"
    );
    assert!(!monitor.evaluate_presence(at(40_000)).present);

    // A device dropping out and back reappears as a new network alert once
    // the per-BSSID throttle allows it.
    monitor.report_network("wifi", "AA:BB:CC:DD:EE:FF", at(45_000), "HomeAP");
    let seen = dispatcher
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(c, Dispatched::Alert(a)
                if matches!(a.kind, AlertKind::NetworkSeen { .. }))
        })
        .count();
    assert_eq!(seen, 2);
}

#[test]
fn snoozed_arrivals_stay_quiet_until_deadline() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let monitor = Monitor::start(config(), dispatcher.clone()).expect("monitor");

    monitor.report("wifi", true, at(0), "");
    monitor.evaluate_presence(at(0));
    let arrival = monitor.unresolved_alerts().remove(0);
    monitor
        .acknowledge(
            &arrival.alert_id,
            Acknowledgement::Snooze {
                until: at(120_000),
            },
            at(1_000),
        )
        .expect("ack");

    for round in 1..=3 {
        let start = round * 40_000;
        monitor.report("wifi", true, at(start), "");
        monitor.evaluate_presence(at(start));
        monitor.evaluate_presence(at(start + 30_000));
    }

    let arrivals: Vec<DateTime<Utc>> = dispatcher
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Dispatched::Presence {
                alert,
                present: true,
                ..
            } => Some(alert.created_at),
            _ => None,
        })
        .collect();
    assert_eq!(arrivals, vec![at(0), at(120_000)]);
}

#[test]
fn armed_device_lifecycle() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let monitor = Monitor::start(config(), dispatcher.clone()).expect("monitor");
    let mut intrusion = monitor.intrusion().expect("intrusion");

    intrusion.arm(at(0));
    assert!(intrusion.on_sensor_sample(0.0, 0.0, 9.8, at(1_000)).is_none());
    assert!(intrusion.on_sensor_sample(5.0, 0.0, 9.8, at(2_000)).is_none());
    assert!(intrusion.on_sensor_sample(5.0, 0.0, 9.8, at(5_500)).is_none());
    let alert = intrusion
        .on_sensor_sample(0.0, 0.0, 9.8, at(6_000))
        .expect("intrusion at 6000");
    assert!(matches!(alert.kind, AlertKind::Intrusion { .. }));

    let outcome = intrusion.disarm(at(8_000));
    assert!(outcome.silence_alert);
    assert!(monitor.unresolved_alerts().is_empty());

    let calls = dispatcher.calls();
    assert!(matches!(calls.first(), Some(Dispatched::Intrusion { .. })));
    assert_eq!(calls.last(), Some(&Dispatched::Silenced(alert.alert_id)));
}
