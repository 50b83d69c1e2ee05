use std::time::Duration;

use tokio::sync::watch;

use seven_link::sim::{Emulator, LoopbackConnector};
use seven_link::{AdapterState, ConnectionManager, LinkConfig};
use seven_poll::{Clock, PollLoop};
use seven_proto::UiSnapshot;
use seven_telemetry::{Fix, TelemetryStore};

const ADDR: &str = "00:06:66:4A:1B:2C";

struct FixedClock(u8, u8);

impl Clock for FixedClock {
    fn hour_minute(&self) -> (u8, u8) {
        (self.0, self.1)
    }
}

struct Rig {
    poll: PollLoop<LoopbackConnector, FixedClock, watch::Sender<UiSnapshot>>,
    emulator: Emulator,
    store: TelemetryStore,
    address: watch::Sender<Option<String>>,
    ui: watch::Receiver<UiSnapshot>,
}

fn rig(connector: LoopbackConnector, address: Option<&str>) -> Rig {
    let emulator = connector.emulator().clone();
    let store = TelemetryStore::new();
    let (address_tx, address_rx) = watch::channel(address.map(str::to_string));
    let (ui_tx, ui_rx) = watch::channel(UiSnapshot::default());
    let conn = ConnectionManager::new(connector, &LinkConfig::default());
    let poll = PollLoop::new(conn, store.clone(), address_rx, FixedClock(13, 5), ui_tx);
    Rig { poll, emulator, store, address: address_tx, ui: ui_rx }
}

fn ride(store: &TelemetryStore) {
    store.on_fix(&Fix { timestamp_ms: 1000, speed_mps: 10.0, altitude_m: 0.0, accuracy_m: 5.0 });
    store.on_fix(&Fix { timestamp_ms: 2000, speed_mps: 10.0, altitude_m: 0.0, accuracy_m: 5.0 });
}

#[tokio::test]
async fn connects_then_refreshes_display() {
    let mut r = rig(LoopbackConnector::new(Emulator::new(72)), Some(ADDR));
    ride(&r.store);

    let first = r.poll.cycle().await;
    assert!(first.connected);
    assert_eq!(first.temperature_f, 0);
    assert_eq!(r.emulator.display().commands, 0);

    let second = r.poll.cycle().await;
    assert!(second.connected);
    assert_eq!(second.temperature_f, 72);
    assert_eq!(second.device_address.as_deref(), Some(ADDR));
    assert!((second.speed_mph - 22.37).abs() < 0.01);
    assert!((second.distance_miles - 0.00621).abs() < 1e-5);

    let shown = r.emulator.display();
    assert_eq!(shown.commands, 4);
    assert_eq!((shown.hour, shown.minute), (1, 5));
    assert_eq!(shown.speed_tenths, 224);
    assert_eq!(shown.distance_tenths, 0);

    assert_eq!(*r.ui.borrow(), second);
}

#[tokio::test]
async fn failure_mid_cycle_disconnects_and_recovers() {
    // the emulated unit hangs up after set-time and set-speed
    let mut r = rig(LoopbackConnector::new(Emulator::new(72).fail_after(2)), Some(ADDR));
    ride(&r.store);

    assert!(r.poll.cycle().await.connected);

    let broken = r.poll.cycle().await;
    assert!(!broken.connected);
    assert!(!r.poll.is_connected());
    assert_eq!(broken.temperature_f, 0);
    assert_eq!(r.emulator.display().commands, 2);
    assert_eq!(r.emulator.display().distance_tenths, 0);

    assert!(r.poll.cycle().await.connected);
}

#[tokio::test]
async fn no_address_never_connects() {
    let mut r = rig(LoopbackConnector::new(Emulator::new(72)), None);
    for _ in 0..3 {
        let snap = r.poll.cycle().await;
        assert!(!snap.connected);
        assert_eq!(snap.device_address, None);
    }
    assert_eq!(r.emulator.display().commands, 0);

    r.address.send_replace(Some(ADDR.to_string()));
    assert!(r.poll.cycle().await.connected);
}

#[tokio::test]
async fn disabled_adapter_never_connects() {
    let connector = LoopbackConnector::new(Emulator::new(72)).with_adapter(AdapterState::Disabled);
    let mut r = rig(connector, Some(ADDR));
    for _ in 0..3 {
        assert!(!r.poll.cycle().await.connected);
    }
}

#[tokio::test]
async fn address_change_reconnects() {
    let mut r = rig(LoopbackConnector::new(Emulator::new(72)), Some(ADDR));
    assert!(r.poll.cycle().await.connected);

    r.address.send_replace(Some("00:06:66:00:00:99".to_string()));
    let snap = r.poll.cycle().await;
    assert!(snap.connected);
    assert_eq!(snap.device_address.as_deref(), Some("00:06:66:00:00:99"));

    r.address.send_replace(None);
    assert!(!r.poll.cycle().await.connected);
}

#[tokio::test(start_paused = true)]
async fn run_stops_and_disconnects() {
    let r = rig(LoopbackConnector::new(Emulator::new(55)), Some(ADDR));
    let mut ui = r.ui.clone();
    let emulator = r.emulator.clone();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut poll = r.poll.with_period(Duration::from_millis(1000));
    let task = tokio::spawn(async move {
        poll.run(stop_rx).await;
        poll
    });

    // wait until a reading has made it through
    loop {
        ui.changed().await.unwrap();
        if ui.borrow().temperature_f == 55 {
            break;
        }
    }
    assert_eq!(emulator.display().hangups, 0);
    stop_tx.send_replace(true);

    // the loop is still alive here, so only its own disconnect can have
    // closed the session
    let poll = task.await.unwrap();
    assert!(!poll.is_connected());
    assert!(emulator.display().commands >= 4);
    tokio::time::timeout(Duration::from_secs(1), async {
        while emulator.display().hangups == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session still open after stop");
    assert_eq!(emulator.display().hangups, 1);
    drop(poll);
}
