//! The display refresh loop.
//!
//! One task owns the connection. Each cycle it either tries to connect or,
//! when connected, pushes clock, speed and distance to the unit and reads
//! its temperature sensor; then it publishes a [`UiSnapshot`] and sleeps.
//! Position fixes reach it only through the shared [`TelemetryStore`].

use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use seven_link::{ConnectionManager, Connector, LinkError, LinkErrorKind};
use seven_proto::{codec, SensorState, UiSnapshot};
use seven_telemetry::TelemetryStore;

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

/// Wall clock shown on the display.
pub trait Clock: Send + 'static {
    /// 24-hour hour and minute.
    fn hour_minute(&self) -> (u8, u8);
}

/// UTC shifted by a fixed offset.
///
/// The offset is captured up front: once the runtime's worker threads
/// exist, the local offset can no longer be queried soundly.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: UtcOffset,
}

impl LocalClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for LocalClock {
    fn hour_minute(&self) -> (u8, u8) {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        (now.hour(), now.minute())
    }
}

/// Where each cycle's snapshot goes. Publishing must not block.
pub trait SnapshotSink: Send + 'static {
    fn publish(&self, snapshot: UiSnapshot);
}

impl SnapshotSink for watch::Sender<UiSnapshot> {
    fn publish(&self, snapshot: UiSnapshot) {
        self.send_replace(snapshot);
    }
}

pub struct PollLoop<C: Connector, K, P> {
    conn: ConnectionManager<C>,
    store: TelemetryStore,
    sensor: SensorState,
    address: watch::Receiver<Option<String>>,
    clock: K,
    sink: P,
    period: Duration,
    last_connect_error: Option<LinkErrorKind>,
}

impl<C, K, P> PollLoop<C, K, P>
where
    C: Connector,
    K: Clock,
    P: SnapshotSink,
{
    pub fn new(
        conn: ConnectionManager<C>,
        store: TelemetryStore,
        address: watch::Receiver<Option<String>>,
        clock: K,
        sink: P,
    ) -> Self {
        Self {
            conn,
            store,
            sensor: SensorState::default(),
            address,
            clock,
            sink,
            period: DEFAULT_PERIOD,
            last_connect_error: None,
        }
    }

    /// Delay between the end of one cycle and the start of the next.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn sensor(&self) -> SensorState {
        self.sensor
    }

    /// Runs one cycle and returns the snapshot it published.
    pub async fn cycle(&mut self) -> UiSnapshot {
        let address = self
            .address
            .borrow()
            .clone()
            .filter(|a| !a.trim().is_empty());

        if self.conn.address().is_some() && self.conn.address() != address.as_deref() {
            info!("device address changed to {:?}", address);
            self.conn.disconnect().await;
        }

        if self.conn.is_connected() {
            if let Err(e) = self.exchange().await {
                debug!("cycle abandoned: {}", e);
            }
        } else {
            self.try_connect(address.as_deref().unwrap_or("")).await;
        }

        let snapshot = UiSnapshot::new(
            address,
            self.conn.is_connected(),
            self.sensor,
            self.store.snapshot(),
        );
        self.sink.publish(snapshot.clone());
        snapshot
    }

    async fn try_connect(&mut self, address: &str) {
        match self.conn.connect(address).await {
            Ok(()) => self.last_connect_error = None,
            Err(e) => {
                // the same failure every second is noise
                if self.last_connect_error != Some(e.kind()) {
                    warn!("not connected: {}", e);
                } else {
                    debug!("not connected: {}", e);
                }
                self.last_connect_error = Some(e.kind());
            }
        }
    }

    /// The full command sequence. Stops at the first failure; the
    /// connection manager has already disconnected by then.
    async fn exchange(&mut self) -> Result<(), LinkError> {
        let (hour, minute) = self.clock.hour_minute();
        self.conn.command(&codec::encode_set_time(hour, minute)).await?;

        let telemetry = self.store.snapshot();
        self.conn.command(&codec::encode_set_speed(telemetry.speed_mph)).await?;
        self.conn.command(&codec::encode_set_distance(telemetry.distance_miles)).await?;

        let reply = self.conn.query(&codec::encode_get_temperature()).await?;
        self.sensor.temperature_f = codec::decode_temperature_response(&reply);
        Ok(())
    }

    /// Cycles until `stop` turns true (or its sender goes away), then
    /// disconnects. A cycle in progress always runs to completion.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        info!("poll: started, period {:?}", self.period);
        loop {
            if *stop.borrow() {
                break;
            }
            self.cycle().await;
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.conn.disconnect().await;
        info!("poll: stopped");
    }

    /// Closes the link, if any.
    pub async fn shutdown(mut self) {
        self.conn.disconnect().await;
    }
}
