use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use seven_proto::TelemetrySnapshot;

pub const MPS_TO_MPH: f64 = 2.23693629;
pub const METERS_TO_FEET: f64 = 3.2808399;
const MS_PER_HOUR: f64 = 3_600_000.0;

/// One position sample as the positioning provider reports it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub timestamp_ms: i64,
    pub speed_mps: f64,
    pub altitude_m: f64,
    pub accuracy_m: f64,
}

/// Latest ride telemetry, shared between the fix feed and the poll loop.
///
/// Both entry points take the same lock for their whole duration, so a
/// snapshot never mixes fields from two different fixes.
#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    inner: Arc<Mutex<TelemetrySnapshot>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_fix(&self, fix: &Fix) {
        let mut t = self.lock();
        t.speed_mph = fix.speed_mps * MPS_TO_MPH;
        t.altitude_feet = fix.altitude_m * METERS_TO_FEET;
        t.accuracy_m = fix.accuracy_m;

        // the first fix has nothing to measure against; a fix older than
        // the last one would shrink the odometer
        if t.timestamp_ms != 0 && fix.timestamp_ms > t.timestamp_ms {
            let elapsed_ms = (fix.timestamp_ms - t.timestamp_ms) as f64;
            let delta = t.speed_mph * elapsed_ms / MS_PER_HOUR;
            if delta.is_finite() && delta > 0.0 {
                t.distance_miles += delta;
            }
        }
        t.timestamp_ms = fix.timestamp_ms;
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, TelemetrySnapshot> {
        // every write leaves the snapshot whole, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
