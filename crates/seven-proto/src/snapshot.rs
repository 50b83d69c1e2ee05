use serde::{Deserialize, Serialize};
use std::fmt;

/// Ride telemetry derived from position fixes, display units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Time of the last fix, unix ms. 0 until the first fix arrives.
    pub timestamp_ms: i64,
    pub speed_mph: f64,
    pub distance_miles: f64,
    pub altitude_feet: f64,
    pub accuracy_m: f64,
}

/// Readings polled from the display unit's own sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorState {
    pub temperature_f: i32,
}

/// What the presentation side gets once per poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiSnapshot {
    pub device_address: Option<String>,
    pub connected: bool,
    pub temperature_f: i32,
    pub speed_mph: f64,
    pub distance_miles: f64,
    pub altitude_feet: f64,
    pub accuracy_m: f64,
}

impl UiSnapshot {
    pub fn new(
        device_address: Option<String>,
        connected: bool,
        sensor: SensorState,
        telemetry: TelemetrySnapshot,
    ) -> Self {
        Self {
            device_address,
            connected,
            temperature_f: sensor.temperature_f,
            speed_mph: telemetry.speed_mph,
            distance_miles: telemetry.distance_miles,
            altitude_feet: telemetry.altitude_feet,
            accuracy_m: telemetry.accuracy_m,
        }
    }
}

impl fmt::Display for UiSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device_address {
            Some(addr) => writeln!(f, "Bluetooth mac address is {}", addr)?,
            None => writeln!(f, "Bluetooth mac address is not set")?,
        }
        writeln!(
            f,
            "Bluetooth is {}",
            if self.connected { "connected" } else { "disconnected" }
        )?;
        writeln!(f, "Temperature is {} F", self.temperature_f)?;
        writeln!(f, "Speed is {:.1} mph", self.speed_mph)?;
        writeln!(f, "Distance is {:.2} mi", self.distance_miles)?;
        write!(
            f,
            "Altitude is {:.0} ft (accuracy {:.0} m)",
            self.altitude_feet, self.accuracy_m
        )
    }
}
