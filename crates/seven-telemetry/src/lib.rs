//! Ride telemetry: the shared store and the NMEA position-fix feed.

pub mod doctor;
pub mod gnss;
pub mod store;

pub use store::{Fix, TelemetryStore};
