//! Wire format and shared data types for the BikeSeven display unit.

pub mod codec;
pub mod snapshot;

pub use codec::{CommandFrame, CommandId, DeviceCommand, ProtoError};
pub use snapshot::{SensorState, TelemetrySnapshot, UiSnapshot};
