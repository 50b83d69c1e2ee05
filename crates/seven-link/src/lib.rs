pub mod connection;
pub mod doctor;
pub mod error;
pub mod link;
pub mod sim;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
pub use error::{LinkError, LinkErrorKind, Unavailable};
pub use transport::{AdapterState, Connector, RfcommConnector, TcpConnector};

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// "rfcomm" (default), "tcp" or "loopback".
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Local HCI adapter, e.g. "hci0".
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Line rate for the rfcomm tty. The radio ignores it but termios needs one.
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// host:port when transport = "tcp".
    pub endpoint: Option<String>,

    /// Session setup budget (lookup, handshake, stream acquisition).
    pub connect_timeout_ms: Option<u64>,

    /// Per read/write/flush budget once connected.
    pub io_timeout_ms: Option<u64>,

    /// Reading reported by the built-in emulator when transport = "loopback".
    pub loopback_temperature_f: Option<i32>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            adapter: default_adapter(),
            baud: default_baud(),
            endpoint: None,
            connect_timeout_ms: None,
            io_timeout_ms: None,
            loopback_temperature_f: None,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(10_000))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.unwrap_or(5_000))
    }
}

fn default_transport() -> String {
    "rfcomm".to_string()
}
fn default_adapter() -> String {
    "hci0".to_string()
}
fn default_baud() -> u32 {
    115200
}
