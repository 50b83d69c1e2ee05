//! Ways of getting a byte stream to the display unit.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// Serial Port Profile. The unit's radio module only advertises this service.
pub const SPP_SERVICE_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Missing,
    Disabled,
    Ready,
}

/// Opens sessions to a device address.
///
/// `adapter_state` must be cheap and side-effect free; it is consulted
/// before every connect attempt.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn adapter_state(&self) -> AdapterState;

    fn open(&self, address: &str) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Linux RFCOMM through a bound tty (`rfcomm bind 0 <address> 1`).
///
/// The kernel exposes each bound tty under `/sys/class/tty/rfcommN` with an
/// `address` attribute; opening `/dev/rfcommN` performs the actual
/// RFCOMM connect to the SPP channel.
#[derive(Debug, Clone)]
pub struct RfcommConnector {
    adapter: String,
    baud: u32,
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl RfcommConnector {
    pub fn new(adapter: impl Into<String>, baud: u32) -> Self {
        Self {
            adapter: adapter.into(),
            baud,
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
        }
    }

    /// Alternate sysfs and /dev locations (containers, tests).
    pub fn with_roots(mut self, sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = sysfs_root.into();
        self.dev_root = dev_root.into();
        self
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    fn adapter_dir(&self) -> PathBuf {
        self.sysfs_root.join("class/bluetooth").join(&self.adapter)
    }

    /// Finds the rfcomm tty bound to `address`.
    pub fn find_tty(&self, address: &str) -> io::Result<PathBuf> {
        let tty_class = self.sysfs_root.join("class/tty");
        for ent in std::fs::read_dir(&tty_class)? {
            let ent = ent?;
            let name = ent.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("rfcomm") {
                continue;
            }
            let bound = match std::fs::read_to_string(ent.path().join("address")) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if bound.trim().eq_ignore_ascii_case(address) {
                return Ok(self.dev_root.join(name));
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "no rfcomm tty bound to {} (bind one to its SPP channel, service {})",
                address, SPP_SERVICE_UUID
            ),
        ))
    }
}

impl Connector for RfcommConnector {
    type Stream = SerialStream;

    fn adapter_state(&self) -> AdapterState {
        let dir = self.adapter_dir();
        if !dir.is_dir() {
            return AdapterState::Missing;
        }
        if rfkill_blocked(&dir) {
            AdapterState::Disabled
        } else {
            AdapterState::Ready
        }
    }

    fn open(&self, address: &str) -> impl Future<Output = io::Result<SerialStream>> + Send {
        async move {
            let tty = self.find_tty(address)?;
            debug!("rfcomm: {} is bound to {}", address, tty.display());
            let path = tty.to_string_lossy().into_owned();
            let baud = self.baud;
            // opening an rfcomm tty blocks until the remote side answers
            tokio::task::spawn_blocking(move || {
                tokio_serial::new(path, baud)
                    .open_native_async()
                    .map_err(io::Error::from)
            })
            .await
            .map_err(io::Error::other)?
        }
    }
}

/// Soft (rfkill block) or hard (switch) kill on any rfkill node of the adapter.
fn rfkill_blocked(adapter_dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(adapter_dir) else {
        return false;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("rfkill"))
        .any(|e| {
            ["soft", "hard"].iter().any(|attr| {
                std::fs::read_to_string(e.path().join(attr))
                    .map(|v| v.trim() == "1")
                    .unwrap_or(false)
            })
        })
}

/// Plain TCP, for a serial-to-network bridge or the bench emulator.
/// The device address is only used for logging; `endpoint` is dialed.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

impl TcpConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn adapter_state(&self) -> AdapterState {
        AdapterState::Ready
    }

    fn open(&self, address: &str) -> impl Future<Output = io::Result<TcpStream>> + Send {
        async move {
            debug!("tcp: dialing {} for {}", self.endpoint, address);
            let stream = TcpStream::connect(&self.endpoint).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}
