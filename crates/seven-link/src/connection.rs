use std::time::Duration;

use tracing::{debug, info, warn};

use seven_proto::codec::TEMPERATURE_REPLY_LEN;
use seven_proto::CommandFrame;

use crate::error::{LinkError, Unavailable};
use crate::link::DeviceLink;
use crate::transport::{AdapterState, Connector, SPP_SERVICE_UUID};
use crate::LinkConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum Link<S> {
    Disconnected,
    Connecting { address: String },
    Connected { address: String, link: DeviceLink<S> },
}

/// Owns the session with the display unit.
///
/// Any I/O failure closes the session before the error is returned, so
/// callers only ever have to look at [`ConnectionManager::is_connected`].
pub struct ConnectionManager<C: Connector> {
    connector: C,
    connect_timeout: Duration,
    io_timeout: Duration,
    link: Link<C::Stream>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, cfg: &LinkConfig) -> Self {
        Self {
            connector,
            connect_timeout: cfg.connect_timeout(),
            io_timeout: cfg.io_timeout(),
            link: Link::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.link {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connecting { .. } => ConnectionState::Connecting,
            Link::Connected { .. } => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected { .. })
    }

    /// Address of the current (or in-progress) session.
    pub fn address(&self) -> Option<&str> {
        match &self.link {
            Link::Disconnected => None,
            Link::Connecting { address } | Link::Connected { address, .. } => Some(address),
        }
    }

    pub async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        if self.is_connected() {
            return Ok(());
        }
        let address = address.trim();
        if address.is_empty() {
            return Err(Unavailable::NoAddress.into());
        }
        match self.connector.adapter_state() {
            AdapterState::Missing => return Err(Unavailable::NoAdapter.into()),
            AdapterState::Disabled => return Err(Unavailable::AdapterDisabled.into()),
            AdapterState::Ready => {}
        }

        self.link = Link::Connecting { address: address.to_string() };
        debug!("connecting to {} (service {})", address, SPP_SERVICE_UUID);

        let opened = match tokio::time::timeout(self.connect_timeout, self.connector.open(address)).await {
            Ok(res) => res,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no session after {:?}", self.connect_timeout),
            )),
        };

        match opened {
            Ok(stream) => {
                info!("connected to {}", address);
                self.link = Link::Connected {
                    address: address.to_string(),
                    link: DeviceLink::new(stream, self.io_timeout),
                };
                Ok(())
            }
            Err(source) => {
                warn!("connect to {} failed: {}", address, source);
                self.disconnect().await;
                Err(LinkError::ConnectFailed { address: address.to_string(), source })
            }
        }
    }

    /// Closes whatever is open. Close failures are logged and otherwise
    /// ignored; the manager always ends up disconnected.
    pub async fn disconnect(&mut self) {
        match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Disconnected => {}
            Link::Connecting { address } => debug!("abandoned session setup for {}", address),
            Link::Connected { address, link } => {
                if let Err(e) = link.close().await {
                    warn!("{}", e);
                }
                info!("disconnected from {}", address);
            }
        }
    }

    /// Sends one frame and waits for the unit's ack byte.
    pub async fn command(&mut self, frame: &CommandFrame) -> Result<u8, LinkError> {
        self.send(frame).await?;
        self.read_byte().await
    }

    /// Sends a get-temperature frame and reads the full reply.
    pub async fn query(&mut self, frame: &CommandFrame) -> Result<[u8; TEMPERATURE_REPLY_LEN], LinkError> {
        self.send(frame).await?;
        let mut reply = [0u8; TEMPERATURE_REPLY_LEN];
        for b in reply.iter_mut() {
            *b = self.read_byte().await?;
        }
        Ok(reply)
    }

    pub async fn send(&mut self, frame: &CommandFrame) -> Result<(), LinkError> {
        let res = match &mut self.link {
            Link::Connected { link, .. } => link.send_frame(frame).await,
            _ => return Err(LinkError::NotConnected),
        };
        self.check(res).await
    }

    pub async fn read_byte(&mut self) -> Result<u8, LinkError> {
        let res = match &mut self.link {
            Link::Connected { link, .. } => link.read_byte().await,
            _ => return Err(LinkError::NotConnected),
        };
        self.check(res).await
    }

    async fn check<T>(&mut self, res: Result<T, LinkError>) -> Result<T, LinkError> {
        if let Err(e) = &res {
            warn!("{}", e);
            self.disconnect().await;
        }
        res
    }
}
