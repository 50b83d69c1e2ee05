use std::io;
use thiserror::Error;

/// Why a connect attempt was refused before any I/O happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unavailable {
    #[error("no bluetooth adapter")]
    NoAdapter,
    #[error("bluetooth adapter is disabled")]
    AdapterDisabled,
    #[error("device address not set")]
    NoAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    ConnectUnavailable,
    ConnectFailed,
    LinkIo,
    Close,
    NotConnected,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot connect: {0}")]
    ConnectUnavailable(#[from] Unavailable),

    #[error("connect to {address} failed: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("link {op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("closing {handle} failed: {source}")]
    Close {
        handle: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("not connected")]
    NotConnected,
}

impl LinkError {
    pub fn kind(&self) -> LinkErrorKind {
        match self {
            LinkError::ConnectUnavailable(_) => LinkErrorKind::ConnectUnavailable,
            LinkError::ConnectFailed { .. } => LinkErrorKind::ConnectFailed,
            LinkError::Io { .. } => LinkErrorKind::LinkIo,
            LinkError::Close { .. } => LinkErrorKind::Close,
            LinkError::NotConnected => LinkErrorKind::NotConnected,
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        LinkError::Io { op, source }
    }
}
