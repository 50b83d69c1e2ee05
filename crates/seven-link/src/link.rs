use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

use seven_proto::CommandFrame;

use crate::error::LinkError;

/// An open byte stream to the display unit.
///
/// Writes are buffered until [`DeviceLink::flush`]. Every operation is
/// bounded by the I/O timeout; running out of time is reported like any
/// other stream failure.
pub struct DeviceLink<S> {
    stream: BufStream<S>,
    io_timeout: Duration,
}

impl<S> DeviceLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self { stream: BufStream::new(stream), io_timeout }
    }

    pub async fn write_byte(&mut self, b: u8) -> Result<(), LinkError> {
        let timeout = self.io_timeout;
        bounded("write", timeout, self.stream.write_u8(b)).await
    }

    pub async fn flush(&mut self) -> Result<(), LinkError> {
        let timeout = self.io_timeout;
        bounded("flush", timeout, self.stream.flush()).await
    }

    pub async fn read_byte(&mut self) -> Result<u8, LinkError> {
        let timeout = self.io_timeout;
        bounded("read", timeout, self.stream.read_u8()).await
    }

    /// Writes every byte of `frame` and flushes.
    pub async fn send_frame(&mut self, frame: &CommandFrame) -> Result<(), LinkError> {
        for &b in frame.as_bytes() {
            self.write_byte(b).await?;
        }
        self.flush().await
    }

    /// Tears the session down in order: flush and shut down the outbound
    /// half, discard unread inbound bytes, release the session. A failing
    /// step never skips the later ones; only the outbound shutdown can
    /// report an error.
    pub async fn close(mut self) -> Result<(), LinkError> {
        let timeout = self.io_timeout;
        let outbound = bounded("shutdown", timeout, self.stream.shutdown())
            .await
            .map_err(|e| match e {
                LinkError::Io { source, .. } => LinkError::Close { handle: "outbound stream", source },
                other => other,
            });
        if outbound.is_ok() {
            debug!("link: outbound stream closed");
        }

        let session = self.stream.into_inner();
        debug!("link: inbound stream closed");
        drop(session);
        debug!("link: session released");
        outbound
    }
}

async fn bounded<T, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T, LinkError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(|e| LinkError::io(op, e)),
        Err(_) => Err(LinkError::io(
            op,
            io::Error::new(io::ErrorKind::TimedOut, format!("no progress in {:?}", timeout)),
        )),
    }
}
