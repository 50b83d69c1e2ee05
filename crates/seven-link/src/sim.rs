//! Bench emulator for the display unit: acks every command, remembers what
//! it was told to show and answers temperature queries.

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::{debug, warn};

use seven_proto::codec::{self, CommandId, DeviceCommand, SLOT_COUNT};

use crate::transport::{AdapterState, Connector};

pub const ACK: u8 = 0x06;

/// Last values the emulated unit was asked to display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub hour: u8,
    pub minute: u8,
    pub speed_tenths: u32,
    pub distance_tenths: u32,
    pub commands: usize,
    /// Sessions the host closed from its side.
    pub hangups: usize,
}

#[derive(Debug, Clone)]
pub struct Emulator {
    temperature_f: i32,
    fail_after: Option<usize>,
    display: Arc<Mutex<DisplayState>>,
}

impl Emulator {
    pub fn new(temperature_f: i32) -> Self {
        Self { temperature_f, fail_after: None, display: Arc::default() }
    }

    /// Drop each session after serving `n` commands.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn display(&self) -> DisplayState {
        *self.display.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one session until the peer hangs up. Returns the number of
    /// commands served.
    pub async fn serve<S>(&self, mut stream: S) -> io::Result<usize>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut served = 0;
        loop {
            if self.fail_after.is_some_and(|n| served >= n) {
                debug!("emulator: dropping session after {} commands", served);
                return Ok(served);
            }
            let id = match stream.read_u8().await {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.display.lock().unwrap_or_else(PoisonError::into_inner).hangups += 1;
                    return Ok(served);
                }
                Err(e) => return Err(e),
            };
            let len = CommandId::from_byte(id).map_or(0, CommandId::payload_len);
            let mut payload = [0u8; SLOT_COUNT];
            stream.read_exact(&mut payload[..len]).await?;

            served += 1;
            self.display.lock().unwrap_or_else(PoisonError::into_inner).commands += 1;

            match codec::decode_command(id, &payload[..len]) {
                Ok(DeviceCommand::GetTemperature) => {
                    stream
                        .write_all(&codec::encode_temperature_response(self.temperature_f, ACK))
                        .await?;
                }
                Ok(cmd) => {
                    debug!("emulator: {:?}", cmd);
                    self.apply(cmd);
                    stream.write_u8(ACK).await?;
                }
                // the unit acks garbage too, so the host never stalls
                Err(e) => {
                    warn!("emulator: {}", e);
                    stream.write_u8(ACK).await?;
                }
            }
            stream.flush().await?;
        }
    }

    fn apply(&self, cmd: DeviceCommand) {
        let mut d = self.display.lock().unwrap_or_else(PoisonError::into_inner);
        match cmd {
            DeviceCommand::SetTime { hour, minute } => {
                d.hour = hour;
                d.minute = minute;
            }
            DeviceCommand::SetSpeed(tenths) => d.speed_tenths = tenths,
            DeviceCommand::SetDistance(tenths) => d.distance_tenths = tenths,
            DeviceCommand::GetTemperature => {}
        }
    }
}

/// In-process connector wired straight to an [`Emulator`].
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    emulator: Emulator,
    adapter: AdapterState,
}

impl LoopbackConnector {
    pub fn new(emulator: Emulator) -> Self {
        Self { emulator, adapter: AdapterState::Ready }
    }

    pub fn with_adapter(mut self, adapter: AdapterState) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }
}

impl Connector for LoopbackConnector {
    type Stream = DuplexStream;

    fn adapter_state(&self) -> AdapterState {
        self.adapter
    }

    fn open(&self, address: &str) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        async move {
            let (client, device) = tokio::io::duplex(256);
            let emulator = self.emulator.clone();
            let address = address.to_string();
            tokio::spawn(async move {
                match emulator.serve(device).await {
                    Ok(n) => debug!("emulator: {} closed after {} commands", address, n),
                    Err(e) => warn!("emulator: {} session error: {}", address, e),
                }
            });
            Ok(client)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acks_and_records_commands() {
        let emu = Emulator::new(68);
        let (mut host, device) = tokio::io::duplex(64);
        let server = {
            let emu = emu.clone();
            tokio::spawn(async move { emu.serve(device).await })
        };

        host.write_all(codec::encode_set_time(14, 5).as_bytes()).await.unwrap();
        assert_eq!(host.read_u8().await.unwrap(), ACK);
        host.write_all(codec::encode_set_speed(12.3).as_bytes()).await.unwrap();
        assert_eq!(host.read_u8().await.unwrap(), ACK);
        host.write_all(codec::encode_get_temperature().as_bytes()).await.unwrap();
        let mut reply = [0u8; codec::TEMPERATURE_REPLY_LEN];
        host.read_exact(&mut reply).await.unwrap();
        assert_eq!(codec::decode_temperature_response(&reply), 68);

        drop(host);
        assert_eq!(server.await.unwrap().unwrap(), 3);
        let d = emu.display();
        assert_eq!((d.hour, d.minute), (2, 5));
        assert_eq!(d.speed_tenths, 123);
        assert_eq!(d.commands, 3);
        assert_eq!(d.hangups, 1);
    }

    #[tokio::test]
    async fn drops_session_after_limit() {
        let emu = Emulator::new(68).fail_after(1);
        let (mut host, device) = tokio::io::duplex(64);
        let server = {
            let emu = emu.clone();
            tokio::spawn(async move { emu.serve(device).await })
        };

        host.write_all(codec::encode_set_time(1, 0).as_bytes()).await.unwrap();
        assert_eq!(host.read_u8().await.unwrap(), ACK);
        assert_eq!(server.await.unwrap().unwrap(), 1);

        host.write_all(codec::encode_set_speed(1.0).as_bytes()).await.ok();
        assert!(host.read_u8().await.is_err());
        assert_eq!(emu.display().hangups, 0);
    }
}
