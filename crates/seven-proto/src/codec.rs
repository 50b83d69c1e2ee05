//! Display unit command protocol.
//!
//! Every outbound command is a single id byte followed by zero or four
//! digit slots. A slot is one display digit: a nibble 0-9, [`BLANK`], or a
//! digit ORed with one of the decoration flags below. Slots are sent least
//! significant digit first.
//!
//! ```text
//! set time      [01] [min ones] [min tens] [hour ones|CLOCK] [hour tens|BLANK]
//! set speed     [02] [tenths] [ones|DECIMAL] [tens|BLANK] [hundreds|BLANK]
//! set distance  [03] same packing as speed
//! get temp      [04]
//! temp reply    [indicator] [ones] [tens] [hundreds] [ack]
//! ```
//!
//! After each command the device answers with one ack byte (the temperature
//! reply carries its ack as the fifth byte). The ack value is never checked.

use thiserror::Error;

/// Empty digit.
pub const BLANK: u8 = 0x0A;
/// Slot belongs to the clock display (colon lit next to it).
pub const CLOCK_FLAG: u8 = 0x10;
/// Decimal point after this digit.
pub const DECIMAL_FLAG: u8 = 0x20;
/// Degrees marker, third digit only. The unit accepts it but no command here sets it.
pub const DEGREES_FLAG: u8 = 0x40;
/// Minus sign on this digit.
pub const MINUS_FLAG: u8 = 0x80;
pub const DIGIT_MASK: u8 = 0x0F;

/// Digit slots carried by set-time/speed/distance.
pub const SLOT_COUNT: usize = 4;
/// Length of the temperature reply, indicator and ack included.
pub const TEMPERATURE_REPLY_LEN: usize = 5;
/// Leading byte the unit puts in front of a temperature reading.
pub const TEMPERATURE_INDICATOR: u8 = b'F';

const MAX_FRAME_LEN: usize = 1 + SLOT_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    SetTime = 1,
    SetSpeed = 2,
    SetDistance = 3,
    GetTemperature = 4,
}

impl CommandId {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::SetTime),
            2 => Some(Self::SetSpeed),
            3 => Some(Self::SetDistance),
            4 => Some(Self::GetTemperature),
            _ => None,
        }
    }

    /// Number of digit slots that follow the id byte.
    pub fn payload_len(self) -> usize {
        match self {
            Self::GetTemperature => 0,
            _ => SLOT_COUNT,
        }
    }
}

/// One outbound command, 1 to 5 bytes, written and flushed as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    id: CommandId,
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl CommandFrame {
    fn new(id: CommandId) -> Self {
        let mut buf = [0u8; MAX_FRAME_LEN];
        buf[0] = id as u8;
        Self { id, buf, len: 1 }
    }

    fn with_slots(id: CommandId, slots: [u8; SLOT_COUNT]) -> Self {
        let mut frame = Self::new(id);
        frame.buf[1..].copy_from_slice(&slots);
        frame.len = MAX_FRAME_LEN;
        frame
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn slots(&self) -> &[u8] {
        &self.buf[1..self.len]
    }
}

/// Clock in 12-hour form. `hour24` is 0..=23 and `minute` 0..=59.
pub fn encode_set_time(hour24: u8, minute: u8) -> CommandFrame {
    debug_assert!(hour24 < 24 && minute < 60, "clock out of range: {hour24}:{minute}");
    let hour = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    let hour_tens = if hour >= 10 { hour / 10 } else { BLANK };
    CommandFrame::with_slots(
        CommandId::SetTime,
        [minute % 10, minute / 10, (hour % 10) | CLOCK_FLAG, hour_tens],
    )
}

pub fn encode_set_speed(speed_mph: f64) -> CommandFrame {
    CommandFrame::with_slots(CommandId::SetSpeed, fixed_point_slots(speed_mph))
}

pub fn encode_set_distance(distance_miles: f64) -> CommandFrame {
    CommandFrame::with_slots(CommandId::SetDistance, fixed_point_slots(distance_miles))
}

pub fn encode_get_temperature() -> CommandFrame {
    CommandFrame::new(CommandId::GetTemperature)
}

/// One decimal place, leading zeros above the units digit blanked.
/// The top slot carries the whole quotient `s / 1000` truncated to a byte,
/// so from 10000 tenths up it is no longer a digit the unit can show.
fn fixed_point_slots(value: f64) -> [u8; SLOT_COUNT] {
    // negative and NaN saturate to 0
    let s = (value * 10.0).round().max(0.0) as u64;
    let digit = |div: u64| (s / div % 10) as u8;
    [
        digit(1),
        digit(10) | DECIMAL_FLAG,
        if s >= 100 { digit(100) } else { BLANK },
        if s >= 1000 { (s / 1000) as u8 } else { BLANK },
    ]
}

/// Decodes the 5-byte temperature reply into degrees Fahrenheit.
///
/// A minus flag on any digit makes the whole reading negative. Digits
/// outside 0-9 (including [`BLANK`]) count as 0.
pub fn decode_temperature_response(reply: &[u8; TEMPERATURE_REPLY_LEN]) -> i32 {
    let mut sign = 1;
    let mut value = 0;
    let mut place = 1;
    for &slot in &reply[1..4] {
        if slot & MINUS_FLAG == MINUS_FLAG {
            sign = -1;
        }
        value += place * digit_value(slot);
        place *= 10;
    }
    sign * value
}

/// Device side of [`decode_temperature_response`]. `temp_f` is clamped to
/// the three digits the reply can carry (-99..=999); negatives put the
/// minus flag on the hundreds digit.
pub fn encode_temperature_response(temp_f: i32, ack: u8) -> [u8; TEMPERATURE_REPLY_LEN] {
    let t = temp_f.clamp(-99, 999);
    let mag = t.unsigned_abs();
    let digit = |div: u32| (mag / div % 10) as u8;
    let mut hundreds = digit(100);
    if t < 0 {
        hundreds |= MINUS_FLAG;
    }
    [TEMPERATURE_INDICATOR, digit(1), digit(10), hundreds, ack]
}

fn digit_value(slot: u8) -> i32 {
    match slot & DIGIT_MASK {
        d @ 0..=9 => d as i32,
        _ => 0,
    }
}

/// Reads digit slots back as an integer, least significant first.
/// Flags are ignored and blank or invalid digits count as 0.
pub fn decode_display_digits(slots: &[u8]) -> u32 {
    slots
        .iter()
        .rev()
        .fold(0, |acc, &slot| acc * 10 + digit_value(slot) as u32)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("unknown command id {0:#04x}")]
    UnknownCommand(u8),
    #[error("{id:?} expects {expected} payload bytes, got {got}")]
    PayloadLength { id: CommandId, expected: usize, got: usize },
}

/// A command as the display unit sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    SetTime { hour: u8, minute: u8 },
    /// Value in tenths.
    SetSpeed(u32),
    /// Value in tenths.
    SetDistance(u32),
    GetTemperature,
}

/// Parses an id byte and its payload the way the unit's firmware does.
pub fn decode_command(id: u8, payload: &[u8]) -> Result<DeviceCommand, ProtoError> {
    let id = CommandId::from_byte(id).ok_or(ProtoError::UnknownCommand(id))?;
    if payload.len() != id.payload_len() {
        return Err(ProtoError::PayloadLength {
            id,
            expected: id.payload_len(),
            got: payload.len(),
        });
    }
    Ok(match id {
        CommandId::SetTime => DeviceCommand::SetTime {
            minute: decode_display_digits(&payload[..2]) as u8,
            hour: decode_display_digits(&payload[2..]) as u8,
        },
        CommandId::SetSpeed => DeviceCommand::SetSpeed(decode_display_digits(payload)),
        CommandId::SetDistance => DeviceCommand::SetDistance(decode_display_digits(payload)),
        CommandId::GetTemperature => DeviceCommand::GetTemperature,
    })
}
