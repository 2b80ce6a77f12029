use packed_struct::prelude::*;
use packed_struct::PackingError;
use thiserror::Error;

use crate::protocol::crc::{checksums, seal};
use crate::protocol::types::{
    FanSpeed, FlagsByte, HvacMode, ModeByte, OptionsByte, SwingByte, SwingPosition,
    TemperatureEncoding, SILENT_BIT,
};

pub const HEADER: [u8; 4] = [0x7A, 0x7A, 0x21, 0xD5];
const MAGIC: usize = 2;

pub const COMMAND_LENGTH: usize = 24;

/// Lengths accepted from the unit, in the order they are tried.
pub const RESPONSE_LENGTHS: [usize; 5] = [13, 18, 24, 28, 34];

pub const MIN_RESPONSE_LENGTH: usize = RESPONSE_LENGTHS[0];
pub const MAX_RESPONSE_LENGTH: usize = RESPONSE_LENGTHS[RESPONSE_LENGTHS.len() - 1];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Marker {
    Ack,
    StatusRequest,
    Command,
    Fault,
    Keepalive,
}

impl From<Marker> for u8 {
    fn from(m: Marker) -> Self {
        match m {
            Marker::Ack => 0xA0,
            Marker::StatusRequest => 0xA2,
            Marker::Command => 0xA3,
            Marker::Fault => 0xA8,
            Marker::Keepalive => 0xAB,
        }
    }
}

pub const STATUS_REQUEST: [u8; 12] = [
    0x7A, 0x7A, 0x21, 0xD5, 0x0C, 0x00, 0x00, 0xA2, 0x0A, 0x0A, 0xFE, 0x29,
];

pub const KEEPALIVE: [u8; 12] = [
    0x7A, 0x7A, 0x21, 0xD5, 0x0C, 0x00, 0x00, 0xAB, 0x0A, 0x0A, 0xFC, 0xF9,
];

#[derive(Error, Clone, Debug)]
pub enum DecodeError {
    #[error("Unsupported frame length {0}")]
    UnsupportedLength(usize),
    #[error("Bad checksum: frame carries 0x{stored:04X}, computed 0x{computed:04X}")]
    BadCrc { stored: u16, computed: u16 },
    #[error("Bad frame header")]
    BadHeader,
    #[error("Frame field was of invalid format")]
    Field(#[from] PackingError),
}

#[derive(Error, Clone, Debug)]
pub enum EncodeError {
    #[error("Could not pack command field")]
    Field(#[from] PackingError),
}

/// Everything the unit needs to know to apply a full command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub mode: HvacMode,
    pub power_on: bool,
    pub target_temp_c: u8,
    pub fan_speed: FanSpeed,
    pub eco_mode: bool,
    pub night_mode: bool,
    pub display_on: bool,
    pub swing_on: bool,
    pub purifier_on: bool,
    pub mute_on: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FaultCodes {
    pub fault: u8,
    pub warning: u8,
}

impl FaultCodes {
    pub fn is_active(&self) -> bool {
        self.fault != 0 || self.warning != 0
    }
}

/// Fields reported by a single frame. `None` means the frame says nothing about it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateDelta {
    pub mode: Option<HvacMode>,
    pub power_on: Option<bool>,
    pub target_temp_c: Option<u8>,
    pub ambient_temp_c: Option<f32>,
    pub fan_speed: Option<FanSpeed>,
    pub eco_mode: Option<bool>,
    pub night_mode: Option<bool>,
    pub display_on: Option<bool>,
    pub swing_on: Option<bool>,
    pub purifier_on: Option<bool>,
    pub mute_on: Option<bool>,
    pub clean_status: Option<bool>,
    pub filter_dirty: Option<bool>,
    pub fault: Option<FaultCodes>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        *self == StateDelta::default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Ack,
    ShortStatus(StateDelta),
    CommandEcho(StateDelta),
    Fault(FaultCodes),
    Status(StateDelta),
    Unknown { length: usize, marker: u8 },
}

impl Frame {
    pub fn delta(&self) -> StateDelta {
        match self {
            Frame::ShortStatus(delta) | Frame::CommandEcho(delta) | Frame::Status(delta) => {
                delta.clone()
            }
            Frame::Fault(codes) => StateDelta {
                fault: Some(*codes),
                ..StateDelta::default()
            },
            Frame::Ack | Frame::Unknown { .. } => StateDelta::default(),
        }
    }
}

pub fn encode_command(command: &Command) -> Result<[u8; COMMAND_LENGTH], EncodeError> {
    encode_command_with(command, TemperatureEncoding::SELECTED)
}

pub fn encode_command_with(
    command: &Command,
    encoding: TemperatureEncoding,
) -> Result<[u8; COMMAND_LENGTH], EncodeError> {
    let mut frame = [0u8; COMMAND_LENGTH];
    frame[..HEADER.len()].copy_from_slice(&HEADER);
    frame[4] = COMMAND_LENGTH as u8;
    frame[7] = Marker::Command.into();

    let [mode_byte] = ModeByte {
        fan: command.fan_speed.device_code().into(),
        power: command.power_on && command.mode != HvacMode::Off,
        mode: command.mode.device_bits().into(),
    }
    .pack()?;
    frame[8] = mode_byte;

    frame[9] = encoding.encode(command.target_temp_c);
    if command.fan_speed.is_silent() {
        frame[9] |= SILENT_BIT;
    }

    let vertical = if command.swing_on {
        SwingPosition::Auto
    } else {
        SwingPosition::Stop
    };
    let [swing_byte] = SwingByte {
        vertical: vertical.to_primitive().into(),
        horizontal: SwingPosition::Stop.to_primitive().into(),
    }
    .pack()?;
    frame[10] = swing_byte;

    let [options_byte] = OptionsByte {
        display: command.display_on,
        purifier: command.purifier_on,
        clean: false,
        night: command.night_mode,
        eco: command.eco_mode,
    }
    .pack()?;
    frame[11] = options_byte;

    let [flags_byte] = FlagsByte {
        filter_dirty: false,
        mute: command.mute_on,
    }
    .pack()?;
    frame[12] = flags_byte;

    seal(&mut frame);
    Ok(frame)
}

pub fn decode_response(bytes: &[u8]) -> Result<Frame, DecodeError> {
    decode_response_with(bytes, TemperatureEncoding::SELECTED)
}

pub fn decode_response_with(
    bytes: &[u8],
    encoding: TemperatureEncoding,
) -> Result<Frame, DecodeError> {
    let length = bytes.len();
    if !RESPONSE_LENGTHS.contains(&length) {
        return Err(DecodeError::UnsupportedLength(length));
    }
    let (stored, computed) = checksums(bytes);
    if stored != computed {
        return Err(DecodeError::BadCrc { stored, computed });
    }
    if bytes[..MAGIC] != HEADER[..MAGIC] {
        return Err(DecodeError::BadHeader);
    }

    let marker = bytes[7];
    Ok(match length {
        13 if marker == u8::from(Marker::Ack) => Frame::Ack,
        18 => {
            let mut delta = StateDelta::default();
            decode_mode_and_temperature(bytes, encoding, &mut delta)?;
            Frame::ShortStatus(delta)
        }
        24 if marker == u8::from(Marker::Command) => {
            let mut delta = StateDelta::default();
            decode_mode_and_temperature(bytes, encoding, &mut delta)?;
            decode_settings(bytes, &mut delta)?;
            Frame::CommandEcho(delta)
        }
        28 if marker == u8::from(Marker::Fault) => Frame::Fault(FaultCodes {
            fault: bytes[8],
            warning: bytes[9],
        }),
        34 => {
            let mut delta = StateDelta::default();
            decode_mode_and_temperature(bytes, encoding, &mut delta)?;
            decode_settings(bytes, &mut delta)?;
            let options = OptionsByte::unpack(&[bytes[11]])?;
            let flags = FlagsByte::unpack(&[bytes[12]])?;
            delta.clean_status = Some(options.clean);
            delta.filter_dirty = Some(flags.filter_dirty);
            delta.ambient_temp_c = Some(bytes[17] as i8 as f32 + bytes[18] as f32 / 10.0);
            Frame::Status(delta)
        }
        _ => Frame::Unknown { length, marker },
    })
}

fn decode_mode_and_temperature(
    bytes: &[u8],
    encoding: TemperatureEncoding,
    delta: &mut StateDelta,
) -> Result<(), DecodeError> {
    let mode = ModeByte::unpack(&[bytes[8]])?;
    let silent = bytes[9] & SILENT_BIT != 0;
    delta.power_on = Some(mode.power);
    delta.mode = HvacMode::from_device_bits(*mode.mode);
    delta.fan_speed = FanSpeed::from_device_code(*mode.fan, silent);
    delta.target_temp_c = encoding.decode(bytes[9] & !SILENT_BIT);
    Ok(())
}

fn decode_settings(bytes: &[u8], delta: &mut StateDelta) -> Result<(), DecodeError> {
    let swing = SwingByte::unpack(&[bytes[10]])?;
    delta.swing_on = match (
        SwingPosition::from_primitive(*swing.vertical),
        SwingPosition::from_primitive(*swing.horizontal),
    ) {
        (Some(vertical), Some(horizontal)) => {
            Some(vertical != SwingPosition::Stop || horizontal != SwingPosition::Stop)
        }
        _ => None,
    };

    let options = OptionsByte::unpack(&[bytes[11]])?;
    delta.display_on = Some(options.display);
    delta.purifier_on = Some(options.purifier);
    delta.night_mode = Some(options.night);
    delta.eco_mode = Some(options.eco);

    let flags = FlagsByte::unpack(&[bytes[12]])?;
    delta.mute_on = Some(flags.mute);
    Ok(())
}
