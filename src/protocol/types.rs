use num_traits::clamp;
use packed_struct::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};

pub const MIN_TEMPERATURE: u8 = 16;
pub const MAX_TEMPERATURE: u8 = 31;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HvacMode {
    Off,
    Auto,
    Cool,
    Heat,
    Fan,
    Dry,
}

impl Default for HvacMode {
    fn default() -> Self {
        HvacMode::Cool
    }
}

impl HvacMode {
    /// Low three bits of the mode byte. `Off` has no code of its own and shares Auto's.
    pub fn device_bits(self) -> u8 {
        match self {
            HvacMode::Off | HvacMode::Auto => 0x00,
            HvacMode::Cool => 0x01,
            HvacMode::Dry => 0x02,
            HvacMode::Fan => 0x03,
            HvacMode::Heat => 0x04,
        }
    }

    pub fn from_device_bits(bits: u8) -> Option<HvacMode> {
        match bits {
            0x00 => Some(HvacMode::Auto),
            0x01 => Some(HvacMode::Cool),
            0x02 => Some(HvacMode::Dry),
            0x03 => Some(HvacMode::Fan),
            0x04 => Some(HvacMode::Heat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FanSpeed {
    Auto,
    P20,
    P40,
    P60,
    P80,
    P100,
    Silent,
    Turbo,
}

impl Default for FanSpeed {
    fn default() -> Self {
        FanSpeed::Auto
    }
}

const SILENT_EXTERNAL_CODE: u8 = 0x06;

impl FanSpeed {
    /// Code carried in the high nibble of the mode byte.
    pub fn device_code(self) -> u8 {
        match self {
            FanSpeed::Auto => 0x00,
            FanSpeed::P20 | FanSpeed::Silent => 0x01,
            FanSpeed::P40 => 0x02,
            FanSpeed::P60 => 0x03,
            FanSpeed::P80 => 0x04,
            FanSpeed::P100 => 0x05,
            FanSpeed::Turbo => 0x0D,
        }
    }

    pub fn from_device_code(code: u8, silent: bool) -> Option<FanSpeed> {
        if silent {
            return Some(FanSpeed::Silent);
        }
        match code {
            0x00 => Some(FanSpeed::Auto),
            0x01 => Some(FanSpeed::P20),
            0x02 => Some(FanSpeed::P40),
            0x03 => Some(FanSpeed::P60),
            0x04 => Some(FanSpeed::P80),
            0x05 => Some(FanSpeed::P100),
            0x0D => Some(FanSpeed::Turbo),
            _ => None,
        }
    }

    pub fn is_silent(self) -> bool {
        self == FanSpeed::Silent
    }

    /// Code shown to the attribute tree, where silent gets a slot of its own.
    pub fn external_code(self) -> u8 {
        match self {
            FanSpeed::Silent => SILENT_EXTERNAL_CODE,
            other => other.device_code(),
        }
    }

    pub fn from_external_code(code: u8) -> FanSpeed {
        if code == SILENT_EXTERNAL_CODE {
            FanSpeed::Silent
        } else {
            FanSpeed::from_device_code(code, false).unwrap_or_default()
        }
    }
}

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum SwingPosition {
    Stop = 0,
    Auto = 1,
    P1 = 2,
    P2 = 3,
    P3 = 4,
    P4 = 5,
    P5 = 6,
}

/// Byte 8 of commands and status frames.
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0")]
pub struct ModeByte {
    #[packed_field(bits = "0..=3")]
    pub fan: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "4")]
    pub power: bool,
    #[packed_field(bits = "5..=7")]
    pub mode: Integer<u8, packed_bits::Bits<3>>,
}

/// Byte 10, vertical swing in the high nibble.
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0")]
pub struct SwingByte {
    #[packed_field(bits = "0..=3")]
    pub vertical: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "4..=7")]
    pub horizontal: Integer<u8, packed_bits::Bits<4>>,
}

/// Byte 11. `clean` is only ever reported by the unit.
#[derive(PackedStruct, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "1")]
pub struct OptionsByte {
    #[packed_field(bits = "0")]
    pub display: bool,
    #[packed_field(bits = "1")]
    pub purifier: bool,
    #[packed_field(bits = "2")]
    pub clean: bool,
    #[packed_field(bits = "6")]
    pub night: bool,
    #[packed_field(bits = "7")]
    pub eco: bool,
}

/// Byte 12. `filter_dirty` is only ever reported by the unit.
#[derive(PackedStruct, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "1")]
pub struct FlagsByte {
    #[packed_field(bits = "6")]
    pub filter_dirty: bool,
    #[packed_field(bits = "7")]
    pub mute: bool,
}

pub const SILENT_BIT: u8 = 0x40;

const FAHRENHEIT_MIN: u8 = 61;
const FAHRENHEIT_MAX: u8 = 88;

// index is degrees Fahrenheit minus FAHRENHEIT_MIN
const FAHRENHEIT_TABLE: [u8; 28] = [
    0x20, 0x21, 0x31, 0x22, 0x32, 0x23, 0x33, 0x24, 0x25, 0x35, 0x26, 0x36, 0x27, 0x37, 0x28,
    0x38, 0x29, 0x2A, 0x3A, 0x2B, 0x3B, 0x2C, 0x3C, 0x2D, 0x3D, 0x2E, 0x2F, 0x3F,
];

/// How the target temperature is written into byte 9.
#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter)]
pub enum TemperatureEncoding {
    Celsius,
    FahrenheitTable,
}

impl TemperatureEncoding {
    #[cfg(not(feature = "fahrenheit-table"))]
    pub const SELECTED: TemperatureEncoding = TemperatureEncoding::Celsius;
    #[cfg(feature = "fahrenheit-table")]
    pub const SELECTED: TemperatureEncoding = TemperatureEncoding::FahrenheitTable;

    pub fn encode(self, celsius: u8) -> u8 {
        let celsius = clamp(celsius, MIN_TEMPERATURE, MAX_TEMPERATURE);
        match self {
            TemperatureEncoding::Celsius => celsius,
            TemperatureEncoding::FahrenheitTable => {
                let fahrenheit = (celsius as u16 * 9 / 5 + 32) as u8;
                let fahrenheit = clamp(fahrenheit, FAHRENHEIT_MIN, FAHRENHEIT_MAX);
                FAHRENHEIT_TABLE[(fahrenheit - FAHRENHEIT_MIN) as usize]
            }
        }
    }

    /// Expects the silent bit to be masked off already.
    pub fn decode(self, byte: u8) -> Option<u8> {
        match self {
            TemperatureEncoding::Celsius => {
                (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&byte).then(|| byte)
            }
            TemperatureEncoding::FahrenheitTable => FAHRENHEIT_TABLE
                .iter()
                .position(|&code| code == byte)
                .map(|index| {
                    let above_freezing = index as u16 + (FAHRENHEIT_MIN - 32) as u16;
                    let celsius = ((above_freezing * 5 + 4) / 9) as u8;
                    clamp(celsius, MIN_TEMPERATURE, MAX_TEMPERATURE)
                }),
        }
    }
}
