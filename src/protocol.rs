use itertools::Itertools;

pub mod crc;
pub mod frame;
pub mod resync;
pub mod types;

pub use frame::{
    decode_response, encode_command, Command, DecodeError, EncodeError, FaultCodes, Frame,
    StateDelta, KEEPALIVE, STATUS_REQUEST,
};
pub use resync::Resynchronizer;
pub use types::{FanSpeed, HvacMode, TemperatureEncoding, MAX_TEMPERATURE, MIN_TEMPERATURE};

/// Formats raw bytes the way they show up in logs.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("0x{:02X}", b)).join(", ")
}
