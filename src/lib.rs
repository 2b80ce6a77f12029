#[macro_use]
extern crate log;

pub mod attribute;
pub mod bridge;
pub mod hvac;
pub mod protocol;
pub mod settings;
pub mod transport;
