use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

use strum_macros::EnumIter;
use thiserror::Error;

use crate::hvac::{HvacDriver, HvacState};
use crate::protocol::{FanSpeed, HvacMode};

pub const MAX_CHAR_STRING: usize = 64;

pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const ON_OFF: u16 = 0x0006;
    pub const THERMOSTAT: u16 = 0x0201;
    pub const FAN_CONTROL: u16 = 0x0202;
}

pub mod attr {
    pub const LOCATION_DESCRIPTION: u16 = 0x0010;
    pub const ON_OFF: u16 = 0x0000;
    pub const LOCAL_TEMPERATURE: u16 = 0x0000;
    pub const OCCUPIED_COOLING_SETPOINT: u16 = 0x0011;
    pub const OCCUPIED_HEATING_SETPOINT: u16 = 0x0012;
    pub const SYSTEM_MODE: u16 = 0x001C;
    pub const RUNNING_MODE: u16 = 0x001E;
    pub const FAN_MODE: u16 = 0x0000;
}

pub mod endpoint {
    pub const THERMOSTAT: u8 = 1;
    pub const ECO: u8 = 2;
    pub const SWING: u8 = 3;
    pub const DISPLAY: u8 = 4;
    pub const NIGHT: u8 = 5;
    pub const PURIFIER: u8 = 6;
    pub const CLEAN: u8 = 7;
    pub const MUTE: u8 = 8;
    pub const ERROR: u8 = 9;
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct AttributePath {
    pub endpoint: u8,
    pub cluster: u16,
    pub attribute: u16,
}

impl AttributePath {
    pub const fn new(endpoint: u8, cluster: u16, attribute: u16) -> Self {
        AttributePath {
            endpoint,
            cluster,
            attribute,
        }
    }

    pub const fn on_off(endpoint: u8) -> Self {
        Self::new(endpoint, cluster::ON_OFF, attr::ON_OFF)
    }
}

impl Display for AttributePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/0x{:04X}/0x{:04X}",
            self.endpoint, self.cluster, self.attribute
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Enum8(u8),
    I16(i16),
    /// Length byte followed by at most `MAX_CHAR_STRING` bytes of text.
    CharString(Vec<u8>),
}

impl AttributeValue {
    /// Cuts `text` at a character boundary so it fits.
    pub fn char_string(text: &str) -> AttributeValue {
        let mut end = text.len().min(MAX_CHAR_STRING);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = Vec::with_capacity(end + 1);
        bytes.push(end as u8);
        bytes.extend_from_slice(&text.as_bytes()[..end]);
        AttributeValue::CharString(bytes)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::CharString(bytes) if !bytes.is_empty() => {
                std::str::from_utf8(&bytes[1..]).ok()
            }
            _ => None,
        }
    }
}

/// Inbound notification from the attribute tree.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeWrite {
    pub path: AttributePath,
    pub value: AttributeValue,
}

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("Attribute {0} was rejected by the tree")]
    Rejected(AttributePath),
    #[error("Could not acquire attribute tree mutex")]
    Mutex,
}

pub type Result<T> = std::result::Result<T, AttributeError>;

/// The slice of the mesh stack's attribute store the bridge writes to.
pub trait AttributeTree: Send + Sync {
    fn set_attribute(&self, path: AttributePath, value: AttributeValue) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter)]
pub enum RunningMode {
    Idle,
    Cool,
    Heat,
    FanOnly,
}

impl From<RunningMode> for u8 {
    fn from(m: RunningMode) -> Self {
        match m {
            RunningMode::Idle => 0x00,
            RunningMode::Cool => 0x03,
            RunningMode::Heat => 0x04,
            RunningMode::FanOnly => 0x07,
        }
    }
}

impl RunningMode {
    pub fn of(state: &HvacState) -> RunningMode {
        if !state.power_on {
            return RunningMode::Idle;
        }
        match state.mode {
            HvacMode::Heat => RunningMode::Heat,
            HvacMode::Cool => RunningMode::Cool,
            HvacMode::Fan => RunningMode::FanOnly,
            HvacMode::Auto | HvacMode::Dry | HvacMode::Off => RunningMode::Idle,
        }
    }
}

const SYSTEM_MODE_OFF: u8 = 0x00;

pub fn system_mode_code(mode: HvacMode) -> u8 {
    match mode {
        HvacMode::Off => SYSTEM_MODE_OFF,
        HvacMode::Auto => 0x01,
        HvacMode::Cool => 0x03,
        HvacMode::Heat => 0x04,
        HvacMode::Fan => 0x07,
        HvacMode::Dry => 0x08,
    }
}

pub fn mode_from_system_code(code: u8) -> Option<HvacMode> {
    match code {
        0x00 => Some(HvacMode::Off),
        0x01 => Some(HvacMode::Auto),
        0x03 => Some(HvacMode::Cool),
        0x04 => Some(HvacMode::Heat),
        0x07 => Some(HvacMode::Fan),
        0x08 => Some(HvacMode::Dry),
        _ => None,
    }
}

fn centi_degrees(celsius: f32) -> i16 {
    (celsius * 100.0).round() as i16
}

/// Everything the tree shows for `state`, in push order.
pub fn mirror_values(state: &HvacState) -> Vec<(AttributePath, AttributeValue)> {
    use AttributeValue::*;

    let system_mode = if state.power_on {
        system_mode_code(state.mode)
    } else {
        SYSTEM_MODE_OFF
    };
    let setpoint = state.target_temp_c as i16 * 100;
    let thermostat =
        |attribute| AttributePath::new(endpoint::THERMOSTAT, cluster::THERMOSTAT, attribute);

    vec![
        (
            thermostat(attr::LOCAL_TEMPERATURE),
            I16(centi_degrees(state.ambient_temp_c)),
        ),
        (thermostat(attr::OCCUPIED_COOLING_SETPOINT), I16(setpoint)),
        (thermostat(attr::OCCUPIED_HEATING_SETPOINT), I16(setpoint)),
        (thermostat(attr::SYSTEM_MODE), Enum8(system_mode)),
        (
            thermostat(attr::RUNNING_MODE),
            Enum8(RunningMode::of(state).into()),
        ),
        (
            AttributePath::new(endpoint::THERMOSTAT, cluster::FAN_CONTROL, attr::FAN_MODE),
            Enum8(state.fan_speed.external_code()),
        ),
        (
            AttributePath::new(endpoint::THERMOSTAT, cluster::BASIC, attr::LOCATION_DESCRIPTION),
            AttributeValue::char_string(&state.error_text),
        ),
        (AttributePath::on_off(endpoint::ECO), Bool(state.eco_mode)),
        (AttributePath::on_off(endpoint::SWING), Bool(state.swing_on)),
        (AttributePath::on_off(endpoint::DISPLAY), Bool(state.display_on)),
        (AttributePath::on_off(endpoint::NIGHT), Bool(state.night_mode)),
        (AttributePath::on_off(endpoint::PURIFIER), Bool(state.purifier_on)),
        (AttributePath::on_off(endpoint::CLEAN), Bool(state.clean_status)),
        (AttributePath::on_off(endpoint::MUTE), Bool(state.mute_on)),
        (AttributePath::on_off(endpoint::ERROR), Bool(state.error)),
    ]
}

/// Pushes the whole mirror. Failures are logged per attribute; returns how many were accepted.
pub fn mirror(tree: &dyn AttributeTree, state: &HvacState) -> usize {
    mirror_values(state)
        .into_iter()
        .filter(|(path, value)| match tree.set_attribute(*path, value.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!("could not update attribute {}: {}", path, e);
                false
            }
        })
        .count()
}

/// Setter call an inbound write translates to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Request {
    Power(bool),
    Mode(HvacMode),
    Temperature(i32),
    Fan(FanSpeed),
    Eco(bool),
    Swing(bool),
    Display(bool),
    Night(bool),
    Purifier(bool),
    Mute(bool),
}

impl Request {
    pub fn from_write(write: &AttributeWrite) -> Option<Request> {
        let AttributeWrite { path, value } = write;
        let request = match (path.endpoint, path.cluster, path.attribute, value) {
            (
                endpoint::THERMOSTAT,
                cluster::THERMOSTAT,
                attr::OCCUPIED_COOLING_SETPOINT | attr::OCCUPIED_HEATING_SETPOINT,
                AttributeValue::I16(centi),
            ) => Request::Temperature(*centi as i32 / 100),
            (
                endpoint::THERMOSTAT,
                cluster::THERMOSTAT,
                attr::SYSTEM_MODE,
                AttributeValue::Enum8(code),
            ) => match mode_from_system_code(*code) {
                Some(HvacMode::Off) => Request::Power(false),
                Some(mode) => Request::Mode(mode),
                None => {
                    warn!("unsupported system mode 0x{:02X}", code);
                    return None;
                }
            },
            (
                endpoint::THERMOSTAT,
                cluster::FAN_CONTROL,
                attr::FAN_MODE,
                AttributeValue::Enum8(code),
            ) => Request::Fan(FanSpeed::from_external_code(*code)),
            (ep, cluster::ON_OFF, attr::ON_OFF, AttributeValue::Bool(on)) => match ep {
                endpoint::ECO => Request::Eco(*on),
                endpoint::SWING => Request::Swing(*on),
                endpoint::DISPLAY => Request::Display(*on),
                endpoint::NIGHT => Request::Night(*on),
                endpoint::PURIFIER => Request::Purifier(*on),
                endpoint::MUTE => Request::Mute(*on),
                endpoint::CLEAN | endpoint::ERROR => {
                    debug!("ignoring write to read only endpoint {}", ep);
                    return None;
                }
                _ => {
                    debug!("ignoring write to unknown endpoint {}", ep);
                    return None;
                }
            },
            _ => {
                debug!("ignoring write to {} with {:?}", path, value);
                return None;
            }
        };
        Some(request)
    }

    pub fn apply(self, driver: &HvacDriver) -> crate::hvac::Result<()> {
        match self {
            Request::Power(on) => driver.set_power(on),
            Request::Mode(mode) => driver.set_mode(mode),
            Request::Temperature(celsius) => driver.set_temperature(celsius),
            Request::Fan(fan) => driver.set_fan_speed(fan),
            Request::Eco(on) => driver.set_eco_mode(on),
            Request::Swing(on) => driver.set_swing(on),
            Request::Display(on) => driver.set_display(on),
            Request::Night(on) => driver.set_night_mode(on),
            Request::Purifier(on) => driver.set_purifier(on),
            Request::Mute(on) => driver.set_mute(on),
        }
    }
}

/// Routes an inbound write to the driver. Returns whether the tree needs a fresh mirror.
pub fn handle_write(driver: &HvacDriver, write: &AttributeWrite) -> bool {
    match Request::from_write(write) {
        Some(request) => {
            if let Err(e) = request.apply(driver) {
                warn!("{:?} from {} failed: {}", request, write.path, e);
            }
            true
        }
        None => false,
    }
}

/// Keeps the last value pushed to every path.
#[derive(Debug, Default)]
pub struct MemoryAttributeTree {
    values: Mutex<BTreeMap<AttributePath, AttributeValue>>,
    pushes: Mutex<usize>,
}

impl MemoryAttributeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: AttributePath) -> Option<AttributeValue> {
        self.values.lock().ok()?.get(&path).cloned()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.lock().map(|p| *p).unwrap_or_default()
    }
}

impl AttributeTree for MemoryAttributeTree {
    fn set_attribute(&self, path: AttributePath, value: AttributeValue) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| AttributeError::Mutex)?
            .insert(path, value);
        *self.pushes.lock().map_err(|_| AttributeError::Mutex)? += 1;
        Ok(())
    }
}

/// Stands in for the mesh stack when running standalone: only reports what changed.
#[derive(Debug, Default)]
pub struct LoggingAttributeTree {
    last: Mutex<BTreeMap<AttributePath, AttributeValue>>,
}

impl AttributeTree for LoggingAttributeTree {
    fn set_attribute(&self, path: AttributePath, value: AttributeValue) -> Result<()> {
        let mut last = self.last.lock().map_err(|_| AttributeError::Mutex)?;
        if last.get(&path) != Some(&value) {
            match value.as_text() {
                Some(text) => info!("attribute {} = {:?}", path, text),
                None => info!("attribute {} = {:?}", path, value),
            }
            last.insert(path, value);
        }
        Ok(())
    }
}
