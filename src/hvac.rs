use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::protocol::{
    Command, EncodeError, FanSpeed, FaultCodes, HvacMode, StateDelta, MAX_TEMPERATURE,
    MIN_TEMPERATURE,
};
use crate::settings::{self, SettingsStore};
use crate::transport::TransportError;

mod driver;

pub use driver::HvacDriver;

#[derive(Error, Debug)]
pub enum HvacError {
    #[error("Temperature {0} is outside the supported range")]
    OutOfRange(i32),
    #[error("Eco mode requires cool mode, unit is set to {0}")]
    InvalidState(HvacMode),
    #[error("Could not send command")]
    Transport(#[from] TransportError),
    #[error("Could not encode command")]
    Encode(#[from] EncodeError),
    #[error("Could not acquire hvac state mutex")]
    Mutex,
}

pub type Result<T> = std::result::Result<T, HvacError>;

#[derive(Clone, Debug, PartialEq)]
pub struct HvacState {
    pub mode: HvacMode,
    pub power_on: bool,
    pub target_temp_c: u8,
    pub ambient_temp_c: f32,
    pub fan_speed: FanSpeed,
    pub eco_mode: bool,
    pub night_mode: bool,
    pub display_on: bool,
    pub swing_on: bool,
    pub purifier_on: bool,
    pub mute_on: bool,
    pub clean_status: bool,
    pub filter_dirty: bool,
    pub error: bool,
    pub error_text: String,
}

impl Default for HvacState {
    fn default() -> Self {
        HvacState {
            mode: HvacMode::Cool,
            power_on: false,
            target_temp_c: 24,
            ambient_temp_c: 25.0,
            fan_speed: FanSpeed::Auto,
            eco_mode: false,
            night_mode: false,
            display_on: true,
            swing_on: false,
            purifier_on: false,
            mute_on: false,
            clean_status: false,
            filter_dirty: false,
            error: false,
            error_text: String::new(),
        }
    }
}

fn merge<T: PartialEq>(field: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *field != value => {
            *field = value;
            true
        }
        _ => false,
    }
}

pub fn describe_fault(codes: &FaultCodes) -> String {
    let mut parts = Vec::new();
    if codes.fault != 0 {
        parts.push(format!("Fault E{:02X}", codes.fault));
    }
    if codes.warning != 0 {
        parts.push(format!("Warning W{:02X}", codes.warning));
    }
    parts.join(", ")
}

mod keys {
    pub const MODE: &str = "mode";
    pub const POWER: &str = "power";
    pub const TEMPERATURE: &str = "temp";
    pub const FAN: &str = "fan";
    pub const ECO: &str = "eco";
    pub const NIGHT: &str = "night";
    pub const DISPLAY: &str = "display";
    pub const SWING: &str = "swing";
    pub const PURIFIER: &str = "purifier";
    pub const MUTE: &str = "mute";
}

const PERSISTED_OFF: u8 = 0xFF;

fn persisted_mode(mode: HvacMode) -> u8 {
    match mode {
        HvacMode::Off => PERSISTED_OFF,
        other => other.device_bits(),
    }
}

fn restored_mode(code: u8) -> Option<HvacMode> {
    match code {
        PERSISTED_OFF => Some(HvacMode::Off),
        bits => HvacMode::from_device_bits(bits),
    }
}

fn restored_fan(code: u8) -> Option<FanSpeed> {
    if code == FanSpeed::Silent.external_code() {
        Some(FanSpeed::Silent)
    } else {
        FanSpeed::from_device_code(code, false)
    }
}

fn restored_bool(code: u8) -> Option<bool> {
    match code {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn restore_field<T>(
    store: &dyn SettingsStore,
    key: &str,
    parse: impl Fn(u8) -> Option<T>,
    field: &mut T,
) {
    if let Some(code) = store.get_u8(key) {
        match parse(code) {
            Some(value) => *field = value,
            None => warn!("ignoring stored {} value {}", key, code),
        }
    }
}

impl HvacState {
    pub fn command(&self) -> Command {
        Command {
            mode: self.mode,
            power_on: self.power_on,
            target_temp_c: self.target_temp_c,
            fan_speed: self.fan_speed,
            eco_mode: self.eco_mode,
            night_mode: self.night_mode,
            display_on: self.display_on,
            swing_on: self.swing_on,
            purifier_on: self.purifier_on,
            mute_on: self.mute_on,
        }
    }

    /// Folds a decoded frame into the mirror, returning whether anything changed.
    pub fn apply(&mut self, delta: &StateDelta) -> bool {
        let mut changed = false;
        changed |= merge(&mut self.mode, delta.mode);
        changed |= merge(&mut self.power_on, delta.power_on);
        changed |= merge(&mut self.target_temp_c, delta.target_temp_c);
        changed |= merge(&mut self.ambient_temp_c, delta.ambient_temp_c);
        changed |= merge(&mut self.fan_speed, delta.fan_speed);
        changed |= merge(&mut self.eco_mode, delta.eco_mode);
        changed |= merge(&mut self.night_mode, delta.night_mode);
        changed |= merge(&mut self.display_on, delta.display_on);
        changed |= merge(&mut self.swing_on, delta.swing_on);
        changed |= merge(&mut self.purifier_on, delta.purifier_on);
        changed |= merge(&mut self.mute_on, delta.mute_on);
        changed |= merge(&mut self.clean_status, delta.clean_status);
        changed |= merge(&mut self.filter_dirty, delta.filter_dirty);
        if let Some(codes) = &delta.fault {
            changed |= merge(&mut self.error, Some(codes.is_active()));
            changed |= merge(&mut self.error_text, Some(describe_fault(codes)));
        }
        changed
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> settings::Result<()> {
        store.set_u8(keys::MODE, persisted_mode(self.mode))?;
        store.set_u8(keys::POWER, self.power_on as u8)?;
        store.set_u8(keys::TEMPERATURE, self.target_temp_c)?;
        store.set_u8(keys::FAN, self.fan_speed.external_code())?;
        store.set_u8(keys::ECO, self.eco_mode as u8)?;
        store.set_u8(keys::NIGHT, self.night_mode as u8)?;
        store.set_u8(keys::DISPLAY, self.display_on as u8)?;
        store.set_u8(keys::SWING, self.swing_on as u8)?;
        store.set_u8(keys::PURIFIER, self.purifier_on as u8)?;
        store.set_u8(keys::MUTE, self.mute_on as u8)?;
        store.commit()
    }

    /// Loads whatever user settings the store holds. Unknown or out of range values are skipped.
    pub fn restore(&mut self, store: &dyn SettingsStore) {
        restore_field(store, keys::MODE, restored_mode, &mut self.mode);
        restore_field(store, keys::POWER, restored_bool, &mut self.power_on);
        restore_field(
            store,
            keys::TEMPERATURE,
            |t| (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t).then(|| t),
            &mut self.target_temp_c,
        );
        restore_field(store, keys::FAN, restored_fan, &mut self.fan_speed);
        restore_field(store, keys::ECO, restored_bool, &mut self.eco_mode);
        restore_field(store, keys::NIGHT, restored_bool, &mut self.night_mode);
        restore_field(store, keys::DISPLAY, restored_bool, &mut self.display_on);
        restore_field(store, keys::SWING, restored_bool, &mut self.swing_on);
        restore_field(store, keys::PURIFIER, restored_bool, &mut self.purifier_on);
        restore_field(store, keys::MUTE, restored_bool, &mut self.mute_on);
    }
}

/// Shared handle to the one device mirror. Every access goes through the same lock.
#[derive(Clone, Debug, Default)]
pub struct HvacStore {
    state: Arc<Mutex<HvacState>>,
}

impl HvacStore {
    pub fn new(state: HvacState) -> Self {
        HvacStore {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> Result<HvacState> {
        Ok(self.state.lock().map_err(|_| HvacError::Mutex)?.clone())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut HvacState) -> R) -> Result<R> {
        let mut state = self.state.lock().map_err(|_| HvacError::Mutex)?;
        Ok(f(&mut state))
    }

    pub fn apply(&self, delta: &StateDelta) -> Result<bool> {
        self.update(|state| state.apply(delta))
    }
}
