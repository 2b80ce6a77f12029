use std::sync::{Arc, Mutex};

use crate::hvac::{HvacError, HvacState, HvacStore, Result};
use crate::protocol::{
    encode_command, hex, Command, FanSpeed, HvacMode, KEEPALIVE, MAX_TEMPERATURE,
    MIN_TEMPERATURE, STATUS_REQUEST,
};
use crate::settings::SettingsStore;
use crate::transport::Transport;

/// Turns user requests into state changes and full command frames.
///
/// Every setter follows the same sequence: mutate the fields it owns, enforce the cross-field
/// rules, persist the user settings, then encode the whole state and write it out.
pub struct HvacDriver {
    store: HvacStore,
    transport: Arc<dyn Transport>,
    settings: Mutex<Box<dyn SettingsStore>>,
}

impl HvacDriver {
    /// Restores persisted settings into `store` before anything is sent.
    pub fn new(
        store: HvacStore,
        transport: Arc<dyn Transport>,
        settings: Box<dyn SettingsStore>,
    ) -> Result<HvacDriver> {
        let restored = store.update(|state| {
            state.restore(settings.as_ref());
            state.clone()
        })?;
        info!(
            "restored settings: mode {} power {} target {}°C fan {}",
            restored.mode, restored.power_on, restored.target_temp_c, restored.fan_speed
        );
        Ok(HvacDriver {
            store,
            transport,
            settings: Mutex::new(settings),
        })
    }

    pub fn store(&self) -> &HvacStore {
        &self.store
    }

    pub fn set_power(&self, on: bool) -> Result<()> {
        info!("setting power {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.power_on = on;
            Ok(())
        })
    }

    pub fn set_mode(&self, mode: HvacMode) -> Result<()> {
        info!("setting mode {}", mode);
        self.apply_setter(|state| {
            state.mode = mode;
            if mode != HvacMode::Off {
                state.power_on = true;
            }
            Ok(())
        })
    }

    pub fn set_temperature(&self, celsius: i32) -> Result<()> {
        if celsius < MIN_TEMPERATURE as i32 || celsius > MAX_TEMPERATURE as i32 {
            warn!("temperature {}°C out of range", celsius);
            return Err(HvacError::OutOfRange(celsius));
        }
        info!("setting temperature {}°C", celsius);
        self.apply_setter(|state| {
            state.target_temp_c = celsius as u8;
            Ok(())
        })
    }

    /// The flag is stored even when the unit is not cooling; only the send is skipped.
    pub fn set_eco_mode(&self, on: bool) -> Result<()> {
        info!("setting eco mode {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.eco_mode = on;
            if on && state.mode != HvacMode::Cool {
                warn!("eco mode only works while cooling");
                Err(HvacError::InvalidState(state.mode))
            } else {
                Ok(())
            }
        })
    }

    pub fn set_display(&self, on: bool) -> Result<()> {
        info!("setting display {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.display_on = on;
            Ok(())
        })
    }

    pub fn set_swing(&self, on: bool) -> Result<()> {
        info!("setting swing {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.swing_on = on;
            Ok(())
        })
    }

    pub fn set_fan_speed(&self, fan: FanSpeed) -> Result<()> {
        info!("setting fan speed {}", fan);
        self.apply_setter(|state| {
            state.fan_speed = fan;
            Ok(())
        })
    }

    pub fn set_night_mode(&self, on: bool) -> Result<()> {
        info!("setting night mode {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.night_mode = on;
            Ok(())
        })
    }

    pub fn set_purifier(&self, on: bool) -> Result<()> {
        info!("setting purifier {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.purifier_on = on;
            Ok(())
        })
    }

    pub fn set_mute(&self, on: bool) -> Result<()> {
        info!("setting mute {}", if on { "on" } else { "off" });
        self.apply_setter(|state| {
            state.mute_on = on;
            Ok(())
        })
    }

    pub fn request_status(&self) -> Result<()> {
        debug!("requesting status");
        self.transport.write(&STATUS_REQUEST)?;
        Ok(())
    }

    pub fn send_keepalive(&self) -> Result<()> {
        debug!("sending keepalive");
        self.transport.write(&KEEPALIVE)?;
        Ok(())
    }

    fn apply_setter(&self, mutate: impl FnOnce(&mut HvacState) -> Result<()>) -> Result<()> {
        let (state, checked) = self.store.update(|state| {
            let checked = mutate(state);
            if checked.is_ok() && state.eco_mode && state.fan_speed != FanSpeed::Auto {
                debug!("eco mode forces fan speed to auto");
                state.fan_speed = FanSpeed::Auto;
            }
            (state.clone(), checked)
        })?;
        self.persist(&state);
        checked?;
        self.send_command(&state.command())
    }

    fn persist(&self, state: &HvacState) {
        match self.settings.lock() {
            Ok(mut settings) => {
                if let Err(e) = state.save(settings.as_mut()) {
                    warn!("could not persist settings: {}", e);
                }
            }
            Err(_) => error!("could not acquire settings mutex"),
        }
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        let frame = encode_command(command)?;
        debug!("sending command [{}]", hex(&frame));
        self.transport.write(&frame)?;
        Ok(())
    }
}
