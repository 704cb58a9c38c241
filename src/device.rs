use crate::connection::{CommandSession, DEFAULT_DISSOLVE_MS};
use crate::error::{InfusionError, Result};
use crate::protocol::Event;
use crate::subscription::DeviceUpdate;
use crate::types::{DeviceKind, Vid};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Live state of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    /// Level 0-100
    pub brightness: u8,
    pub power: bool,
    pub hue: f64,
    pub saturation: f64,
    /// Last reported temperature in degrees Celsius
    pub temperature: f64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            brightness: 100,
            power: false,
            hue: 0.0,
            saturation: 0.0,
            temperature: 0.0,
        }
    }
}

/// A classified controller object: a load or a thermostat
///
/// Cloning is cheap and clones share the same live state. State is updated
/// from the command channel by the registry and optimistically by the
/// command methods below.
#[derive(Clone)]
pub struct Device {
    vid: Vid,
    name: String,
    kind: DeviceKind,
    session: Arc<CommandSession>,
    state: Arc<Mutex<DeviceState>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("vid", &self.vid)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &*self.state())
            .finish()
    }
}

impl Device {
    pub(crate) fn new(session: Arc<CommandSession>, vid: Vid, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            vid,
            name: name.into(),
            kind,
            session,
            state: Arc::new(Mutex::new(DeviceState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn vid(&self) -> Vid {
        self.vid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Consistent copy of the live state
    pub fn state_snapshot(&self) -> DeviceState {
        self.state().clone()
    }

    pub fn brightness(&self) -> u8 {
        self.state().brightness
    }

    pub fn power(&self) -> bool {
        self.state().power
    }

    pub fn hue(&self) -> f64 {
        self.state().hue
    }

    pub fn saturation(&self) -> f64 {
        self.state().saturation
    }

    pub fn temperature(&self) -> f64 {
        self.state().temperature
    }

    /// Fold a command channel event into the live state
    ///
    /// Returns the resulting update when the event concerns this device.
    pub(crate) fn apply(&self, event: &Event) -> Option<DeviceUpdate> {
        if event.vid() != Some(self.vid) {
            return None;
        }

        match event {
            Event::LoadStatus { level, .. } if self.kind.is_load() => {
                let mut state = self.state();
                state.brightness = (*level).clamp(0, 100) as u8;
                state.power = state.brightness > 0;
                tracing::debug!(
                    "Load status (VID={}, Name={}, Bri:{})",
                    self.vid,
                    self.name,
                    state.brightness
                );
                Some(DeviceUpdate::Load {
                    vid: self.vid,
                    brightness: state.brightness,
                    power: state.power,
                })
            }
            Event::OutdoorTemperature { celsius, .. } | Event::IndoorTemperature { celsius, .. }
                if self.kind == DeviceKind::Thermostat =>
            {
                self.state().temperature = *celsius;
                Some(DeviceUpdate::Temperature {
                    vid: self.vid,
                    celsius: *celsius,
                })
            }
            _ => None,
        }
    }

    /// Ask the controller for the current state of this device
    pub fn refresh(&self) -> Result<()> {
        if self.kind.is_load() {
            self.session.get_load_status(self.vid)
        } else {
            self.session.get_outdoor_temperature(self.vid)
        }
    }

    /// Switch the load on at its last brightness, or off
    pub fn set_power(&self, on: bool) -> Result<()> {
        self.require(self.kind.is_load(), "set_power")?;
        let level = {
            let mut state = self.state();
            state.power = on;
            if on && state.brightness == 0 {
                state.brightness = 100;
            }
            if on {
                state.brightness
            } else {
                0
            }
        };
        tracing::debug!("setPower {} = {}", self.vid, on);
        self.session.set_load_level(self.vid, level)
    }

    /// Set the brightness (0-100); zero switches the load off
    pub fn set_brightness(&self, level: u8) -> Result<()> {
        self.require(self.kind.is_dimmable(), "set_brightness")?;
        let level = level.min(100);
        {
            let mut state = self.state();
            state.brightness = level;
            state.power = level > 0;
        }
        tracing::debug!("setBrightness {} = {}", self.vid, level);
        self.session.set_load_level(self.vid, level)
    }

    /// Change the hue of an RGB load, switching it on
    pub fn set_hue(&self, hue: f64) -> Result<()> {
        self.require(self.kind == DeviceKind::Rgb, "set_hue")?;
        let state = {
            let mut state = self.state();
            state.power = true;
            state.hue = hue;
            state.clone()
        };
        self.dissolve(&state)
    }

    /// Change the saturation of an RGB load, switching it on
    pub fn set_saturation(&self, saturation: f64) -> Result<()> {
        self.require(self.kind == DeviceKind::Rgb, "set_saturation")?;
        let state = {
            let mut state = self.state();
            state.power = true;
            state.saturation = saturation;
            state.clone()
        };
        self.dissolve(&state)
    }

    /// Ask a thermostat for its outdoor temperature
    pub fn request_temperature(&self) -> Result<()> {
        self.require(self.kind == DeviceKind::Thermostat, "request_temperature")?;
        self.session.get_outdoor_temperature(self.vid)
    }

    fn dissolve(&self, state: &DeviceState) -> Result<()> {
        self.session.dissolve_hsl(
            self.vid,
            state.hue,
            state.saturation,
            f64::from(state.brightness),
            DEFAULT_DISSOLVE_MS,
        )
    }

    fn require(&self, supported: bool, operation: &'static str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(InfusionError::Unsupported {
                operation,
                kind: self.kind,
                vid: self.vid,
            })
        }
    }
}
