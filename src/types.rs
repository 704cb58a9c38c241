use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Controller object identifier
pub type Vid = u32;

/// Capability interface identifier
pub type Iid = u32;

/// Well-known interface names used during classification
pub const INTERFACE_LOAD: &str = "Load";
pub const INTERFACE_RGB_LOAD: &str = "RGBLoad";
pub const INTERFACE_THERMOSTAT: &str = "Thermostat";

/// Kind of controllable entity a project object was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Thermostat,
    Rgb,
    Dimmer,
    Relay,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Thermostat => "thermostat",
            DeviceKind::Rgb => "rgb",
            DeviceKind::Dimmer => "dimmer",
            DeviceKind::Relay => "relay",
        }
    }

    /// Whether the device is a load (anything but a thermostat)
    pub fn is_load(&self) -> bool {
        !matches!(self, DeviceKind::Thermostat)
    }

    /// Whether brightness is meaningful for this kind
    pub fn is_dimmable(&self) -> bool {
        matches!(self, DeviceKind::Rgb | DeviceKind::Dimmer)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interface name to interface id mapping advertised by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceTable {
    entries: BTreeMap<String, Iid>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, iid: Iid) {
        self.entries.insert(name.into(), iid);
    }

    /// Resolve an interface name to its id
    pub fn get(&self, name: &str) -> Option<Iid> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Iid)> {
        self.entries.iter().map(|(name, iid)| (name.as_str(), *iid))
    }
}

impl FromIterator<(String, Iid)> for InterfaceTable {
    fn from_iter<T: IntoIterator<Item = (String, Iid)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
