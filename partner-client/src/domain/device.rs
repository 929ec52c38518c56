use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceModel {
    Vue2,
    Vue3,
    Outlet,
    EVCharger,
    Battery,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CircuitType {
    #[default]
    Main,
    Circuit,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyDirection {
    #[default]
    Consumption,
    Production,
    Bidirectional,
    #[serde(other)]
    Unknown,
}

/// One channel of a monitoring device as described by the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub channel_number: u32,
    #[serde(rename = "type", default)]
    pub circuit_type: CircuitType,
    #[serde(default)]
    pub energy_direction: EnergyDirection,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub name: String,
}

impl CircuitInfo {
    /// Column label used for this channel in usage tables, or `None` for an
    /// unnamed circuit.
    pub fn label(&self) -> Option<String> {
        if self.name.is_empty() {
            None
        } else {
            Some(format!("{}-{}", self.sub_type, self.name))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub manufacturer_device_id: String,
    pub device_name: String,
    pub model: DeviceModel,
    #[serde(default)]
    pub device_connected: bool,
    #[serde(default)]
    pub circuit_infos: Vec<CircuitInfo>,
}

impl Device {
    /// Case-insensitive substring match of `client` against the device name.
    pub fn matches_client(&self, client: &str) -> bool {
        self.device_name
            .to_lowercase()
            .contains(&client.to_lowercase())
    }
}
