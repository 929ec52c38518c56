pub mod device;
pub mod usage;

pub use device::{CircuitInfo, CircuitType, Device, DeviceModel, EnergyDirection};
pub use usage::{ChannelUsage, DataResolution, DeviceUsage, UsageChannels};
