//! PrintKit Settings Crate
//!
//! Describes the machine being driven (axes, kinematics, heaters, fans,
//! storage, probe) and persists that description as TOML or JSON.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, AxisSettings, CurrentSettings, FanSettings, HeaterSettings,
    HomingSettings, KinematicsSettings, MachineConfig, ObserverSettings, ProbeSettings,
    SerialSettings, StorageSettings, TimingSettings, TransformSettings, VirtualAxisSettings,
};
pub use error::{SettingsError, SettingsResult};
