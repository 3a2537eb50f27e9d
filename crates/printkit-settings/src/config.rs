//! Machine configuration for PrintKit
//!
//! Describes the printer the orchestrator drives. Configuration is
//! organized into logical sections:
//! - Timing (inactivity timeout, planner force timeout, speed units)
//! - Serial channel buffer sizes
//! - Physical axes and their optional homing parameters
//! - Optional kinematic transform with its virtual axes
//! - Heaters, fans, storage, bed probe and motor current control
//!
//! Files are JSON or TOML, chosen by extension.

use crate::error::{SettingsError, SettingsResult};
use printkit_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Timing and global motion limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Seconds of inactivity after which steppers are disabled
    pub inactive_time_s: f64,
    /// Seconds a pending planner pull may stay unanswered before buffered
    /// work is flushed
    pub force_timeout_s: f64,
    /// Factor converting the `F` parameter to units per second
    pub speed_limit_multiply: f64,
    /// Upper bound on the step rate summed over all axes
    pub max_steps_per_second: f64,
    /// Number of moves the planner may hold for lookahead
    pub lookahead_buffer_size: usize,
    /// Capacity of the controller event bus
    pub event_channel_buffer_size: usize,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            inactive_time_s: 480.0,
            force_timeout_s: 0.1,
            speed_limit_multiply: 1.0 / 60.0,
            max_steps_per_second: 25_000.0,
            lookahead_buffer_size: 16,
            event_channel_buffer_size: 100,
        }
    }
}

/// Interactive channel buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Send buffer size in bytes; replies beyond it are truncated
    pub send_buffer_size: usize,
    /// Maximum number of parameters in one command
    pub max_parts: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            recv_buffer_size: 256,
            send_buffer_size: 1024,
            max_parts: 16,
        }
    }
}

/// Homing parameters of one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingSettings {
    /// Home towards the maximum end of travel
    pub home_dir_max: bool,
    /// Endstop reads active-low
    pub endstop_invert: bool,
    /// Longest fast approach before giving up
    pub fast_max_dist: f64,
    /// Back-off distance after the first hit
    pub retract_dist: f64,
    /// Longest slow approach
    pub slow_max_dist: f64,
    /// Fast approach speed
    pub fast_speed: f64,
    /// Back-off speed
    pub retract_speed: f64,
    /// Slow approach speed
    pub slow_speed: f64,
}

impl Default for HomingSettings {
    fn default() -> Self {
        Self {
            home_dir_max: false,
            endstop_invert: false,
            fast_max_dist: 250.0,
            retract_dist: 3.0,
            slow_max_dist: 5.0,
            fast_speed: 40.0,
            retract_speed: 50.0,
            slow_speed: 5.0,
        }
    }
}

/// One physical (stepper driven) axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Axis letter
    pub name: char,
    /// Steps per unit of travel
    pub steps_per_unit: f64,
    /// Lower travel bound
    pub min: f64,
    /// Upper travel bound
    pub max: f64,
    /// Speed limit in units per second
    pub max_speed: f64,
    /// Acceleration limit in units per second squared
    pub max_accel: f64,
    /// Contributes to the Euclidean move distance
    #[serde(default)]
    pub is_cartesian: bool,
    /// Width of the planner's step field
    #[serde(default = "default_step_bits")]
    pub step_bits: u8,
    /// Homing parameters, if the axis has an endstop
    #[serde(default)]
    pub homing: Option<HomingSettings>,
}

fn default_step_bits() -> u8 {
    32
}

impl AxisSettings {
    /// A cartesian axis with homing towards the minimum
    pub fn cartesian(name: char, steps_per_unit: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            steps_per_unit,
            min,
            max,
            max_speed: 300.0,
            max_accel: 1500.0,
            is_cartesian: true,
            step_bits: default_step_bits(),
            homing: Some(HomingSettings {
                fast_max_dist: max - min + 10.0,
                ..HomingSettings::default()
            }),
        }
    }
}

/// One axis of kinematic space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualAxisSettings {
    /// Axis letter
    pub name: char,
    /// Speed limit in units per second
    pub max_speed: f64,
}

/// Parameters of the point-to-point kinematics function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KinematicsSettings {
    /// Linear delta with three vertical towers at 90/210/330 degrees
    Delta {
        /// Length of the diagonal rods
        diagonal_rod: f64,
        /// Horizontal distance from the center to each tower's carriage
        /// joint, after subtracting the effector offset
        tower_radius: f64,
    },
}

/// Kinematic transform between virtual and physical axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSettings {
    /// Virtual axes, in transform order
    pub virtual_axes: Vec<VirtualAxisSettings>,
    /// Physical axes fed by the transform, parallel to `virtual_axes`
    pub physical_axes: Vec<char>,
    /// Minimum number of segments per second of motion
    pub segments_per_second: f64,
    /// Shortest segment worth submitting
    pub min_split_length: f64,
    /// Longest segment allowed regardless of speed
    pub max_split_length: f64,
    /// The transform itself
    pub kinematics: KinematicsSettings,
}

/// Temperature observer used by wait commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverSettings {
    /// Sampling interval in seconds
    pub interval_s: f64,
    /// Allowed distance from the target
    pub tolerance: f64,
    /// How long the temperature must stay in tolerance
    pub min_time_s: f64,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            interval_s: 0.5,
            tolerance: 3.0,
            min_time_s: 3.0,
        }
    }
}

/// One heater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaterSettings {
    /// Name letter used in temperature reports
    pub name: char,
    /// M-number that sets the target in motion order
    pub set_mcommand: u16,
    /// M-number that sets the target and waits for it
    pub wait_mcommand: u16,
    /// M-number that configures the control law
    pub set_config_mcommand: u16,
    /// Lowest temperature considered sane
    pub min_safe_temp: f64,
    /// Highest temperature considered sane
    pub max_safe_temp: f64,
    /// Control loop period in seconds
    #[serde(default = "default_control_interval")]
    pub control_interval_s: f64,
    /// Wait-command observer
    #[serde(default)]
    pub observer: ObserverSettings,
}

fn default_control_interval() -> f64 {
    0.2
}

/// One fan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanSettings {
    /// M-number that sets the speed
    pub set_mcommand: u16,
    /// M-number that turns the fan off
    pub off_mcommand: u16,
    /// Factor applied to the `S` parameter to get a 0..1 power
    pub speed_multiply: f64,
}

/// Storage channel buffering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Number of 512-byte blocks in the read ring buffer
    pub read_buffer_blocks: usize,
    /// Longest command accepted from storage
    pub max_command_size: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            read_buffer_blocks: 2,
            max_command_size: 128,
        }
    }
}

/// Bed probing sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Axes positioning the probe over a point
    pub platform_axes: Vec<char>,
    /// Axis moved to probe
    pub probe_axis: char,
    /// Probe offset for each platform axis
    pub platform_offset: Vec<f64>,
    /// Height for travel between points
    pub start_height: f64,
    /// Lowest height a probing move goes to
    pub low_height: f64,
    /// Retract distance after the fast probe
    pub retract_dist: f64,
    /// Travel speed between points
    pub move_speed: f64,
    /// Fast probing speed
    pub fast_speed: f64,
    /// Retract speed
    pub retract_speed: f64,
    /// Slow probing speed
    pub slow_speed: f64,
    /// Points to probe, one coordinate per platform axis
    pub points: Vec<Vec<f64>>,
}

/// Motor current control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSettings {
    /// Axis letters accepted by the current command
    pub axes: Vec<char>,
}

/// Complete machine description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Timing and global limits
    #[serde(default)]
    pub timing: TimingSettings,
    /// Interactive channel buffers
    #[serde(default)]
    pub serial: SerialSettings,
    /// Physical axes
    pub axes: Vec<AxisSettings>,
    /// Optional kinematic transform
    #[serde(default)]
    pub transform: Option<TransformSettings>,
    /// Heaters
    #[serde(default)]
    pub heaters: Vec<HeaterSettings>,
    /// Fans
    #[serde(default)]
    pub fans: Vec<FanSettings>,
    /// Optional storage channel
    #[serde(default)]
    pub storage: Option<StorageSettings>,
    /// Optional bed probe
    #[serde(default)]
    pub probe: Option<ProbeSettings>,
    /// Optional motor current control
    #[serde(default)]
    pub current: Option<CurrentSettings>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::delta()
    }
}

fn default_heaters() -> Vec<HeaterSettings> {
    vec![
        HeaterSettings {
            name: 'T',
            set_mcommand: 104,
            wait_mcommand: 109,
            set_config_mcommand: 301,
            min_safe_temp: 20.0,
            max_safe_temp: 280.0,
            control_interval_s: 0.2,
            observer: ObserverSettings::default(),
        },
        HeaterSettings {
            name: 'B',
            set_mcommand: 140,
            wait_mcommand: 190,
            set_config_mcommand: 304,
            min_safe_temp: 20.0,
            max_safe_temp: 120.0,
            control_interval_s: 0.3,
            observer: ObserverSettings::default(),
        },
    ]
}

fn default_fans() -> Vec<FanSettings> {
    vec![FanSettings {
        set_mcommand: 106,
        off_mcommand: 107,
        speed_multiply: 1.0 / 255.0,
    }]
}

fn extruder_axis() -> AxisSettings {
    AxisSettings {
        name: 'E',
        steps_per_unit: 928.0,
        min: -40_000.0,
        max: 40_000.0,
        max_speed: 45.0,
        max_accel: 250.0,
        is_cartesian: false,
        step_bits: 40,
        homing: None,
    }
}

impl MachineConfig {
    /// Linear delta printer with towers A/B/C driven from virtual X/Y/Z
    pub fn delta() -> Self {
        let tower = |name: char| AxisSettings {
            name,
            steps_per_unit: 100.0,
            min: 0.0,
            max: 360.0,
            max_speed: 200.0,
            max_accel: 9000.0,
            is_cartesian: false,
            step_bits: 32,
            homing: Some(HomingSettings {
                home_dir_max: true,
                fast_max_dist: 363.0,
                retract_dist: 3.0,
                slow_max_dist: 5.0,
                fast_speed: 70.0,
                retract_speed: 70.0,
                slow_speed: 5.0,
                ..HomingSettings::default()
            }),
        };
        Self {
            timing: TimingSettings::default(),
            serial: SerialSettings::default(),
            axes: vec![tower('A'), tower('B'), tower('C'), extruder_axis()],
            transform: Some(TransformSettings {
                virtual_axes: vec![
                    VirtualAxisSettings { name: 'X', max_speed: 200.0 },
                    VirtualAxisSettings { name: 'Y', max_speed: 200.0 },
                    VirtualAxisSettings { name: 'Z', max_speed: 200.0 },
                ],
                physical_axes: vec!['A', 'B', 'C'],
                segments_per_second: 100.0,
                min_split_length: 0.1,
                max_split_length: 4.0,
                kinematics: KinematicsSettings::Delta {
                    diagonal_rod: 214.0,
                    tower_radius: 105.6,
                },
            }),
            heaters: default_heaters(),
            fans: default_fans(),
            storage: Some(StorageSettings::default()),
            probe: None,
            current: None,
        }
    }

    /// Cartesian printer with a bed probe and current control
    pub fn cartesian() -> Self {
        let mut z = AxisSettings::cartesian('Z', 4000.0, 0.0, 100.0);
        z.max_speed = 3.0;
        z.max_accel = 30.0;
        Self {
            timing: TimingSettings::default(),
            serial: SerialSettings::default(),
            axes: vec![
                AxisSettings::cartesian('X', 80.0, 0.0, 200.0),
                AxisSettings::cartesian('Y', 80.0, 0.0, 200.0),
                z,
                extruder_axis(),
            ],
            transform: None,
            heaters: default_heaters(),
            fans: default_fans(),
            storage: Some(StorageSettings::default()),
            probe: Some(ProbeSettings {
                platform_axes: vec!['X', 'Y'],
                probe_axis: 'Z',
                platform_offset: vec![-18.0, -31.0],
                start_height: 17.0,
                low_height: 5.0,
                retract_dist: 1.0,
                move_speed: 120.0,
                fast_speed: 2.0,
                retract_speed: 3.0,
                slow_speed: 0.6,
                points: vec![
                    vec![32.0, 42.0],
                    vec![32.0, 167.0],
                    vec![190.0, 104.0],
                ],
            }),
            current: Some(CurrentSettings {
                axes: vec!['X', 'Y', 'Z', 'E'],
            }),
        }
    }

    /// Index of the physical axis with the given letter
    pub fn axis_index(&self, name: char) -> Option<usize> {
        self.axes.iter().position(|a| a.name == name)
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match Format::from_path(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::info!("Loaded machine config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::from_path(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axes.is_empty() {
            return Err(ConfigError::Missing("axes".to_string()));
        }
        if self.axes.len() > 32 {
            return Err(invalid("axes", "at most 32 axes are supported"));
        }

        let mut names = HashSet::new();
        for axis in &self.axes {
            if !names.insert(axis.name) {
                return Err(ConfigError::DuplicateAxis(axis.name));
            }
            if !(axis.steps_per_unit > 0.0) {
                return Err(invalid(axis_key(axis.name, "steps_per_unit"), "must be > 0"));
            }
            if !(axis.min < axis.max) {
                return Err(invalid(axis_key(axis.name, "min"), "must be below max"));
            }
            if !(axis.max_speed > 0.0) || !(axis.max_accel > 0.0) {
                return Err(invalid(axis_key(axis.name, "max_speed"), "speed and acceleration must be > 0"));
            }
            if !(2..=63).contains(&axis.step_bits) {
                return Err(invalid(axis_key(axis.name, "step_bits"), "must be in 2..=63"));
            }
            if let Some(homing) = &axis.homing {
                if !(homing.fast_speed > 0.0 && homing.retract_speed > 0.0 && homing.slow_speed > 0.0) {
                    return Err(invalid(axis_key(axis.name, "homing"), "speeds must be > 0"));
                }
            }
        }

        if let Some(transform) = &self.transform {
            if transform.virtual_axes.is_empty() {
                return Err(ConfigError::Missing("transform.virtual_axes".to_string()));
            }
            if transform.virtual_axes.len() != transform.physical_axes.len() {
                return Err(invalid(
                    "transform.physical_axes",
                    "must have one entry per virtual axis",
                ));
            }
            for virt in &transform.virtual_axes {
                if !names.insert(virt.name) {
                    return Err(ConfigError::DuplicateAxis(virt.name));
                }
                if !(virt.max_speed > 0.0) {
                    return Err(invalid(axis_key(virt.name, "max_speed"), "must be > 0"));
                }
            }
            let mut fed = HashSet::new();
            for phys in &transform.physical_axes {
                let index = self.axis_index(*phys).ok_or(ConfigError::UnknownAxis(*phys))?;
                if self.axes[index].is_cartesian {
                    return Err(invalid(
                        axis_key(*phys, "is_cartesian"),
                        "axes fed by the transform cannot be cartesian",
                    ));
                }
                if !fed.insert(*phys) {
                    return Err(ConfigError::DuplicateAxis(*phys));
                }
            }
            if !(transform.segments_per_second >= 0.0) {
                return Err(invalid("transform.segments_per_second", "must be >= 0"));
            }
            if !(transform.min_split_length > 0.0 && transform.min_split_length <= transform.max_split_length) {
                return Err(invalid(
                    "transform.min_split_length",
                    "must be > 0 and not above max_split_length",
                ));
            }
        }

        for heater in &self.heaters {
            if !(heater.min_safe_temp < heater.max_safe_temp) {
                return Err(invalid(
                    format!("heater {}", heater.name),
                    "min_safe_temp must be below max_safe_temp",
                ));
            }
            if !positive(heater.control_interval_s) || !positive(heater.observer.interval_s) {
                return Err(invalid(format!("heater {}", heater.name), "intervals must be > 0"));
            }
            if !non_negative(heater.observer.min_time_s) || !non_negative(heater.observer.tolerance) {
                return Err(invalid(
                    format!("heater {}.observer", heater.name),
                    "min_time_s and tolerance must be >= 0",
                ));
            }
        }

        if let Some(storage) = &self.storage {
            if storage.read_buffer_blocks < 2 {
                return Err(invalid("storage.read_buffer_blocks", "must be at least 2"));
            }
            if storage.max_command_size == 0 || storage.max_command_size >= 512 {
                return Err(invalid("storage.max_command_size", "must be in 1..512"));
            }
        }

        if let Some(probe) = &self.probe {
            if probe.platform_axes.len() != probe.platform_offset.len() {
                return Err(invalid("probe.platform_offset", "needs one offset per platform axis"));
            }
            for name in probe.platform_axes.iter().chain(std::iter::once(&probe.probe_axis)) {
                if !names.contains(name) {
                    return Err(ConfigError::UnknownAxis(*name));
                }
            }
            if probe.points.is_empty() {
                return Err(ConfigError::Missing("probe.points".to_string()));
            }
            if probe.points.iter().any(|p| p.len() != probe.platform_axes.len()) {
                return Err(invalid("probe.points", "each point needs one coordinate per platform axis"));
            }
            let speeds = [probe.move_speed, probe.fast_speed, probe.retract_speed, probe.slow_speed];
            if !speeds.into_iter().all(positive) {
                return Err(invalid("probe", "speeds must be > 0"));
            }
        }

        if let Some(current) = &self.current {
            for name in &current.axes {
                if !names.contains(name) {
                    return Err(ConfigError::UnknownAxis(*name));
                }
            }
        }

        if !(self.timing.max_steps_per_second > 0.0) || !(self.timing.speed_limit_multiply > 0.0) {
            return Err(invalid("timing", "step rate and speed multiplier must be > 0"));
        }
        if !non_negative(self.timing.force_timeout_s) {
            return Err(invalid("timing.force_timeout_s", "must be >= 0"));
        }
        if !non_negative(self.timing.inactive_time_s) {
            return Err(invalid("timing.inactive_time_s", "must be >= 0"));
        }
        if self.timing.lookahead_buffer_size == 0 {
            return Err(invalid("timing.lookahead_buffer_size", "must be > 0"));
        }

        if self.serial.recv_buffer_size == 0 || self.serial.send_buffer_size == 0 {
            return Err(invalid("serial", "buffer sizes must be > 0"));
        }

        Ok(())
    }
}

/// Default location of the machine config file
pub fn default_config_path() -> SettingsResult<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| SettingsError::ConfigDirectory("no config directory on this platform".to_string()))?;
    Ok(dir.join("printkit").join("machine.toml"))
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

fn axis_key(name: char, field: &str) -> String {
    format!("axis {}.{}", name, field)
}

/// Finite and above zero
fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Finite and not below zero
fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn invalid(key: impl Into<String>, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_configs_are_valid() {
        assert!(MachineConfig::delta().validate().is_ok());
        assert!(MachineConfig::cartesian().validate().is_ok());
    }

    #[test]
    fn test_duplicate_axis_rejected() {
        let mut config = MachineConfig::cartesian();
        config.axes[1].name = 'X';
        assert_eq!(config.validate(), Err(ConfigError::DuplicateAxis('X')));
    }

    #[test]
    fn test_virtual_name_clash_rejected() {
        let mut config = MachineConfig::delta();
        if let Some(t) = config.transform.as_mut() {
            t.virtual_axes[0].name = 'E';
        }
        assert_eq!(config.validate(), Err(ConfigError::DuplicateAxis('E')));
    }

    #[test]
    fn test_unknown_transform_axis_rejected() {
        let mut config = MachineConfig::delta();
        if let Some(t) = config.transform.as_mut() {
            t.physical_axes[2] = 'Q';
        }
        assert_eq!(config.validate(), Err(ConfigError::UnknownAxis('Q')));
    }

    #[test]
    fn test_storage_limits() {
        let mut config = MachineConfig::delta();
        config.storage = Some(StorageSettings {
            read_buffer_blocks: 1,
            max_command_size: 128,
        });
        assert!(config.validate().is_err());
        config.storage = Some(StorageSettings {
            read_buffer_blocks: 3,
            max_command_size: 512,
        });
        assert!(config.validate().is_err());
    }

    fn rejected_key(config: &MachineConfig) -> String {
        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => key,
            other => panic!("expected an invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_force_timeout_rejected() {
        let mut config = MachineConfig::cartesian();
        config.timing.force_timeout_s = -1.0;
        assert_eq!(rejected_key(&config), "timing.force_timeout_s");
        config.timing.force_timeout_s = f64::NAN;
        assert_eq!(rejected_key(&config), "timing.force_timeout_s");
        config.timing.force_timeout_s = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unbounded_inactive_time_rejected() {
        let mut config = MachineConfig::cartesian();
        config.timing.inactive_time_s = f64::INFINITY;
        assert_eq!(rejected_key(&config), "timing.inactive_time_s");
        config.timing.inactive_time_s = -5.0;
        assert_eq!(rejected_key(&config), "timing.inactive_time_s");
    }

    #[test]
    fn test_probing_speeds_must_be_positive() {
        for field in 0..4 {
            let mut config = MachineConfig::cartesian();
            if let Some(probe) = config.probe.as_mut() {
                let speed = match field {
                    0 => &mut probe.move_speed,
                    1 => &mut probe.fast_speed,
                    2 => &mut probe.retract_speed,
                    _ => &mut probe.slow_speed,
                };
                *speed = 0.0;
            }
            assert_eq!(rejected_key(&config), "probe");
        }

        let mut config = MachineConfig::cartesian();
        if let Some(probe) = config.probe.as_mut() {
            probe.slow_speed = f64::NAN;
        }
        assert_eq!(rejected_key(&config), "probe");
    }

    #[test]
    fn test_observer_min_time_rejected() {
        let mut config = MachineConfig::cartesian();
        config.heaters[0].observer.min_time_s = -1.0;
        assert_eq!(rejected_key(&config), "heater T.observer");
        config.heaters[0].observer.min_time_s = f64::NAN;
        assert_eq!(rejected_key(&config), "heater T.observer");
    }

    #[test]
    fn test_heater_interval_must_be_finite() {
        let mut config = MachineConfig::cartesian();
        config.heaters[1].control_interval_s = f64::INFINITY;
        assert_eq!(rejected_key(&config), "heater B");
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = MachineConfig::cartesian();
        config.axes[0].min = 300.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
