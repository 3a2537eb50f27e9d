//! Side-channel payloads
//!
//! Heater and fan changes that must happen at a precise point of the motion
//! stream travel through the planner as [`AuxPayload`]s and are applied when
//! the planner reports them back.

use crate::fan::Fan;
use crate::heater::Heater;
use std::fmt;

/// Auxiliary event carried through the planner
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuxPayload {
    /// New heater target; `None` disables the heater
    Heater {
        /// Heater index
        index: usize,
        /// Target temperature
        target: Option<f64>,
    },
    /// New fan power in `0.0..=1.0`
    Fan {
        /// Fan index
        index: usize,
        /// Output power
        power: f64,
    },
}

impl AuxPayload {
    /// Payload for a heater target, disabling the heater if the target is
    /// outside its safe range
    pub fn heater_target(heater: &Heater, target: f64) -> Self {
        let target = heater.is_safe_target(target).then_some(target);
        if target.is_none() {
            tracing::warn!("Heater {}: unsafe target, disabling", heater.name());
        }
        AuxPayload::Heater {
            index: heater.index(),
            target,
        }
    }

    /// Payload for a fan power
    pub fn fan_power(fan: &Fan, power: f64) -> Self {
        AuxPayload::Fan {
            index: fan.index(),
            power: power.clamp(0.0, 1.0),
        }
    }

    /// Apply the payload to its output
    pub fn apply(&self, heaters: &[Heater], fans: &[Fan]) {
        match *self {
            AuxPayload::Heater { index, target } => match heaters.get(index) {
                Some(heater) => match target {
                    Some(t) => heater.cell().set(t),
                    None => heater.cell().unset(),
                },
                None => tracing::error!("Side-channel payload for unknown heater {}", index),
            },
            AuxPayload::Fan { index, power } => match fans.get(index) {
                Some(fan) => fan.cell().set(power),
                None => tracing::error!("Side-channel payload for unknown fan {}", index),
            },
        }
    }
}

impl fmt::Display for AuxPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuxPayload::Heater {
                index,
                target: Some(t),
            } => write!(f, "heater {} -> {}", index, t),
            AuxPayload::Heater { index, target: None } => write!(f, "heater {} off", index),
            AuxPayload::Fan { index, power } => write!(f, "fan {} -> {}", index, power),
        }
    }
}
