//! External collaborators of the printer
//!
//! Everything the orchestrator drives but does not implement is reached
//! through a trait object in [`Hardware`].

use crate::timers::Clock;
use printkit_communication::{BlockDevice, SerialPort};
use printkit_motion::{Homer, MotionPlanner, StepperDriver, TemperatureSensor};

/// Motor current driver
pub trait CurrentControl: Send {
    /// Set the current of physical axis `axis`
    fn set_current(&mut self, axis: usize, current: f64);
}

/// Collaborators handed to [`crate::Printer::new`]
pub struct Hardware {
    pub clock: Box<dyn Clock>,
    pub planner: Box<dyn MotionPlanner>,
    pub homer: Box<dyn Homer>,
    pub steppers: Box<dyn StepperDriver>,
    pub sensor: Box<dyn TemperatureSensor>,
    pub serial: Box<dyn SerialPort>,
    /// Only used when the machine has storage configured
    pub storage: Option<Box<dyn BlockDevice>>,
    /// Only used when the machine has current control configured
    pub current: Option<Box<dyn CurrentControl>>,
}
