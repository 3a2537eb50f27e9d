//! # PrintKit Motion
//!
//! Everything between a parsed motion command and the external planner:
//!
//! - physical axes with fixed-point step positions ([`axis`])
//! - the move builder ([`builder::Motion`])
//! - the kinematic transform and move splitter ([`transform`], [`splitter`],
//!   [`kinematics`])
//! - the homing coordinator ([`homing`])
//! - heaters and fans, whose targets travel through the planner's side
//!   channel ([`heater`], [`fan`], [`side_channel`])
//! - the pull-driven planner interface ([`planner`])

pub mod axis;
pub mod builder;
pub mod fan;
pub mod heater;
pub mod homing;
pub mod kinematics;
pub mod planner;
pub mod side_channel;
pub mod splitter;
pub mod transform;

pub use axis::{PhysicalAxis, StepperDriver};
pub use builder::{AxisRef, Motion};
pub use fan::{Fan, FanCell};
pub use heater::{
    BangBangControl, Heater, HeaterCell, HeaterControl, HeaterShared, TemperatureObserver,
    TemperatureSensor,
};
pub use homing::{Homer, HomerEvent, HomingParams, HomingSession};
pub use kinematics::{DeltaKinematics, Kinematics};
pub use planner::{AxesCommand, AxisSplit, MotionPlanner, PlannerCommand, PlannerEvent};
pub use side_channel::AuxPayload;
pub use splitter::{SplitStep, Splitter, MAX_SEGMENTS};
pub use transform::{Transform, VirtualAxis};
