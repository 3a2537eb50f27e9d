//! Streaming motion planner interface
//!
//! The planner is pull driven: once initialized it asks for work with a
//! [`PlannerEvent::Pull`] and the caller answers each pull with exactly one
//! [`PlannerCommand`]. Completion, abort, underrun and side-channel delivery
//! are reported the same way, through [`MotionPlanner::poll_event`].

use crate::side_channel::AuxPayload;
use std::fmt;

/// Per-axis part of a planner move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSplit {
    /// Direction, `true` for increasing step counts
    pub dir: bool,
    /// Unsigned number of steps to travel
    pub steps: u64,
    /// Reciprocal of the maximum step rate, in seconds per step
    pub max_v_rec: f64,
    /// Reciprocal of the maximum step acceleration, in s² per step
    pub max_a_rec: f64,
}

impl AxisSplit {
    /// Signed step count of this split
    pub fn signed_steps(&self) -> i64 {
        let steps = self.steps as i64;
        if self.dir {
            steps
        } else {
            -steps
        }
    }
}

/// A multi-axis linear move
#[derive(Debug, Clone, PartialEq)]
pub struct AxesCommand {
    /// One entry per physical axis, in configuration order
    pub axes: Vec<AxisSplit>,
    /// Lower bound on the move duration, in seconds
    pub rel_max_v_rec: f64,
}

impl AxesCommand {
    /// Sum of step counts over all axes
    pub fn total_steps(&self) -> u64 {
        self.axes.iter().map(|a| a.steps).sum()
    }
}

/// One submission answering a pull
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerCommand {
    /// Move the axes
    Axes(AxesCommand),
    /// Nothing to move; keeps the pull protocol going
    Empty,
    /// Deliver an auxiliary payload when execution reaches this point
    Channel(AuxPayload),
}

impl fmt::Display for PlannerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerCommand::Axes(cmd) => {
                write!(f, "axes")?;
                for axis in &cmd.axes {
                    write!(f, " {}", axis.signed_steps())?;
                }
                Ok(())
            }
            PlannerCommand::Empty => write!(f, "empty"),
            PlannerCommand::Channel(payload) => write!(f, "channel {}", payload),
        }
    }
}

/// Callback from the planner
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerEvent {
    /// The planner has room for one more command
    Pull,
    /// Everything submitted has executed after `wait_finished`
    Finished,
    /// A watched move was cut short; remaining steps are available from
    /// [`MotionPlanner::aborted_rem_steps`]
    Aborted,
    /// The step generator ran out of buffered work
    Underrun,
    /// A side-channel payload reached the execution point
    Channel(AuxPayload),
}

/// External streaming motion planner
pub trait MotionPlanner: Send {
    /// Start a planning session; the planner will pull shortly after.
    /// With `watch_probe` set, moves may be aborted by the probe input.
    fn init(&mut self, watch_probe: bool);

    /// End the planning session
    fn deinit(&mut self);

    /// Answer the outstanding pull
    fn submit(&mut self, command: PlannerCommand);

    /// No more commands are coming for now; execute everything buffered
    /// and report [`PlannerEvent::Finished`]. The pull stays outstanding.
    fn wait_finished(&mut self);

    /// Signed steps of `axis` that were not executed because of an abort
    fn aborted_rem_steps(&self, axis: usize) -> i64;

    /// Next callback, if any
    fn poll_event(&mut self) -> Option<PlannerEvent>;
}
