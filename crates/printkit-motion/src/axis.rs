//! Physical axes
//!
//! Each axis tracks two positions: the requested position in real units and
//! the committed end position as a step count. Moves are built by rounding
//! a new requested position to steps and emitting the difference.

use crate::homing::HomingParams;
use crate::planner::AxisSplit;
use printkit_core::StepPosition;
use printkit_settings::AxisSettings;

/// Stepper driver enable lines
pub trait StepperDriver: Send {
    /// Energize the driver of an axis
    fn enable(&mut self, axis: usize);

    /// Release the driver of an axis
    fn disable(&mut self, axis: usize);

    /// Release every driver immediately
    fn emergency(&mut self);
}

/// A stepper-driven axis
#[derive(Debug, Clone)]
pub struct PhysicalAxis {
    index: usize,
    settings: AxisSettings,
    req_pos: f64,
    old_pos: f64,
    end_pos: StepPosition,
    relative: bool,
    homing: bool,
}

impl PhysicalAxis {
    /// Create an axis resting at its home position, or zero without homing
    pub fn new(index: usize, settings: AxisSettings) -> Self {
        let mut axis = Self {
            index,
            settings,
            req_pos: 0.0,
            old_pos: 0.0,
            end_pos: StepPosition::default(),
            relative: false,
            homing: false,
        };
        if axis.settings.homing.is_some() {
            axis.req_pos = axis.home_position();
        }
        axis.end_pos = axis.steps_for(axis.req_pos);
        axis.old_pos = axis.req_pos;
        axis
    }

    /// Axis index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Axis letter
    pub fn name(&self) -> char {
        self.settings.name
    }

    /// Configuration
    pub fn settings(&self) -> &AxisSettings {
        &self.settings
    }

    /// Requested position
    pub fn req_pos(&self) -> f64 {
        self.req_pos
    }

    /// Position at the start of the move being built
    pub fn old_pos(&self) -> f64 {
        self.old_pos
    }

    /// Committed end position
    pub fn end_pos(&self) -> StepPosition {
        self.end_pos
    }

    /// Contributes to the Euclidean move distance
    pub fn is_cartesian(&self) -> bool {
        self.settings.is_cartesian
    }

    /// Relative positioning is active
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// A homing sequence is running
    pub fn is_homing(&self) -> bool {
        self.homing
    }

    pub fn dist_from_real(&self, x: f64) -> f64 {
        x * self.settings.steps_per_unit
    }

    pub fn dist_to_real(&self, steps: f64) -> f64 {
        steps / self.settings.steps_per_unit
    }

    /// Lowest reachable position
    pub fn min_req_pos(&self) -> f64 {
        let limit = StepPosition::limit(self.settings.step_bits) as f64;
        self.settings.min.max(self.dist_to_real(-limit))
    }

    /// Highest reachable position
    pub fn max_req_pos(&self) -> f64 {
        let limit = StepPosition::limit(self.settings.step_bits) as f64;
        self.settings.max.min(self.dist_to_real(limit))
    }

    /// Limit a position to travel. NaN clamps to the maximum.
    pub fn clamp_req_pos(&self, req: f64) -> f64 {
        if !(req <= self.max_req_pos()) {
            self.max_req_pos()
        } else if !(req >= self.min_req_pos()) {
            self.min_req_pos()
        } else {
            req
        }
    }

    /// Reference position established by homing
    pub fn home_position(&self) -> f64 {
        match &self.settings.homing {
            Some(homing) if homing.home_dir_max => self.max_req_pos(),
            _ => self.min_req_pos(),
        }
    }

    fn steps_for(&self, req: f64) -> StepPosition {
        StepPosition::from_steps_saturated(self.dist_from_real(req), self.settings.step_bits)
    }

    pub(crate) fn begin_move(&mut self) {
        self.old_pos = self.req_pos;
    }

    pub(crate) fn set_relative(&mut self, relative: bool) {
        self.relative = relative;
    }

    /// Record a new clamped request for the move being built
    pub(crate) fn update_new_pos(&mut self, req: f64) {
        self.req_pos = self.clamp_req_pos(req);
    }

    pub(crate) fn set_req_pos_unclamped(&mut self, req: f64) {
        self.req_pos = req;
    }

    /// Commit `new_pos` and return the split taking the axis there
    pub(crate) fn do_move(&mut self, new_pos: f64) -> AxisSplit {
        let new_end = self.steps_for(new_pos);
        let delta = new_end.steps() - self.end_pos.steps();
        self.end_pos = new_end;
        AxisSplit {
            dir: delta >= 0,
            steps: delta.unsigned_abs(),
            max_v_rec: 1.0 / (self.settings.max_speed * self.settings.steps_per_unit),
            max_a_rec: 1.0 / (self.settings.max_accel * self.settings.steps_per_unit),
        }
    }

    /// Apply a requested speed independently to this axis
    pub(crate) fn limit_move_speed(&self, split: &mut AxisSplit, time_per_unit: f64) {
        split.max_v_rec = split.max_v_rec.max(time_per_unit / self.settings.steps_per_unit);
    }

    /// Take back steps the planner never executed. Returns whether the
    /// position changed.
    pub(crate) fn fix_aborted_pos(&mut self, rem_steps: i64) -> bool {
        if rem_steps == 0 {
            return false;
        }
        self.end_pos.rewind(rem_steps);
        self.req_pos = self.dist_to_real(self.end_pos.as_f64());
        true
    }

    /// Set both positions without moving
    pub(crate) fn only_set_position(&mut self, value: f64) {
        self.req_pos = self.clamp_req_pos(value);
        self.end_pos = self.steps_for(self.req_pos);
    }

    /// Snap the requested position to the committed step count
    pub(crate) fn sync_req_to_end(&mut self) {
        self.req_pos = self.dist_to_real(self.end_pos.as_f64());
    }

    /// Parameters for the homer, if the axis homes
    pub fn homing_params(&self) -> Option<HomingParams> {
        self.settings
            .homing
            .as_ref()
            .map(|h| HomingParams::from_settings(h, &self.settings))
    }

    pub(crate) fn start_homing(&mut self) {
        assert!(!self.homing, "axis {} is already homing", self.name());
        self.homing = true;
    }

    /// Finish homing: the axis now rests at its reference position
    pub(crate) fn finish_homing(&mut self) {
        assert!(self.homing, "axis {} finished homing without starting", self.name());
        self.homing = false;
        self.req_pos = self.home_position();
        self.end_pos = self.steps_for(self.req_pos);
    }
}
