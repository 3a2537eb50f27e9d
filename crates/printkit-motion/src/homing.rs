//! Homing coordinator
//!
//! A homing session runs one external homing sequence per selected axis.
//! The session ends when every started axis has reported completion.

use printkit_core::AxisMask;
use printkit_settings::{AxisSettings, HomingSettings};

/// Everything a per-axis homer needs to run its sequence
#[derive(Debug, Clone, PartialEq)]
pub struct HomingParams {
    pub home_dir_max: bool,
    pub endstop_invert: bool,
    pub steps_per_unit: f64,
    pub fast_max_dist: f64,
    pub retract_dist: f64,
    pub slow_max_dist: f64,
    pub fast_speed: f64,
    pub retract_speed: f64,
    pub slow_speed: f64,
    pub max_accel: f64,
}

impl HomingParams {
    pub fn from_settings(homing: &HomingSettings, axis: &AxisSettings) -> Self {
        Self {
            home_dir_max: homing.home_dir_max,
            endstop_invert: homing.endstop_invert,
            steps_per_unit: axis.steps_per_unit,
            fast_max_dist: homing.fast_max_dist,
            retract_dist: homing.retract_dist,
            slow_max_dist: homing.slow_max_dist,
            fast_speed: homing.fast_speed,
            retract_speed: homing.retract_speed,
            slow_speed: homing.slow_speed,
            max_accel: axis.max_accel,
        }
    }
}

/// Completion report of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomerEvent {
    pub axis: usize,
    pub success: bool,
}

/// External per-axis homing sequencer
pub trait Homer: Send {
    /// Begin homing `axis`; completion is reported through `poll_event`
    fn start(&mut self, axis: usize, params: &HomingParams);

    /// Abandon a running sequence without reporting
    fn cancel(&mut self, axis: usize);

    /// Current endstop state, after inversion
    fn endstop_triggered(&self, axis: usize) -> bool;

    fn poll_event(&mut self) -> Option<HomerEvent>;
}

/// Book-keeping of one G28
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomingSession {
    mask: AxisMask,
    remaining: usize,
}

impl HomingSession {
    pub fn new(mask: AxisMask) -> Self {
        Self { mask, remaining: 0 }
    }

    /// Axes the command asked for; empty means all
    pub fn mask(&self) -> AxisMask {
        self.mask
    }

    /// Whether `axis` is selected by this session
    pub fn selects(&self, axis: usize) -> bool {
        self.mask.is_empty() || self.mask.contains(axis)
    }

    /// Count an axis whose sequence was started
    pub fn axis_started(&mut self) {
        self.remaining += 1;
    }

    /// Count a completed axis. Returns true when it was the last one.
    pub fn axis_finished(&mut self) -> bool {
        assert!(self.remaining > 0, "homing completion without a running axis");
        self.remaining -= 1;
        self.remaining == 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mask_selects_all() {
        let session = HomingSession::new(AxisMask::empty());
        assert!(session.selects(0));
        assert!(session.selects(5));

        let only_z = HomingSession::new(AxisMask::single(2));
        assert!(only_z.selects(2));
        assert!(!only_z.selects(0));
    }

    #[test]
    fn test_counter_reaches_zero_once() {
        let mut session = HomingSession::new(AxisMask::empty());
        session.axis_started();
        session.axis_started();
        assert!(!session.axis_finished());
        assert_eq!(session.remaining(), 1);
        assert!(session.axis_finished());
    }

    #[test]
    #[should_panic(expected = "homing completion")]
    fn test_extra_completion_is_fatal() {
        let mut session = HomingSession::new(AxisMask::empty());
        session.axis_finished();
    }
}
