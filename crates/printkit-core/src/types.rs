//! Small value types shared by every layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Set of physical axes, one bit per axis index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisMask(u32);

impl AxisMask {
    /// Mask selecting every axis
    pub const ALL: AxisMask = AxisMask(u32::MAX);

    /// Empty mask
    pub const fn empty() -> Self {
        AxisMask(0)
    }

    /// Mask with only `index` set
    pub const fn single(index: usize) -> Self {
        AxisMask(1 << index)
    }

    /// Add an axis
    pub fn insert(&mut self, index: usize) {
        self.0 |= 1 << index;
    }

    /// Test an axis
    pub fn contains(&self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }

    /// No axes selected
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw bits
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AxisMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

/// Committed axis position as a signed step count
///
/// The count is limited to `step_bits - 1` magnitude bits so that the
/// difference of two positions always fits the planner's unsigned step
/// field of `step_bits` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepPosition(i64);

impl StepPosition {
    /// Largest representable magnitude for the given width
    pub fn limit(step_bits: u8) -> i64 {
        (1i64 << (step_bits.clamp(2, 63) - 1)) - 1
    }

    /// Round a step count, saturating at the representable range
    pub fn from_steps_saturated(steps: f64, step_bits: u8) -> Self {
        let limit = Self::limit(step_bits);
        if steps.is_nan() {
            return StepPosition(0);
        }
        let rounded = steps.round();
        if rounded >= limit as f64 {
            StepPosition(limit)
        } else if rounded <= -(limit as f64) {
            StepPosition(-limit)
        } else {
            StepPosition(rounded as i64)
        }
    }

    /// Wrap an exact count
    pub const fn from_raw(steps: i64) -> Self {
        StepPosition(steps)
    }

    /// Step count
    pub fn steps(&self) -> i64 {
        self.0
    }

    /// Step count as floating point
    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }

    /// Move back by steps that were never executed
    pub fn rewind(&mut self, remaining: i64) {
        self.0 -= remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_mask() {
        let mut mask = AxisMask::empty();
        assert!(mask.is_empty());
        mask.insert(2);
        assert!(mask.contains(2));
        assert!(!mask.contains(0));
        assert!(AxisMask::ALL.contains(7));
        assert_eq!(AxisMask::single(1).bits(), 2);
    }

    #[test]
    fn test_step_position_saturates() {
        assert_eq!(StepPosition::limit(8), 127);
        assert_eq!(StepPosition::from_steps_saturated(1000.0, 8).steps(), 127);
        assert_eq!(StepPosition::from_steps_saturated(-1000.0, 8).steps(), -127);
        assert_eq!(StepPosition::from_steps_saturated(12.5, 16).steps(), 13);
        assert_eq!(StepPosition::from_steps_saturated(f64::NAN, 16).steps(), 0);
    }

    #[test]
    fn test_rewind() {
        let mut pos = StepPosition::from_raw(100);
        pos.rewind(30);
        assert_eq!(pos.steps(), 70);
    }

    proptest::proptest! {
        #[test]
        fn test_step_position_stays_in_range(steps in proptest::num::f64::ANY, bits in 2u8..40) {
            let limit = StepPosition::limit(bits);
            let pos = StepPosition::from_steps_saturated(steps, bits);
            proptest::prop_assert!(pos.steps().abs() <= limit);
        }
    }
}
