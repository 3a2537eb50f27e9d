//! Move splitting
//!
//! A virtual move is straight in kinematic space but curved in physical
//! space, so it is submitted as a run of short linear segments. The
//! [`Splitter`] hands out one interpolation point per call; the last call
//! always yields [`SplitStep::Final`] so the caller lands on the exact
//! requested target.

/// Upper bound on segments per move
pub const MAX_SEGMENTS: u32 = 100_000;

/// One advance of the splitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitStep {
    /// Intermediate point at `frac` of the way, in `(0, 1)`
    Segment { frac: f64, rel_max_v_rec: f64 },
    /// The end of the move
    Final { rel_max_v_rec: f64 },
}

/// Resumable cursor over one virtual move
#[derive(Debug, Clone, PartialEq)]
pub struct Splitter {
    count: u32,
    pos: u32,
    rel_max_v_rec: f64,
}

impl Splitter {
    /// Plan the segmentation of a move of length `distance`.
    ///
    /// `base_max_v_rec` is the minimum duration of the whole move and
    /// `min_segments_per_unit` the rate-derived segment density.
    pub fn new(
        distance: f64,
        base_max_v_rec: f64,
        min_segments_per_unit: f64,
        min_split_length: f64,
        max_split_length: f64,
    ) -> Self {
        let by_length = (distance / max_split_length).ceil();
        let by_rate = (distance * min_segments_per_unit).ceil();
        let mut count = by_length.max(by_rate);
        let at_most = (distance / min_split_length).floor();
        if !(count <= at_most) {
            count = at_most;
        }
        // NaN and zero lengths still take one segment
        let count = if count >= 1.0 {
            (count as u32).min(MAX_SEGMENTS)
        } else {
            1
        };
        tracing::trace!(distance, count, "splitting move");
        Self {
            count,
            pos: 0,
            rel_max_v_rec: base_max_v_rec / count as f64,
        }
    }

    /// Total number of segments
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Segments handed out so far
    pub fn position(&self) -> u32 {
        self.pos
    }

    /// Advance to the next segment
    pub fn pull(&mut self) -> SplitStep {
        self.pos += 1;
        if self.pos >= self.count {
            SplitStep::Final {
                rel_max_v_rec: self.rel_max_v_rec,
            }
        } else {
            SplitStep::Segment {
                frac: self.pos as f64 / self.count as f64,
                rel_max_v_rec: self.rel_max_v_rec,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_move_limited_by_max_length() {
        let splitter = Splitter::new(10.0, 1.0, 0.0, 0.1, 4.0);
        assert_eq!(splitter.count(), 3);
    }

    #[test]
    fn test_rate_dominates_when_slow() {
        let splitter = Splitter::new(10.0, 5.0, 5.0, 0.125, 4.0);
        assert_eq!(splitter.count(), 50);
    }

    #[test]
    fn test_min_length_caps_count() {
        let splitter = Splitter::new(10.0, 5.0, 1000.0, 0.125, 4.0);
        assert_eq!(splitter.count(), 80);
    }

    #[test]
    fn test_short_move_is_one_segment() {
        let mut splitter = Splitter::new(0.05, 1.0, 1000.0, 0.1, 4.0);
        assert_eq!(splitter.count(), 1);
        assert_eq!(splitter.pull(), SplitStep::Final { rel_max_v_rec: 1.0 });
    }

    #[test]
    fn test_nan_distance_is_one_segment() {
        let splitter = Splitter::new(f64::NAN, 1.0, 100.0, 0.1, 4.0);
        assert_eq!(splitter.count(), 1);
    }

    #[test]
    fn test_fractions_increase_to_final() {
        let mut splitter = Splitter::new(8.0, 2.0, 0.0, 0.1, 2.0);
        assert_eq!(splitter.count(), 4);
        let mut fracs = Vec::new();
        loop {
            match splitter.pull() {
                SplitStep::Segment { frac, rel_max_v_rec } => {
                    assert_eq!(rel_max_v_rec, 0.5);
                    fracs.push(frac);
                }
                SplitStep::Final { .. } => break,
            }
        }
        assert_eq!(fracs, vec![0.25, 0.5, 0.75]);
    }
}
