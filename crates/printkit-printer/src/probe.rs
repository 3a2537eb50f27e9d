//! Bed probing
//!
//! `G32` runs an exclusive planner session per move. Each configured point
//! takes five moves:
//!
//! 0. travel to the point at the start height
//! 1. fast probe down towards the low height, watching the probe input
//! 2. retract from where the fast probe stopped
//! 3. slow probe down, watching the probe input
//! 4. retract to the start height
//!
//! A watched move is normally cut short by the probe. The height where the
//! slow probe stopped is the sample for that point.

use crate::printer::Printer;
use printkit_core::{format_fp, ConfigError, PrinterEvent, Result};
use printkit_motion::{AxisRef, Motion};
use printkit_settings::ProbeSettings;

/// Moves per probe point
const MOVES_PER_POINT: u8 = 5;

/// Probe configuration resolved against the configured axes
#[derive(Debug, Clone)]
pub struct ProbePlan {
    settings: ProbeSettings,
    platform: Vec<AxisRef>,
    probe_axis: AxisRef,
}

impl ProbePlan {
    pub fn new(settings: ProbeSettings, motion: &Motion) -> Result<Self> {
        let platform = settings
            .platform_axes
            .iter()
            .map(|&name| motion.find_axis(name).ok_or(ConfigError::UnknownAxis(name)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let probe_axis = motion
            .find_axis(settings.probe_axis)
            .ok_or(ConfigError::UnknownAxis(settings.probe_axis))?;
        Ok(Self {
            settings,
            platform,
            probe_axis,
        })
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn num_points(&self) -> usize {
        self.settings.points.len()
    }
}

/// Progress of a running `G32`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSession {
    point: usize,
    step: u8,
    sent: bool,
}

impl ProbeSession {
    fn new() -> Self {
        Self {
            point: 0,
            step: 0,
            sent: false,
        }
    }

    pub fn point(&self) -> usize {
        self.point
    }

    pub fn step(&self) -> u8 {
        self.step
    }
}

impl Printer {
    pub(crate) fn start_probe(&mut self) {
        assert!(self.probe.is_none(), "probe sequence already running");
        tracing::info!("Probing {} points", self.probe_points());
        self.custom_planner_init(false);
        self.probe = Some(ProbeSession::new());
    }

    fn probe_points(&self) -> usize {
        self.probe_plan.as_ref().map_or(0, |p| p.num_points())
    }

    pub(crate) fn probe_pull(&mut self) {
        let (Some(session), Some(plan)) = (self.probe, self.probe_plan.as_ref()) else {
            panic!("probe pull without a probe sequence");
        };
        assert!(session.step < MOVES_PER_POINT);
        if session.sent {
            self.custom_wait_finished();
            return;
        }

        let settings = &plan.settings;
        let probe_axis = plan.probe_axis;
        self.motion.move_begin();
        let (height, speed) = match session.step {
            0 => {
                let point = &settings.points[session.point];
                for ((axis, coord), offset) in
                    plan.platform.iter().zip(point).zip(&settings.platform_offset)
                {
                    self.motion.move_add_axis(*axis, coord + offset);
                }
                (settings.start_height, settings.move_speed)
            }
            1 => (settings.low_height, settings.fast_speed),
            2 => (
                self.motion.req_pos(probe_axis) + settings.retract_dist,
                settings.retract_speed,
            ),
            3 => (settings.low_height, settings.slow_speed),
            _ => (settings.start_height, settings.retract_speed),
        };
        self.motion.move_add_axis(probe_axis, height);
        let command = self.motion.move_end_with(self.steppers.as_mut(), 1.0 / speed);
        self.submit(command);
        if let Some(session) = self.probe.as_mut() {
            session.sent = true;
        }
    }

    /// The current probe move completed or was stopped by the probe
    pub(crate) fn probe_finished(&mut self) {
        let (Some(mut session), Some(plan)) = (self.probe, self.probe_plan.as_ref()) else {
            panic!("probe completion without a probe sequence");
        };
        assert!(session.sent, "probe completion without a move");
        let probe_axis = plan.probe_axis;
        let num_points = plan.num_points();

        self.custom_planner_deinit();
        session.sent = false;
        if session.step < MOVES_PER_POINT - 1 {
            if session.step == 3 {
                let height = self.motion.req_pos(probe_axis);
                self.report_probe_height(session.point, height);
            }
            session.step += 1;
            self.probe = Some(session);
            self.custom_planner_init(session.step == 1 || session.step == 3);
            return;
        }

        session.point += 1;
        if session.point == num_points {
            self.probe = None;
            tracing::info!("Probing finished");
            self.finish_locked();
            return;
        }
        session.step = 0;
        self.probe = Some(session);
        self.custom_planner_init(false);
    }

    fn report_probe_height(&mut self, point: usize, height: f64) {
        self.probe_samples[point] = Some(height);
        tracing::info!("Probe point {}: height {}", point, height);
        if let Some(kind) = self.arbiter.locked_channel() {
            self.reply(kind, &format!("//ProbeHeight {}\n", format_fp(height)));
            self.flush(kind);
        }
        self.events.publish(PrinterEvent::ProbeHeight { point, height });
    }
}
