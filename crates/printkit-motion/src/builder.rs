//! Move builder
//!
//! [`Motion`] owns every axis and turns motion commands into planner
//! submissions. A move is built in three steps:
//!
//! 1. [`Motion::move_begin`] snapshots the current positions
//! 2. [`Motion::move_add_axis`] records a target per touched axis
//! 3. [`Motion::move_end`] produces the first submission
//!
//! Moves touching virtual axes keep producing segments from
//! [`Motion::split_more`] until the splitter is drained.

use crate::axis::{PhysicalAxis, StepperDriver};
use crate::planner::{AxesCommand, AxisSplit, PlannerCommand};
use crate::splitter::{SplitStep, Splitter};
use crate::transform::{Transform, VirtualAxis};
use printkit_core::{format_fp, time_per_unit_from_feed, GcodeCommand, Result};
use printkit_settings::MachineConfig;

/// An axis addressed by letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRef {
    Physical(usize),
    Virtual(usize),
}

/// Axes, transform and the move being built
#[derive(Debug)]
pub struct Motion {
    axes: Vec<PhysicalAxis>,
    transform: Option<Transform>,
    time_per_unit: f64,
    speed_limit_multiply: f64,
    max_steps_per_second: f64,
    seen_cartesian: bool,
}

impl Motion {
    pub fn from_config(config: &MachineConfig) -> Result<Self> {
        let axes = config
            .axes
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, settings)| PhysicalAxis::new(i, settings))
            .collect();
        let transform = match &config.transform {
            Some(settings) => Some(Transform::new(settings.clone(), &config.axes)?),
            None => None,
        };
        let mut motion = Self {
            axes,
            transform,
            time_per_unit: 0.0,
            speed_limit_multiply: config.timing.speed_limit_multiply,
            max_steps_per_second: config.timing.max_steps_per_second,
            seen_cartesian: false,
        };
        motion.do_pending_virt_update();
        Ok(motion)
    }

    pub fn axes(&self) -> &[PhysicalAxis] {
        &self.axes
    }

    pub fn axis(&self, index: usize) -> &PhysicalAxis {
        &self.axes[index]
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    pub fn virtual_axes(&self) -> &[VirtualAxis] {
        self.transform
            .as_ref()
            .map(|t| t.virtual_axes())
            .unwrap_or(&[])
    }

    /// Sticky seconds-per-unit limit set by `F`
    pub fn time_per_unit(&self) -> f64 {
        self.time_per_unit
    }

    /// Look up an axis letter, physical axes first
    pub fn find_axis(&self, name: char) -> Option<AxisRef> {
        if let Some(i) = self.axes.iter().position(|a| a.name() == name) {
            return Some(AxisRef::Physical(i));
        }
        self.transform
            .as_ref()
            .and_then(|t| t.find_virtual(name))
            .map(AxisRef::Virtual)
    }

    /// Requested position of a physical or virtual axis
    pub fn req_pos(&self, axis: AxisRef) -> f64 {
        match axis {
            AxisRef::Physical(i) => self.axes[i].req_pos(),
            AxisRef::Virtual(i) => self.virtual_axes()[i].req_pos(),
        }
    }

    /// G90/G91 for every axis
    pub fn set_relative(&mut self, relative: bool) {
        for axis in &mut self.axes {
            axis.set_relative(relative);
        }
        if let Some(t) = &mut self.transform {
            for axis in t.virtual_axes_mut() {
                axis.set_relative(relative);
            }
        }
    }

    pub fn is_splitting(&self) -> bool {
        self.transform.as_ref().is_some_and(|t| t.is_splitting())
    }

    /// Note that a fed physical axis moved on its own
    pub fn mark_phys_moved(&mut self, index: usize) {
        if let Some(t) = &mut self.transform {
            if t.feeds(index) {
                t.mark_stale();
            }
        }
    }

    /// Recompute stale virtual positions from the physical axes
    pub fn do_pending_virt_update(&mut self) {
        let Some(t) = &mut self.transform else {
            return;
        };
        if !t.take_stale() {
            return;
        }
        let phys: Vec<f64> = t.phys_index().iter().map(|&i| self.axes[i].req_pos()).collect();
        t.update_virt_from_phys(&phys);
    }

    pub fn move_begin(&mut self) {
        self.do_pending_virt_update();
        self.seen_cartesian = false;
        for axis in &mut self.axes {
            axis.begin_move();
        }
        if let Some(t) = &mut self.transform {
            for axis in t.virtual_axes_mut() {
                axis.begin_move();
            }
        }
    }

    /// Record a target for one axis, honoring relative positioning
    pub fn move_add_axis(&mut self, axis: AxisRef, value: f64) {
        match axis {
            AxisRef::Physical(i) => {
                let a = &mut self.axes[i];
                let target = if a.is_relative() { value + a.old_pos() } else { value };
                a.update_new_pos(target);
                self.seen_cartesian |= a.is_cartesian();
                self.mark_phys_moved(i);
            }
            AxisRef::Virtual(i) => {
                if let Some(t) = &mut self.transform {
                    let v = &mut t.virtual_axes_mut()[i];
                    let target = if v.is_relative() { value + v.old_pos() } else { value };
                    v.set_req_pos(target);
                    t.set_splitting();
                }
            }
        }
    }

    /// Feed every axis letter and `F` of a move command
    pub fn collect_command(&mut self, command: &GcodeCommand) {
        for part in command.parts() {
            if part.code == 'F' {
                self.time_per_unit =
                    time_per_unit_from_feed(part.fp_value(), self.speed_limit_multiply);
            } else if let Some(axis) = self.find_axis(part.code) {
                self.move_add_axis(axis, part.fp_value());
            }
        }
    }

    /// Finish the move being built and return its first submission
    pub fn move_end(&mut self, steppers: &mut dyn StepperDriver) -> PlannerCommand {
        self.move_end_with(steppers, self.time_per_unit)
    }

    /// [`Motion::move_end`] with an explicit seconds-per-unit limit instead
    /// of the sticky feed rate
    pub fn move_end_with(&mut self, steppers: &mut dyn StepperDriver, time_per_unit: f64) -> PlannerCommand {
        debug_assert!(time_per_unit >= 0.0);
        if self.is_splitting() {
            return self.handle_virt_move(steppers, time_per_unit);
        }

        let targets: Vec<f64> = self.axes.iter().map(|a| a.req_pos()).collect();
        let (mut splits, total_steps, distance_squared) = self.do_moves(&targets, true, steppers);
        self.do_pending_virt_update();
        if total_steps == 0 {
            return PlannerCommand::Empty;
        }

        let mut rel_max_v_rec = total_steps as f64 / self.max_steps_per_second;
        if self.seen_cartesian {
            rel_max_v_rec = rel_max_v_rec.max(distance_squared.sqrt() * time_per_unit);
        } else {
            for (axis, split) in self.axes.iter().zip(splits.iter_mut()) {
                axis.limit_move_speed(split, time_per_unit);
            }
        }
        PlannerCommand::Axes(AxesCommand {
            axes: splits,
            rel_max_v_rec,
        })
    }

    fn do_moves(
        &mut self,
        targets: &[f64],
        add_distance: bool,
        steppers: &mut dyn StepperDriver,
    ) -> (Vec<AxisSplit>, u64, f64) {
        let mut total_steps = 0u64;
        let mut distance_squared = 0.0;
        let mut splits = Vec::with_capacity(self.axes.len());
        for (axis, &target) in self.axes.iter_mut().zip(targets) {
            let old_end = axis.end_pos();
            let split = axis.do_move(target);
            if split.steps != 0 {
                if add_distance && axis.is_cartesian() {
                    let delta = axis.dist_to_real(axis.end_pos().as_f64() - old_end.as_f64());
                    distance_squared += delta * delta;
                }
                total_steps += split.steps;
                steppers.enable(axis.index());
            }
            splits.push(split);
        }
        (splits, total_steps, distance_squared)
    }

    fn handle_virt_move(&mut self, steppers: &mut dyn StepperDriver, time_per_unit: f64) -> PlannerCommand {
        let Some(t) = &mut self.transform else {
            return PlannerCommand::Empty;
        };

        // Virtual targets are authoritative; physical ones follow them
        t.take_stale();
        let phys = t.virt_to_phys(&t.virt_req_positions());
        let mut clamped = false;
        for (k, &i) in t.phys_index().iter().enumerate() {
            let axis = &mut self.axes[i];
            let value = axis.clamp_req_pos(phys[k]);
            clamped |= value != phys[k];
            axis.set_req_pos_unclamped(value);
        }
        if clamped {
            t.mark_stale();
        }
        self.do_pending_virt_update();

        let Some(t) = &mut self.transform else {
            return PlannerCommand::Empty;
        };
        let mut distance_squared = 0.0;
        let mut base_max_v_rec: f64 = 0.0;
        for v in t.virtual_axes_mut() {
            let delta = v.compute_delta();
            distance_squared += delta * delta;
            base_max_v_rec = base_max_v_rec.max(delta.abs() / v.settings().max_speed);
        }
        for &i in t.secondary() {
            let axis = &self.axes[i];
            if axis.is_cartesian() {
                let delta = axis.req_pos() - axis.old_pos();
                distance_squared += delta * delta;
            }
        }
        let distance = distance_squared.sqrt();
        base_max_v_rec = base_max_v_rec.max(distance * time_per_unit);

        let settings = t.settings();
        let splitter = Splitter::new(
            distance,
            base_max_v_rec,
            settings.segments_per_second * time_per_unit,
            settings.min_split_length,
            settings.max_split_length,
        );
        t.start_splitter(splitter);
        self.do_split(steppers)
    }

    fn do_split(&mut self, steppers: &mut dyn StepperDriver) -> PlannerCommand {
        loop {
            let Some(t) = &mut self.transform else {
                return PlannerCommand::Empty;
            };
            let Some(step) = t.splitter_mut().map(|s| s.pull()) else {
                return PlannerCommand::Empty;
            };

            let (targets, rel_max_v_rec) = match step {
                SplitStep::Segment {
                    frac,
                    rel_max_v_rec,
                } => {
                    let virt: Vec<f64> =
                        t.virtual_axes().iter().map(|v| v.interpolate(frac)).collect();
                    let phys = t.virt_to_phys(&virt);
                    let mut targets: Vec<f64> = self.axes.iter().map(|a| a.req_pos()).collect();
                    for (k, &i) in t.phys_index().iter().enumerate() {
                        targets[i] = self.axes[i].clamp_req_pos(phys[k]);
                    }
                    for &i in t.secondary() {
                        let axis = &self.axes[i];
                        targets[i] = axis.old_pos() + frac * (axis.req_pos() - axis.old_pos());
                    }
                    (targets, rel_max_v_rec)
                }
                SplitStep::Final { rel_max_v_rec } => {
                    t.end_split();
                    (self.axes.iter().map(|a| a.req_pos()).collect(), rel_max_v_rec)
                }
            };

            let (splits, total_steps, _) = self.do_moves(&targets, false, steppers);
            if total_steps != 0 {
                return PlannerCommand::Axes(AxesCommand {
                    axes: splits,
                    rel_max_v_rec: rel_max_v_rec
                        .max(total_steps as f64 / self.max_steps_per_second),
                });
            }
            if !self.is_splitting() {
                return PlannerCommand::Empty;
            }
        }
    }

    /// Next segment of the move being split
    pub fn split_more(&mut self, steppers: &mut dyn StepperDriver) -> PlannerCommand {
        self.do_split(steppers)
    }

    /// Returns true when no split is active; otherwise the caller is
    /// resumed once the split drains.
    pub fn try_split_clear(&mut self) -> bool {
        match &mut self.transform {
            Some(t) if t.is_splitting() => {
                t.set_splitclear_pending();
                false
            }
            _ => true,
        }
    }

    /// A split drained while someone waited for it
    pub fn take_splitclear_pending(&mut self) -> bool {
        match &mut self.transform {
            Some(t) if !t.is_splitting() => t.take_splitclear_pending(),
            _ => false,
        }
    }

    /// Drop a split cut short by an abort; physical positions are already
    /// reconciled, so virtual ones are recomputed from them.
    pub fn abort_split(&mut self) {
        let Some(t) = &mut self.transform else {
            return;
        };
        if !t.is_splitting() {
            return;
        }
        t.end_split();
        t.mark_stale();
        for axis in &mut self.axes {
            axis.sync_req_to_end();
        }
    }

    /// Take back unexecuted steps after a planner abort
    pub fn fix_aborted_pos(&mut self, remaining: impl Fn(usize) -> i64) {
        for i in 0..self.axes.len() {
            if self.axes[i].fix_aborted_pos(remaining(i)) {
                self.mark_phys_moved(i);
            }
        }
    }

    /// G92: set positions without moving
    pub fn set_position(&mut self, command: &GcodeCommand) {
        let mut seen_virtual = false;
        for part in command.parts() {
            match self.find_axis(part.code) {
                Some(AxisRef::Physical(i)) => {
                    self.axes[i].only_set_position(part.fp_value());
                    self.mark_phys_moved(i);
                }
                Some(AxisRef::Virtual(i)) => {
                    if let Some(t) = &mut self.transform {
                        t.virtual_axes_mut()[i].set_req_pos(part.fp_value());
                        seen_virtual = true;
                    }
                }
                None => {}
            }
        }
        self.handle_set_position(seen_virtual);
    }

    fn handle_set_position(&mut self, seen_virtual: bool) {
        if seen_virtual {
            if let Some(t) = &mut self.transform {
                t.take_stale();
                let phys = t.virt_to_phys(&t.virt_req_positions());
                let mut clamped = false;
                for (k, &i) in t.phys_index().iter().enumerate() {
                    let axis = &mut self.axes[i];
                    axis.only_set_position(phys[k]);
                    clamped |= axis.req_pos() != phys[k];
                }
                if clamped {
                    t.mark_stale();
                }
            }
        }
        self.do_pending_virt_update();
    }

    pub fn start_homing(&mut self, index: usize) {
        self.axes[index].start_homing();
    }

    /// Put a homed axis at its reference position
    pub fn finish_homing(&mut self, index: usize) {
        self.axes[index].finish_homing();
        self.mark_phys_moved(index);
    }

    /// `X:<p>Y:<p>...`, physical axes then virtual axes
    pub fn position_report(&self) -> String {
        let mut out = String::new();
        for axis in &self.axes {
            out.push_str(&format!("{}:{}", axis.name(), format_fp(axis.req_pos())));
        }
        for axis in self.virtual_axes() {
            out.push_str(&format!("{}:{}", axis.name(), format_fp(axis.req_pos())));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printkit_core::GcodePart;

    #[derive(Default)]
    struct Enabled(Vec<usize>);

    impl StepperDriver for Enabled {
        fn enable(&mut self, axis: usize) {
            if !self.0.contains(&axis) {
                self.0.push(axis);
            }
        }
        fn disable(&mut self, axis: usize) {
            self.0.retain(|a| *a != axis);
        }
        fn emergency(&mut self) {
            self.0.clear();
        }
    }

    fn g1(parts: &[(char, &str)]) -> GcodeCommand {
        GcodeCommand::new(
            'G',
            1,
            parts.iter().map(|(c, v)| GcodePart::new(*c, *v)).collect(),
        )
    }

    fn run_move(
        motion: &mut Motion,
        command: &GcodeCommand,
        steppers: &mut Enabled,
    ) -> Vec<PlannerCommand> {
        motion.move_begin();
        motion.collect_command(command);
        let mut out = vec![motion.move_end(steppers)];
        while motion.is_splitting() {
            out.push(motion.split_more(steppers));
        }
        out
    }

    #[test]
    fn test_cartesian_move_uses_euclidean_speed() {
        let mut motion = Motion::from_config(&MachineConfig::cartesian()).unwrap();
        let mut steppers = Enabled::default();
        let cmds = run_move(&mut motion, &g1(&[('X', "30"), ('Y', "40"), ('F', "600")]), &mut steppers);
        let PlannerCommand::Axes(cmd) = &cmds[0] else {
            panic!("expected axes command, got {:?}", cmds);
        };
        assert_eq!(cmd.axes[0].steps, 2400);
        assert_eq!(cmd.axes[1].steps, 3200);
        // 50 units at 10 units/s
        assert!((cmd.rel_max_v_rec - 5.0).abs() < 1e-9);
        assert_eq!(steppers.0, vec![0, 1]);
    }

    #[test]
    fn test_zero_length_move_is_empty() {
        let mut motion = Motion::from_config(&MachineConfig::cartesian()).unwrap();
        let mut steppers = Enabled::default();
        let cmds = run_move(&mut motion, &g1(&[('X', "0")]), &mut steppers);
        assert_eq!(cmds, vec![PlannerCommand::Empty]);
    }

    #[test]
    fn test_relative_moves_accumulate() {
        let mut motion = Motion::from_config(&MachineConfig::cartesian()).unwrap();
        let mut steppers = Enabled::default();
        motion.set_relative(true);
        run_move(&mut motion, &g1(&[('X', "5")]), &mut steppers);
        run_move(&mut motion, &g1(&[('X', "5")]), &mut steppers);
        assert_eq!(motion.axis(0).req_pos(), 10.0);
        assert_eq!(motion.axis(0).end_pos().steps(), 800);
    }

    #[test]
    fn test_extruder_only_move_limits_per_axis() {
        let mut motion = Motion::from_config(&MachineConfig::cartesian()).unwrap();
        let mut steppers = Enabled::default();
        let e = match motion.find_axis('E') {
            Some(AxisRef::Physical(i)) => i,
            other => panic!("no extruder: {:?}", other),
        };
        let cmds = run_move(&mut motion, &g1(&[('E', "2"), ('F', "60")]), &mut steppers);
        let PlannerCommand::Axes(cmd) = &cmds[0] else {
            panic!("expected axes command");
        };
        let spu = motion.axis(e).settings().steps_per_unit;
        assert!((cmd.axes[e].max_v_rec - 1.0 / spu).abs() < 1e-12);
    }

    #[test]
    fn test_delta_move_is_split_and_lands_on_target() {
        let mut motion = Motion::from_config(&MachineConfig::delta()).unwrap();
        let mut steppers = Enabled::default();
        motion.move_begin();
        motion.collect_command(&g1(&[('X', "0"), ('Y', "0"), ('Z', "100")]));
        let mut cmds = vec![motion.move_end(&mut steppers)];
        while motion.is_splitting() {
            cmds.push(motion.split_more(&mut steppers));
        }
        assert!(cmds.len() > 1);

        let mut expected = [0.0; 3];
        motion
            .transform()
            .unwrap()
            .kinematics()
            .virt_to_phys(&[0.0, 0.0, 100.0], &mut expected);
        for (k, target) in expected.iter().enumerate() {
            let axis = motion.axis(k);
            let want = (target * axis.settings().steps_per_unit).round() as i64;
            assert_eq!(axis.end_pos().steps(), want);
        }
        let z = motion.virtual_axes()[2].req_pos();
        assert!((z - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_split_clear_waits_for_split() {
        let mut motion = Motion::from_config(&MachineConfig::delta()).unwrap();
        let mut steppers = Enabled::default();
        assert!(motion.try_split_clear());
        motion.move_begin();
        motion.collect_command(&g1(&[('Z', "50")]));
        motion.move_end(&mut steppers);
        assert!(motion.is_splitting());
        assert!(!motion.try_split_clear());
        assert!(!motion.take_splitclear_pending());
        while motion.is_splitting() {
            motion.split_more(&mut steppers);
        }
        assert!(motion.take_splitclear_pending());
        assert!(!motion.take_splitclear_pending());
    }

    #[test]
    fn test_set_position_physical_and_virtual() {
        let mut motion = Motion::from_config(&MachineConfig::delta()).unwrap();
        motion.set_position(&GcodeCommand::new(
            'G',
            92,
            vec![GcodePart::new('E', "12.5"), GcodePart::new('Z', "80")],
        ));
        let e = motion.axes().iter().position(|a| a.name() == 'E').unwrap();
        assert_eq!(motion.axis(e).req_pos(), 12.5);
        let z = motion.virtual_axes()[2].req_pos();
        assert!((z - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_unreachable_target_clamps_and_recomputes() {
        let mut motion = Motion::from_config(&MachineConfig::delta()).unwrap();
        let mut steppers = Enabled::default();
        motion.move_begin();
        motion.collect_command(&g1(&[('X', "400")]));
        motion.move_end(&mut steppers);
        while motion.is_splitting() {
            motion.split_more(&mut steppers);
        }
        // Virtual state now follows the clamped physical carriages
        let mut phys = [0.0; 3];
        let virt: Vec<f64> = motion.virtual_axes().iter().map(|v| v.req_pos()).collect();
        motion.transform().unwrap().kinematics().virt_to_phys(&virt, &mut phys);
        for (k, p) in phys.iter().enumerate() {
            assert!((p - motion.axis(k).req_pos()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_position_report() {
        let motion = Motion::from_config(&MachineConfig::cartesian()).unwrap();
        assert_eq!(motion.position_report(), "X:0Y:0Z:0E:0");
    }
}
