//! Property tests for splitting and the delta transform

use printkit_core::{GcodeCommand, GcodePart};
use printkit_motion::{
    DeltaKinematics, Kinematics, Motion, PlannerCommand, SplitStep, Splitter, StepperDriver,
    MAX_SEGMENTS,
};
use printkit_settings::MachineConfig;
use proptest::prelude::*;

struct NullSteppers;

impl StepperDriver for NullSteppers {
    fn enable(&mut self, _axis: usize) {}
    fn disable(&mut self, _axis: usize) {}
    fn emergency(&mut self) {}
}

fn g1(x: f64, y: f64, z: f64, feed: f64) -> GcodeCommand {
    GcodeCommand::new(
        'G',
        1,
        vec![
            GcodePart::new('X', x.to_string()),
            GcodePart::new('Y', y.to_string()),
            GcodePart::new('Z', z.to_string()),
            GcodePart::new('F', feed.to_string()),
        ],
    )
}

proptest! {
    #[test]
    fn test_splitter_terminates(
        distance in 0.0f64..2000.0,
        base in 0.0f64..100.0,
        rate in 0.0f64..10_000.0,
    ) {
        let mut splitter = Splitter::new(distance, base, rate, 0.1, 4.0);
        prop_assert!(splitter.count() >= 1);
        prop_assert!(splitter.count() <= MAX_SEGMENTS);
        let mut pulls = 0u32;
        let mut last = 0.0;
        loop {
            pulls += 1;
            match splitter.pull() {
                SplitStep::Segment { frac, .. } => {
                    prop_assert!(frac > last && frac < 1.0);
                    last = frac;
                }
                SplitStep::Final { .. } => break,
            }
        }
        prop_assert_eq!(pulls, splitter.count());
    }

    #[test]
    fn test_delta_round_trip(
        x in -60.0f64..60.0,
        y in -60.0f64..60.0,
        z in 0.0f64..150.0,
    ) {
        let k = DeltaKinematics::new(214.0, 105.6);
        let mut phys = [0.0; 3];
        let mut virt = [0.0; 3];
        k.virt_to_phys(&[x, y, z], &mut phys);
        k.phys_to_virt(&phys, &mut virt);
        prop_assert!((virt[0] - x).abs() < 1e-6);
        prop_assert!((virt[1] - y).abs() < 1e-6);
        prop_assert!((virt[2] - z).abs() < 1e-6);
    }

    #[test]
    fn test_split_move_lands_on_exact_target(
        x in -50.0f64..50.0,
        y in -50.0f64..50.0,
        z in 10.0f64..120.0,
        feed in 100.0f64..6000.0,
    ) {
        let mut motion = Motion::from_config(&MachineConfig::delta()).unwrap();
        let mut steppers = NullSteppers;
        motion.move_begin();
        motion.collect_command(&g1(x, y, z, feed));
        let mut submitted = [0i64; 4];
        let mut command = motion.move_end(&mut steppers);
        loop {
            if let PlannerCommand::Axes(cmd) = &command {
                for (total, axis) in submitted.iter_mut().zip(cmd.axes.iter()) {
                    *total += axis.signed_steps();
                }
            }
            if !motion.is_splitting() {
                break;
            }
            command = motion.split_more(&mut steppers);
        }

        let mut phys = [0.0; 3];
        DeltaKinematics::new(214.0, 105.6).virt_to_phys(&[x, y, z], &mut phys);
        for k in 0..3 {
            let axis = motion.axis(k);
            let start = (axis.home_position() * axis.settings().steps_per_unit).round() as i64;
            let want = (phys[k] * axis.settings().steps_per_unit).round() as i64;
            prop_assert_eq!(axis.end_pos().steps(), want);
            prop_assert_eq!(start + submitted[k], want);
        }
    }
}
