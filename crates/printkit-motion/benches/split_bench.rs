use criterion::{black_box, criterion_group, criterion_main, Criterion};
use printkit_core::{GcodeCommand, GcodePart};
use printkit_motion::{Motion, StepperDriver};
use printkit_settings::MachineConfig;

struct NullSteppers;

impl StepperDriver for NullSteppers {
    fn enable(&mut self, _axis: usize) {}
    fn disable(&mut self, _axis: usize) {}
    fn emergency(&mut self) {}
}

fn bench_delta_split(c: &mut Criterion) {
    let config = MachineConfig::delta();
    let there = GcodeCommand::new(
        'G',
        1,
        vec![
            GcodePart::new('X', "40"),
            GcodePart::new('Y', "-30"),
            GcodePart::new('Z', "20"),
            GcodePart::new('F', "3000"),
        ],
    );
    let back = GcodeCommand::new(
        'G',
        1,
        vec![
            GcodePart::new('X', "-40"),
            GcodePart::new('Y', "30"),
            GcodePart::new('Z', "120"),
        ],
    );

    c.bench_function("delta_split_move", |b| {
        let mut motion = Motion::from_config(&config).expect("builtin config");
        let mut steppers = NullSteppers;
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            motion.move_begin();
            motion.collect_command(if flip { &there } else { &back });
            let mut cmd = motion.move_end(&mut steppers);
            while motion.is_splitting() {
                cmd = motion.split_more(&mut steppers);
            }
            black_box(cmd)
        });
    });
}

criterion_group!(benches, bench_delta_split);
criterion_main!(benches);
