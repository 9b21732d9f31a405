//! PID compute-path benchmark.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use tanklab_control_unit::control::pid::{PidController, PidSettings};

fn bench_pid_compute(c: &mut Criterion) {
    let settings = PidSettings {
        kp: 0.3,
        ki: 0.05,
        kd: 0.01,
        setpoint: 20.0,
        dt: 1.0,
        anti_windup_gain: 0.1,
        output_limits: (0.0, 10.0),
    };

    c.bench_function("pid_compute", |b| {
        let mut pid = PidController::new(settings).unwrap();
        let mut measurement = 15.0;
        b.iter(|| {
            measurement = 15.0 + (measurement * 0.1) % 5.0;
            black_box(pid.compute(black_box(measurement)))
        });
    });

    c.bench_function("pid_compute_saturated", |b| {
        let mut pid = PidController::new(settings).unwrap();
        b.iter(|| black_box(pid.compute(black_box(-100.0))));
    });
}

criterion_group!(benches, bench_pid_compute);
criterion_main!(benches);
