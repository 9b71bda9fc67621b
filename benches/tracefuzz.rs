use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tracefuzz::evm::{
    oracle::{run_detectors, DetectionCtx},
    oracles::default_detectors,
    trace::{interpret, TraceStep},
    types::EVMU256,
};

fn word(v: u64) -> EVMU256 {
    EVMU256::from(v)
}

/// A long trace with nested calls, storage traffic and an origin read every frame
fn synthetic_trace(frames: usize, steps_per_frame: usize) -> Vec<TraceStep> {
    let mut steps = vec![];
    for depth in 1..=frames {
        steps.push(TraceStep::new(0, "ORIGIN", depth, vec![]));
        for i in 0..steps_per_frame {
            let op = match i % 4 {
                0 => "SLOAD",
                1 => "ADD",
                2 => "SSTORE",
                _ => "JUMPI",
            };
            steps.push(TraceStep::new(i as u64, op, depth, vec![word(i as u64), word(i as u64 % 8)]));
        }
        steps.push(TraceStep::new(
            99,
            "CALL",
            depth,
            vec![word(0), word(0), word(0), word(0), word(0), word(0xbeef), word(100_000)],
        ));
    }
    for depth in (1..=frames).rev() {
        steps.push(TraceStep::new(0, "SSTORE", depth, vec![word(1), word(0)]));
        steps.push(TraceStep::new(0, "STOP", depth, vec![]));
    }
    steps
}

fn bench_interpret(c: &mut Criterion) {
    let steps = synthetic_trace(8, 2_000);
    c.bench_function("interpret", |b| b.iter(|| interpret(black_box(&steps))));

    let facts = interpret(&steps);
    let detectors = default_detectors();
    let ctx = DetectionCtx::new(0, "withdraw");
    c.bench_function("detectors", |b| {
        b.iter(|| run_detectors(black_box(&detectors), black_box(&facts), &ctx))
    });
}

criterion_group!(benches, bench_interpret);
criterion_main!(benches);
