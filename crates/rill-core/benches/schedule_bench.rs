//! Criterion benchmarks for the rill-core compiler and frame runner.
//!
//! Two axes:
//!
//! - **Compile** - cycle check, Kahn sort, and phase layout
//! - **Frame** - `run_frame()` cost for chains of latched integrators
//!
//! Run with: `cargo bench -p rill-core -- schedule/`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rill_core::{BinaryFn, CombineMode, Domain, ProgramBuilder, Runtime, TypeDesc, Value};

const FRAME_MS: f64 = 16.67;
const SIZES: &[usize] = &[8, 64, 512];

// ---------------------------------------------------------------------------
// Program constructors
// ---------------------------------------------------------------------------

/// `n` integrators, each fed by the previous one's output, all publishing
/// into one summing bus.
fn integrator_chain(n: usize) -> ProgramBuilder {
    let mut b = ProgramBuilder::new();
    b.bus("mix", TypeDesc::signal(Domain::Float), CombineMode::Sum, None);
    let mut drive = b.delta_time();
    for i in 0..n {
        let cell = b.state_cell(
            format!("int{i}"),
            TypeDesc::signal(Domain::Float),
            Value::Float(0.0),
            None,
        );
        let next = b.binary(BinaryFn::Add, cell.prev(), drive);
        b.commit(cell, next);
        b.publish("mix", next, i as i32);
        drive = next;
    }
    let mix = b.listen("mix");
    b.output("mix", mix);
    b
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule/compile");
    for &n in SIZES {
        group.bench_with_input(BenchmarkId::new("integrators", n), &n, |b, &n| {
            b.iter(|| black_box(integrator_chain(n).compile()));
        });
    }
    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule/frame");
    for &n in SIZES {
        let program = integrator_chain(n).compile().into_result().unwrap();
        let mut rt = Runtime::new(program);
        group.bench_with_input(BenchmarkId::new("integrators", n), &n, |b, _| {
            b.iter(|| {
                rt.run_frame(black_box(FRAME_MS)).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_frame);
criterion_main!(benches);
