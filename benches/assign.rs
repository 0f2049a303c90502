use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, ArrayD};
use param_adjoint::{Assignable, Parameter, Tape};

fn make_values(n: usize, shift: f64) -> ArrayD<f64> {
    Array1::from_shape_fn(n, |i| i as f64 + shift).into_dyn()
}

fn bench_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign");
    for n in [1, 16, 1024] {
        let values = make_values(n, 0.5);

        group.bench_with_input(BenchmarkId::new("unrecorded", n), &n, |b, &n| {
            let mut p = Parameter::new(make_values(n, 0.0));
            b.iter(|| {
                p.assign(black_box(values.clone()), None).unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("recorded", n), &n, |b, &n| {
            let mut tape = Tape::new();
            let mut p = Parameter::new(make_values(n, 0.0));
            b.iter(|| {
                p.assign(black_box(values.clone()), Some(&mut tape)).unwrap();
                if tape.len() > 4096 {
                    tape.clear();
                    p = Parameter::new(make_values(n, 0.0));
                }
            })
        });
    }
    group.finish();
}

fn bench_adjoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_adj");
    for steps in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, &steps| {
            let mut tape = Tape::new();
            let mut p = Parameter::from_vec(vec![1.0; 8]);
            for k in 0..steps {
                p.assign(make_values(8, k as f64), Some(&mut tape)).unwrap();
            }
            let out = p.current_block_variable().unwrap();
            b.iter(|| {
                tape.reset_variables();
                tape.seed_adjoint(out, make_values(8, 1.0)).unwrap();
                tape.evaluate_adj().unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assign, bench_adjoint);
criterion_main!(benches);
