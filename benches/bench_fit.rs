use criterion::{black_box, criterion_group, criterion_main, Criterion};

use statespace_rs::{batch_fit, fit, FitOptions, LocalLinearTrend};

fn trend_series(n: usize, salt: usize) -> Vec<f64> {
    (0..n)
        .map(|t| 0.3 * t as f64 + (((t + salt) * 6151) % 17) as f64 * 0.05)
        .collect()
}

fn bench_fit_single(c: &mut Criterion) {
    let y = trend_series(200, 0);
    let model = LocalLinearTrend::new(&y).unwrap();
    let options = FitOptions {
        method: Some("nelder-mead".into()),
        maxiter: Some(500),
        ..Default::default()
    };
    c.bench_function("fit_local_linear_trend_200", |b| {
        b.iter(|| fit(black_box(&model), &options).unwrap())
    });
}

fn bench_fit_batch(c: &mut Criterion) {
    let models: Vec<LocalLinearTrend> = (0..8)
        .map(|i| LocalLinearTrend::new(&trend_series(200, i)).unwrap())
        .collect();
    let options = FitOptions {
        method: Some("nelder-mead".into()),
        maxiter: Some(500),
        ..Default::default()
    };
    c.bench_function("batch_fit_8x200", |b| {
        b.iter(|| batch_fit(black_box(&models), &options))
    });
}

criterion_group!(benches, bench_fit_single, bench_fit_batch);
criterion_main!(benches);
