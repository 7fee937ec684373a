//! Benchmarks for the anomaly detectors and the fused suite.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use weathercast::config::DetectorSuiteConfig;
use weathercast::core::DailySeries;
use weathercast::detection::{
    detect, iqr_scores, isolation_scores, level_shift_scores, modified_z_scores, rolling_z_scores,
    seasonal_residual_scores, DetectorState,
};
use weathercast::quality::CleanedData;

fn generate_weather(n: usize, phase: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            15.0 + 8.0 * (2.0 * std::f64::consts::PI * t / 365.0 + phase).sin()
                + 2.0 * (2.0 * std::f64::consts::PI * t / 7.0).sin()
                + ((i * 37) % 11) as f64 * 0.1
        })
        .collect()
}

fn cleaned(n: usize) -> CleanedData {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let variables: BTreeMap<String, DailySeries> = [("temperature", 0.0), ("humidity", 1.0)]
        .into_iter()
        .map(|(name, phase)| {
            let series = DailySeries::observed(name, start, generate_weather(n, phase)).unwrap();
            (name.to_string(), series)
        })
        .collect();
    CleanedData { start, variables }
}

fn bench_univariate(c: &mut Criterion) {
    let mut group = c.benchmark_group("univariate_detectors");

    for size in [365, 730, 1825].iter() {
        let values = generate_weather(*size, 0.0);

        group.bench_with_input(BenchmarkId::new("IQR", size), size, |b, _| {
            b.iter(|| iqr_scores(black_box(&values), 1.5))
        });

        group.bench_with_input(BenchmarkId::new("ZScore", size), size, |b, _| {
            b.iter(|| rolling_z_scores(black_box(&values), 30, 3.0))
        });

        group.bench_with_input(BenchmarkId::new("ModifiedZScore", size), size, |b, _| {
            b.iter(|| modified_z_scores(black_box(&values), 3.5))
        });

        group.bench_with_input(BenchmarkId::new("SeasonalResidual", size), size, |b, _| {
            b.iter(|| seasonal_residual_scores(black_box(&values), &[7], 3.0))
        });

        group.bench_with_input(BenchmarkId::new("ChangePoint", size), size, |b, _| {
            b.iter(|| level_shift_scores(black_box(&values), &[7], 7, 2.0))
        });
    }

    group.finish();
}

fn bench_isolation_forest(c: &mut Criterion) {
    let mut group = c.benchmark_group("isolation_forest");
    group.sample_size(20);

    for size in [365, 1825].iter() {
        let a = generate_weather(*size, 0.0);
        let b = generate_weather(*size, 1.0);
        let rows: Vec<Vec<f64>> = a.iter().zip(&b).map(|(x, y)| vec![*x, *y]).collect();

        group.bench_with_input(BenchmarkId::new("trees_100", size), size, |bench, _| {
            bench.iter(|| isolation_scores(black_box(&rows), 365, 100, 256, 0.6, 42))
        });
    }

    group.finish();
}

fn bench_suite(c: &mut Criterion) {
    let mut group = c.benchmark_group("detector_suite");
    group.sample_size(10);

    for size in [365, 1825].iter() {
        let data = cleaned(*size);
        let config = DetectorSuiteConfig::default();

        group.bench_with_input(BenchmarkId::new("all_detectors", size), size, |b, _| {
            b.iter(|| {
                let mut state = DetectorState::new("bench", config.threshold.clone());
                detect(black_box(&data), &config, &mut state)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_univariate, bench_isolation_forest, bench_suite);
criterion_main!(benches);
