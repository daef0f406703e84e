use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gazolive_ml::export::{OnnxExporter, OnnxRuntime};
use gazolive_ml::training::{LightGBMConfig, ModelSpec, TaskKind, TreeMethod, XGBoostConfig};
use ndarray::{Array1, Array2};
use rand::prelude::*;

fn create_regression_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen::<f64>() * 10.0);

    // Target as sum of features + noise
    let y = x.rows().into_iter().map(|r| r.sum() + rng.gen::<f64>() * 0.1).collect();
    (x, y)
}

fn specs() -> Vec<(&'static str, ModelSpec)> {
    vec![
        (
            "xgboost_hist",
            ModelSpec::XGBoost(XGBoostConfig { n_estimators: 50, ..Default::default() }),
        ),
        (
            "xgboost_exact",
            ModelSpec::XGBoost(XGBoostConfig {
                n_estimators: 50,
                tree_method: TreeMethod::Exact,
                ..Default::default()
            }),
        ),
        (
            "lightgbm",
            ModelSpec::LightGBM(LightGBMConfig { n_estimators: 50, ..Default::default() }),
        ),
    ]
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(10); // Fewer samples for training benchmarks

    for n_rows in [1000, 5000].iter() {
        let (x, y) = create_regression_data(*n_rows, 10);

        for (name, spec) in specs() {
            group.bench_with_input(BenchmarkId::new(name, n_rows), &(&x, &y), |b, (x, y)| {
                b.iter(|| spec.fit(TaskKind::Regression, black_box(x), black_box(y), None).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    // Train model once
    let (x, y) = create_regression_data(5000, 10);
    let model = ModelSpec::LightGBM(LightGBMConfig { n_estimators: 100, ..Default::default() })
        .fit(TaskKind::Regression, &x, &y, None)
        .unwrap();
    let runtime = OnnxRuntime::from_bytes(&OnnxExporter::new().to_bytes(&model, 10).unwrap()).unwrap();

    for batch_size in [1, 100, 1000].iter() {
        let (batch, _) = create_regression_data(*batch_size, 10);

        group.bench_with_input(BenchmarkId::new("native", batch_size), &batch, |b, batch| {
            b.iter(|| model.predict(black_box(batch)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("onnx", batch_size), &batch, |b, batch| {
            b.iter(|| runtime.run(black_box(batch)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction);
criterion_main!(benches);
