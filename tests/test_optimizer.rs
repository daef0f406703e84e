//! Integration test: HyperOptX search over booster parameters

use gazolive_ml::error::PipelineError;
use gazolive_ml::optimizer::{HyperOptX, OptimizationConfig, OptimizeDirection, SamplerType, SearchSpace};
use gazolive_ml::training::{ModelSpec, TaskKind, XGBoostConfig};
use ndarray::{Array1, Array2};

fn config(n_trials: usize, sampler: SamplerType) -> OptimizationConfig {
    OptimizationConfig::new()
        .with_n_trials(n_trials)
        .with_sampler(sampler)
        .with_random_state(42)
}

#[test]
fn test_runs_exactly_n_trials() {
    for sampler in [SamplerType::Random, SamplerType::Tpe] {
        let space = SearchSpace::new().float("x", -5.0, 5.0);
        let mut opt = HyperOptX::new(config(25, sampler), space).unwrap();
        let study = opt.optimize(|p| Ok(-p["x"].as_float().unwrap().powi(2))).unwrap();
        assert_eq!(study.trials.len(), 25);
        assert_eq!(study.n_failed(), 0);
    }
}

#[test]
fn test_tpe_finds_quadratic_peak() {
    let space = SearchSpace::new().float("x", -10.0, 10.0).float("y", -10.0, 10.0);
    let mut opt = HyperOptX::new(config(60, SamplerType::Tpe), space).unwrap();
    let study = opt
        .optimize(|p| {
            let x = p["x"].as_float().unwrap();
            let y = p["y"].as_float().unwrap();
            Ok(-((x - 2.0).powi(2) + (y + 1.0).powi(2)))
        })
        .unwrap();
    assert!(study.best_value().unwrap() > -10.0);
}

#[test]
fn test_same_seed_same_study() {
    let run = || {
        let space = SearchSpace::new().int("depth", 2, 8).log_float("lr", 1e-3, 0.3);
        let mut opt = HyperOptX::new(config(15, SamplerType::Tpe), space).unwrap();
        opt.optimize(|p| Ok(p["depth"].as_int().unwrap() as f64 * p["lr"].as_float().unwrap()))
            .unwrap();
        opt.into_study()
    };
    let a = run();
    let b = run();
    let params = |s: &gazolive_ml::optimizer::Study| s.trials.iter().map(|t| t.params.clone()).collect::<Vec<_>>();
    assert_eq!(params(&a), params(&b));
    assert_eq!(a.best_trial_idx, b.best_trial_idx);
}

#[test]
fn test_failed_trials_are_recorded_not_fatal() {
    let space = SearchSpace::new().int("k", 0, 9);
    let mut opt = HyperOptX::new(config(20, SamplerType::Random), space).unwrap();
    let study = opt
        .optimize(|p| {
            let k = p["k"].as_int().unwrap();
            if k % 2 == 0 {
                Err(PipelineError::TrainingError("even k".to_string()))
            } else if k == 9 {
                Ok(f64::NAN)
            } else {
                Ok(k as f64)
            }
        })
        .unwrap();

    assert_eq!(study.trials.len(), 20);
    for trial in &study.trials {
        if trial.failed {
            assert_eq!(trial.value, f64::NEG_INFINITY);
            assert!(trial.error.is_some());
        }
    }
    let best = study.best_trial().unwrap();
    assert!(!best.failed);
    assert!(best.value.is_finite());
}

#[test]
fn test_minimize_direction() {
    let space = SearchSpace::new().float("x", 0.0, 1.0);
    let cfg = config(30, SamplerType::Random).with_direction(OptimizeDirection::Minimize);
    let mut opt = HyperOptX::new(cfg, space).unwrap();
    let study = opt.optimize(|p| Ok(p["x"].as_float().unwrap())).unwrap();
    let min = study.trials.iter().map(|t| t.value).fold(f64::INFINITY, f64::min);
    assert_eq!(study.best_value(), Some(min));
}

#[test]
fn test_search_over_xgboost_space() {
    let x = Array2::from_shape_fn((200, 3), |(i, j)| ((i * 7 + j * 13) % 23) as f64);
    let y: Array1<f64> = x.column(0).mapv(|v| if v > 11.0 { 1.0 } else { 0.0 });
    let (x_train, x_test) = (x.slice(ndarray::s![..160, ..]).to_owned(), x.slice(ndarray::s![160.., ..]).to_owned());
    let (y_train, y_test) = (y.slice(ndarray::s![..160]).to_owned(), y.slice(ndarray::s![160..]).to_owned());

    let base = ModelSpec::XGBoost(XGBoostConfig { n_estimators: 40, ..Default::default() });
    let space = base.default_search_space(TaskKind::Classification);
    let mut opt = HyperOptX::new(config(6, SamplerType::Tpe), space).unwrap();
    let study = opt
        .optimize(|p| {
            let model = base.apply_trial(p)?.fit(TaskKind::Classification, &x_train, &y_train, None)?;
            Ok(model.evaluate(&x_test, &y_test)?.accuracy.unwrap_or(0.0))
        })
        .unwrap();

    assert_eq!(study.trials.len(), 6);
    assert_eq!(study.n_failed(), 0);
    assert!(study.best_value().unwrap() > 0.8);
}
