//! Pipeline execution: load → split → search → fit → evaluate → export → verify

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use super::config::PipelineConfig;
use crate::data::{train_test_split, DataLoader, Dataset, Partitions};
use crate::device::DeviceCapabilities;
use crate::error::{PipelineError, Result};
use crate::export::{verify_export, OnnxConfig, OnnxExporter, OnnxRuntime, VerificationReport};
use crate::optimizer::{HyperOptX, OptimizationConfig, OptimizeDirection, Study, TrialParams};
use crate::training::{EvalSet, ModelMetrics, ModelSpec, TaskKind, TrainedModel};

/// Search outcome kept in the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    pub n_trials: usize,
    pub n_failed: usize,
    pub best_trial: usize,
    /// Accuracy, or negative MSE for regression
    pub best_score: f64,
    pub best_params: TrialParams,
    pub duration_secs: f64,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub timestamp: DateTime<Utc>,
    pub task: TaskKind,
    pub target: String,
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub feature_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchSummary>,
    /// Parameters of the final model
    pub model: ModelSpec,
    pub n_trees: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_iteration: Option<usize>,
    /// Held-out metrics of the final model
    pub metrics: ModelMetrics,
    /// `(feature, importance)`, most important first
    pub feature_importances: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_map_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    pub duration_secs: f64,
}

impl PipelineReport {
    /// Headline metric: R² for regression, accuracy for classification
    pub fn headline(&self) -> (&'static str, Option<f64>) {
        match self.task {
            TaskKind::Regression => ("r2", self.metrics.r2),
            TaskKind::Classification => ("accuracy", self.metrics.accuracy),
        }
    }
}

/// A finished run: the report plus the fitted model and its data
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub report: PipelineReport,
    pub model: TrainedModel,
    pub dataset: Dataset,
    pub partitions: Partitions,
    pub study: Option<Study>,
}

/// Runs one configured pipeline
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    config: PipelineConfig,
    device: Option<DeviceCapabilities>,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, device: None }
    }

    /// Use these capabilities instead of probing the machine
    pub fn with_device(mut self, device: DeviceCapabilities) -> Self {
        self.device = Some(device);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> Result<PipelineRun> {
        let start = Instant::now();
        let config = &self.config;
        config.validate()?;

        // Load
        let dataset = DataLoader::new().load(&config.data)?;

        // Split
        let stratify = config.stratify().then_some(&dataset.y);
        let split = train_test_split(dataset.n_samples(), config.split.test_fraction, config.split.seed, stratify)?;
        let parts = split.apply(&dataset.x, &dataset.y)?;
        info!(
            train = parts.y_train.len(),
            test = parts.y_test.len(),
            stratified = stratify.is_some(),
            "Split dataset"
        );

        let device = self.device.clone().unwrap_or_else(DeviceCapabilities::detect);
        let base_spec = config.model.resolve_accelerator(&device);

        // Search
        let (final_spec, study) = if config.search.enabled() {
            let study = self.search(&base_spec, &parts)?;
            let best = study.best_params().ok_or_else(|| {
                PipelineError::OptimizationError(format!("all {} trials failed", study.trials.len()))
            })?;
            (base_spec.apply_trial(best)?, Some(study))
        } else {
            (base_spec, None)
        };

        // Final fit
        let fit_start = Instant::now();
        let eval = EvalSet {
            x: &parts.x_test,
            y: &parts.y_test,
            early_stopping_rounds: config.search.early_stopping_rounds,
        };
        let model = final_spec.fit(config.task, &parts.x_train, &parts.y_train, Some(&eval))?;
        let ensemble = model.ensemble()?;
        info!(
            family = final_spec.family(),
            trees = ensemble.n_trees(),
            elapsed_secs = fit_start.elapsed().as_secs_f64(),
            "Final model fitted"
        );

        // Evaluate
        let metrics = model.evaluate(&parts.x_test, &parts.y_test)?;
        match config.task {
            TaskKind::Regression => info!(rmse = ?metrics.rmse, r2 = ?metrics.r2, "Held-out evaluation"),
            TaskKind::Classification => info!(accuracy = ?metrics.accuracy, "Held-out evaluation"),
        }

        // Export
        let n_features = dataset.n_features();
        let mut verification = None;
        if let Some(path) = &config.export.model_path {
            let exporter = OnnxExporter::with_config(OnnxConfig {
                model_name: config.export.model_name.clone(),
                ..Default::default()
            });
            exporter.export(&model, n_features, path)?;

            if config.export.verify {
                let runtime = OnnxRuntime::load(path)?;
                verification = Some(verify_export(
                    &model,
                    &runtime,
                    &parts.x_test,
                    &parts.y_test,
                    config.export.tolerance,
                )?);
            }
        } else if config.export.verify {
            warn!("Verification requested without an output path; skipped");
        }
        if let Some(path) = &config.export.feature_map_path {
            dataset.schema.write_feature_map(path)?;
            info!(path = %path.display(), "Feature map written");
        }

        let feature_names = dataset.schema.feature_names().to_vec();
        let mut feature_importances: Vec<(String, f64)> = feature_names
            .iter()
            .cloned()
            .zip(ensemble.feature_importances())
            .collect();
        feature_importances.sort_by(|a, b| b.1.total_cmp(&a.1));

        let report = PipelineReport {
            timestamp: Utc::now(),
            task: config.task,
            target: config.data.target_column.clone(),
            n_samples: dataset.n_samples(),
            n_train: parts.y_train.len(),
            n_test: parts.y_test.len(),
            feature_names,
            search: study.as_ref().and_then(summarize),
            model: final_spec,
            n_trees: ensemble.n_trees(),
            best_iteration: model.eval_history().best_iteration,
            metrics,
            feature_importances,
            model_path: config.export.model_path.clone(),
            feature_map_path: config.export.feature_map_path.clone(),
            verification,
            duration_secs: start.elapsed().as_secs_f64(),
        };

        if let Some(path) = &config.report_path {
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
            info!(path = %path.display(), "Run report written");
        }

        info!(elapsed_secs = report.duration_secs, "Pipeline finished");
        Ok(PipelineRun { report, model, dataset, partitions: parts, study })
    }

    /// Score each trial on the held-out partition: accuracy, or negative MSE
    fn search(&self, base: &ModelSpec, parts: &Partitions) -> Result<Study> {
        let config = &self.config;
        let space = config.search_space();
        info!(trials = config.search.n_trials, params = space.len(), "Starting hyperparameter search");

        let opt_config = OptimizationConfig {
            n_trials: config.search.n_trials,
            direction: OptimizeDirection::Maximize,
            sampler: config.search.sampler,
            n_startup_trials: config.search.n_startup_trials,
            random_state: config.search.seed,
        };
        let mut optimizer = HyperOptX::new(opt_config, space)?;

        let eval = EvalSet {
            x: &parts.x_test,
            y: &parts.y_test,
            early_stopping_rounds: config.search.early_stopping_rounds,
        };
        let task = config.task;
        optimizer.optimize(|params| {
            let spec = base.apply_trial(params)?;
            let model = spec.fit(task, &parts.x_train, &parts.y_train, Some(&eval))?;
            let metrics = model.evaluate(&parts.x_test, &parts.y_test)?;
            let score = match task {
                TaskKind::Regression => metrics.mse.map(|mse| -mse),
                TaskKind::Classification => metrics.accuracy,
            };
            score.ok_or_else(|| PipelineError::OptimizationError("metric unavailable".to_string()))
        })?;

        Ok(optimizer.into_study())
    }
}

fn summarize(study: &Study) -> Option<SearchSummary> {
    let best = study.best_trial()?;
    Some(SearchSummary {
        n_trials: study.trials.len(),
        n_failed: study.n_failed(),
        best_trial: best.trial_id,
        best_score: best.value,
        best_params: best.params.clone(),
        duration_secs: study.total_duration_secs,
    })
}

/// Run the whole pipeline described by `config`
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport> {
    PipelineRunner::new(config.clone()).run().map(|run| run.report)
}
