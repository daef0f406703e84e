//! Model family selection, trial overlays and the fitted model enum

use crate::device::DeviceCapabilities;
use crate::error::{PipelineError, Result};
use crate::optimizer::{ParameterValue, SearchSpace, TrialParams};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::booster::{EvalHistory, EvalSet, TreeEnsemble};
use super::lightgbm::{BoostingType, LightGBMClassifier, LightGBMConfig, LightGBMRegressor};
use super::metrics::ModelMetrics;
use super::xgboost::{TreeMethod, XGBoostClassifier, XGBoostConfig, XGBoostRegressor};

/// Learning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Regression,
    /// Binary classification with labels 0/1
    Classification,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Regression => "regression",
            TaskKind::Classification => "classification",
        }
    }
}

/// Booster family plus its hyperparameters.
///
/// Serialized as `{"family": "xgboost", "params": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", content = "params", rename_all = "lowercase")]
pub enum ModelSpec {
    XGBoost(XGBoostConfig),
    LightGBM(LightGBMConfig),
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::LightGBM(LightGBMConfig::default())
    }
}

impl ModelSpec {
    pub fn family(&self) -> &'static str {
        match self {
            ModelSpec::XGBoost(_) => "xgboost",
            ModelSpec::LightGBM(_) => "lightgbm",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ModelSpec::XGBoost(c) => c.validate(),
            ModelSpec::LightGBM(c) => c.validate(),
        }
    }

    /// Overlay trial parameters by name onto a copy of this spec.
    ///
    /// Unknown names and values of the wrong kind are rejected, as is any
    /// combination that fails validation.
    pub fn apply_trial(&self, params: &TrialParams) -> Result<ModelSpec> {
        let mut spec = self.clone();
        for (name, value) in params {
            match &mut spec {
                ModelSpec::XGBoost(c) => apply_xgboost(c, name, value)?,
                ModelSpec::LightGBM(c) => apply_lightgbm(c, name, value)?,
            }
        }
        spec.validate()?;
        Ok(spec)
    }

    /// Search space used when a run does not supply its own
    pub fn default_search_space(&self, task: TaskKind) -> SearchSpace {
        match (self, task) {
            (ModelSpec::XGBoost(_), TaskKind::Classification) => SearchSpace::new()
                .log_float("learning_rate", 1e-3, 0.1)
                .int("max_depth", 3, 10)
                .float("subsample", 0.5, 1.0)
                .float("colsample_bytree", 0.5, 1.0)
                .float("gamma", 0.0, 1.0)
                .log_float("reg_lambda", 1e-8, 1.0)
                .log_float("reg_alpha", 1e-8, 1.0),
            (ModelSpec::XGBoost(_), TaskKind::Regression) => SearchSpace::new()
                .int("max_depth", 3, 10)
                .float("learning_rate", 0.01, 0.3)
                .int("n_estimators", 50, 300)
                .float("subsample", 0.6, 1.0)
                .float("colsample_bytree", 0.6, 1.0)
                .int("min_child_weight", 1, 10),
            (ModelSpec::LightGBM(_), _) => SearchSpace::new()
                .int("num_leaves", 8, 64)
                .log_float("learning_rate", 0.01, 0.2)
                .int("n_estimators", 100, 1000)
                .int("min_child_samples", 5, 50)
                .float("subsample", 0.6, 1.0)
                .float("colsample_bytree", 0.6, 1.0)
                .log_float("reg_lambda", 1e-8, 1.0),
        }
    }

    /// Resolve `tree_method = gpu_hist` against the detected hardware.
    ///
    /// Without a CUDA device the model falls back to `hist`. With one the
    /// histogram builder still runs on the CPU.
    pub fn resolve_accelerator(&self, device: &DeviceCapabilities) -> ModelSpec {
        match self {
            ModelSpec::XGBoost(c) if c.tree_method == TreeMethod::GpuHist => {
                if device.has_gpu() {
                    info!("CUDA device detected; gpu_hist runs the CPU histogram builder");
                    self.clone()
                } else {
                    warn!("tree_method gpu_hist requested but no CUDA device found, falling back to hist");
                    ModelSpec::XGBoost(XGBoostConfig {
                        tree_method: TreeMethod::Hist,
                        ..c.clone()
                    })
                }
            }
            _ => self.clone(),
        }
    }

    /// Fit a fresh model on `(x, y)`, optionally monitoring `eval`
    pub fn fit(
        &self,
        task: TaskKind,
        x: &Array2<f64>,
        y: &Array1<f64>,
        eval: Option<&EvalSet<'_>>,
    ) -> Result<TrainedModel> {
        let model = match (self, task) {
            (ModelSpec::XGBoost(c), TaskKind::Regression) => {
                let mut m = XGBoostRegressor::new(c.clone());
                m.fit_with_eval(x, y, eval)?;
                TrainedModel::XGBoostRegressor(m)
            }
            (ModelSpec::XGBoost(c), TaskKind::Classification) => {
                let mut m = XGBoostClassifier::new(c.clone());
                m.fit_with_eval(x, y, eval)?;
                TrainedModel::XGBoostClassifier(m)
            }
            (ModelSpec::LightGBM(c), TaskKind::Regression) => {
                let mut m = LightGBMRegressor::new(c.clone());
                m.fit_with_eval(x, y, eval)?;
                TrainedModel::LightGBMRegressor(m)
            }
            (ModelSpec::LightGBM(c), TaskKind::Classification) => {
                let mut m = LightGBMClassifier::new(c.clone());
                m.fit_with_eval(x, y, eval)?;
                TrainedModel::LightGBMClassifier(m)
            }
        };
        Ok(model)
    }
}

fn number(name: &str, value: &ParameterValue) -> Result<f64> {
    value
        .as_float()
        .ok_or_else(|| PipelineError::invalid_param(name, value, "expected a number"))
}

fn count(name: &str, value: &ParameterValue) -> Result<usize> {
    match value.as_int() {
        Some(v) if v >= 0 => Ok(v as usize),
        Some(_) => Err(PipelineError::invalid_param(name, value, "must be non-negative")),
        None => Err(PipelineError::invalid_param(name, value, "expected an integer")),
    }
}

fn text<'a>(name: &str, value: &'a ParameterValue) -> Result<&'a str> {
    value
        .as_string()
        .ok_or_else(|| PipelineError::invalid_param(name, value, "expected a string"))
}

fn apply_xgboost(c: &mut XGBoostConfig, name: &str, value: &ParameterValue) -> Result<()> {
    match name {
        "n_estimators" => c.n_estimators = count(name, value)?,
        "learning_rate" | "eta" => c.learning_rate = number(name, value)?,
        "max_depth" => c.max_depth = count(name, value)?,
        "min_child_weight" => c.min_child_weight = number(name, value)?,
        "reg_lambda" | "lambda" => c.reg_lambda = number(name, value)?,
        "reg_alpha" | "alpha" => c.reg_alpha = number(name, value)?,
        "gamma" => c.gamma = number(name, value)?,
        "subsample" => c.subsample = number(name, value)?,
        "colsample_bytree" => c.colsample_bytree = number(name, value)?,
        "max_bin" => c.max_bin = count(name, value)?,
        "random_state" | "seed" => c.random_state = Some(count(name, value)? as u64),
        "tree_method" => {
            c.tree_method = match text(name, value)? {
                "exact" => TreeMethod::Exact,
                "hist" => TreeMethod::Hist,
                "gpu_hist" => TreeMethod::GpuHist,
                _ => return Err(PipelineError::invalid_param(name, value, "expected exact, hist or gpu_hist")),
            }
        }
        _ => return Err(PipelineError::invalid_param(name, value, "unknown xgboost parameter")),
    }
    Ok(())
}

fn apply_lightgbm(c: &mut LightGBMConfig, name: &str, value: &ParameterValue) -> Result<()> {
    match name {
        "n_estimators" | "num_iterations" => c.n_estimators = count(name, value)?,
        "learning_rate" => c.learning_rate = number(name, value)?,
        "num_leaves" | "max_leaves" => c.num_leaves = count(name, value)?,
        "max_depth" => {
            // LightGBM spells "no limit" as -1
            c.max_depth = match value.as_int() {
                Some(d) if d <= 0 => None,
                _ => Some(count(name, value)?),
            }
        }
        "min_child_samples" | "min_data_in_leaf" => c.min_child_samples = count(name, value)?,
        "min_child_weight" => c.min_child_weight = number(name, value)?,
        "min_split_gain" => c.min_split_gain = number(name, value)?,
        "reg_lambda" => c.reg_lambda = number(name, value)?,
        "reg_alpha" => c.reg_alpha = number(name, value)?,
        "subsample" | "bagging_fraction" => c.subsample = number(name, value)?,
        "colsample_bytree" | "feature_fraction" => c.colsample_bytree = number(name, value)?,
        "top_rate" => c.top_rate = number(name, value)?,
        "other_rate" => c.other_rate = number(name, value)?,
        "max_bin" => c.max_bin = count(name, value)?,
        "random_state" | "seed" => c.random_state = Some(count(name, value)? as u64),
        "boosting" | "boosting_type" => {
            c.boosting = match text(name, value)? {
                "gbdt" => BoostingType::Gbdt,
                "goss" => BoostingType::Goss,
                _ => return Err(PipelineError::invalid_param(name, value, "expected gbdt or goss")),
            }
        }
        _ => return Err(PipelineError::invalid_param(name, value, "unknown lightgbm parameter")),
    }
    Ok(())
}

/// Enum to hold trained model variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    XGBoostRegressor(XGBoostRegressor),
    XGBoostClassifier(XGBoostClassifier),
    LightGBMRegressor(LightGBMRegressor),
    LightGBMClassifier(LightGBMClassifier),
}

impl TrainedModel {
    pub fn task(&self) -> TaskKind {
        match self {
            TrainedModel::XGBoostRegressor(_) | TrainedModel::LightGBMRegressor(_) => TaskKind::Regression,
            TrainedModel::XGBoostClassifier(_) | TrainedModel::LightGBMClassifier(_) => TaskKind::Classification,
        }
    }

    /// Regression values, or 0/1 labels for classifiers
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedModel::XGBoostRegressor(m) => m.predict(x),
            TrainedModel::XGBoostClassifier(m) => m.predict(x),
            TrainedModel::LightGBMRegressor(m) => m.predict(x),
            TrainedModel::LightGBMClassifier(m) => m.predict(x),
        }
    }

    /// Class probabilities `[P(0), P(1)]` per row; classifiers only
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            TrainedModel::XGBoostClassifier(m) => m.predict_proba(x),
            TrainedModel::LightGBMClassifier(m) => m.predict_proba(x),
            _ => Err(PipelineError::TrainingError(
                "predict_proba is only defined for classifiers".to_string(),
            )),
        }
    }

    /// Fitted trees, base score and objective
    pub fn ensemble(&self) -> Result<&TreeEnsemble> {
        let ensemble = match self {
            TrainedModel::XGBoostRegressor(m) => m.ensemble(),
            TrainedModel::XGBoostClassifier(m) => m.ensemble(),
            TrainedModel::LightGBMRegressor(m) => m.ensemble(),
            TrainedModel::LightGBMClassifier(m) => m.ensemble(),
        };
        ensemble.ok_or(PipelineError::ModelNotFitted)
    }

    pub fn eval_history(&self) -> &EvalHistory {
        match self {
            TrainedModel::XGBoostRegressor(m) => m.eval_history(),
            TrainedModel::XGBoostClassifier(m) => m.eval_history(),
            TrainedModel::LightGBMRegressor(m) => m.eval_history(),
            TrainedModel::LightGBMClassifier(m) => m.eval_history(),
        }
    }

    /// Split-count importances, normalized to sum to one
    pub fn feature_importances(&self) -> Result<Array1<f64>> {
        Ok(self.ensemble()?.feature_importances())
    }

    /// Score the model on held-out data
    pub fn evaluate(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<ModelMetrics> {
        let predictions = self.predict(x)?;
        let metrics = match self.task() {
            TaskKind::Regression => ModelMetrics::compute_regression(y, &predictions),
            TaskKind::Classification => {
                let p1 = self.predict_proba(x)?.column(1).to_owned();
                ModelMetrics::compute_classification(y, &predictions, Some(&p1))
            }
        };
        Ok(metrics)
    }
}
