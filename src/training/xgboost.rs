//! XGBoost-style gradient boosting with second-order approximation
//!
//! Key differences from standard gradient boosting:
//! - Uses both gradient (first derivative) and hessian (second derivative) of loss
//! - Regularized leaf weights: w* = -G / (H + lambda)
//! - Gain-based split scoring: Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)] - γ
//! - Built-in L1 (alpha) and L2 (lambda) regularization
//! - Minimum child weight constraint
//! - Depth-wise growth with exact or histogram split finding

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::booster::{boost, EvalHistory, EvalSet, TreeEnsemble};
use super::objective::Objective;
use super::splitter::{leaf_weight, partition, SplitFinder, SplitParams};
use super::tree::TreeNode;

/// Split finding algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeMethod {
    /// Exact greedy enumeration of every distinct value
    Exact,
    /// Quantized feature histograms
    #[default]
    Hist,
    /// Histogram method on an accelerator, resolved against the detected device
    GpuHist,
}

/// XGBoost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split (gamma)
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub tree_method: TreeMethod,
    /// Maximum histogram bins per feature
    pub max_bin: usize,
    pub random_state: Option<u64>,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            tree_method: TreeMethod::Hist,
            max_bin: 256,
            random_state: Some(42),
        }
    }
}

impl XGBoostConfig {
    /// Check every parameter domain
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(PipelineError::invalid_param("n_estimators", self.n_estimators, "must be at least 1"));
        }
        check_positive("learning_rate", self.learning_rate)?;
        if self.max_depth == 0 {
            return Err(PipelineError::invalid_param("max_depth", self.max_depth, "must be at least 1"));
        }
        check_non_negative("min_child_weight", self.min_child_weight)?;
        check_non_negative("reg_lambda", self.reg_lambda)?;
        check_non_negative("reg_alpha", self.reg_alpha)?;
        check_non_negative("gamma", self.gamma)?;
        check_fraction("subsample", self.subsample)?;
        check_fraction("colsample_bytree", self.colsample_bytree)?;
        if self.max_bin < 2 {
            return Err(PipelineError::invalid_param("max_bin", self.max_bin, "must be at least 2"));
        }
        Ok(())
    }

    fn split_params(&self) -> SplitParams {
        SplitParams {
            reg_lambda: self.reg_lambda,
            reg_alpha: self.reg_alpha,
            min_child_weight: self.min_child_weight,
            min_child_samples: 1,
        }
    }

    fn split_finder(&self, x: &Array2<f64>) -> SplitFinder {
        match self.tree_method {
            TreeMethod::Exact => SplitFinder::Exact,
            TreeMethod::Hist | TreeMethod::GpuHist => SplitFinder::histogram(x, self.max_bin),
        }
    }
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    finder: &'a SplitFinder,
    config: &'a XGBoostConfig,
    params: SplitParams,
}

impl TreeBuilder<'_> {
    /// Depth-wise recursive growth
    fn build(&self, indices: &[usize], depth: usize) -> TreeNode {
        let g_sum: f64 = indices.iter().map(|&i| self.grad[i]).sum();
        let h_sum: f64 = indices.iter().map(|&i| self.hess[i]).sum();
        let leaf = TreeNode::leaf(leaf_weight(g_sum, h_sum, self.config.reg_lambda, self.config.reg_alpha));

        // Stopping conditions
        if depth >= self.config.max_depth || indices.len() < 2 || h_sum < self.config.min_child_weight {
            return leaf;
        }

        let best = self
            .finder
            .find_best(self.x, self.grad, self.hess, indices, self.features, &self.params);

        match best {
            Some(split) if split.gain > self.config.gamma => {
                let (left_idx, right_idx) = partition(self.x, indices, split.feature, split.threshold);
                if left_idx.is_empty() || right_idx.is_empty() {
                    return leaf;
                }

                TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: Box::new(self.build(&left_idx, depth + 1)),
                    right: Box::new(self.build(&right_idx, depth + 1)),
                }
            }
            _ => leaf,
        }
    }
}

fn fit_ensemble(
    config: &XGBoostConfig,
    objective: Objective,
    x: &Array2<f64>,
    y: &Array1<f64>,
    eval: Option<&EvalSet<'_>>,
) -> Result<(TreeEnsemble, EvalHistory)> {
    config.validate()?;
    let n_samples = x.nrows();
    let n_features = x.ncols();
    let finder = config.split_finder(x);
    let params = config.split_params();

    let mut rng = match config.random_state {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_entropy(),
    };

    boost(
        objective,
        x,
        y,
        config.n_estimators,
        config.learning_rate,
        eval,
        |_, grad, hess| {
            let row_indices = subsample(&mut rng, n_samples, config.subsample);
            let col_indices = subsample(&mut rng, n_features, config.colsample_bytree);

            let builder = TreeBuilder {
                x,
                grad,
                hess,
                features: &col_indices,
                finder: &finder,
                config,
                params,
            };
            Ok(builder.build(&row_indices, 0))
        },
    )
}

// ─── XGBoost Regressor ─────────────────────────────────────────────────────

/// XGBoost Regressor (squared error loss)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostRegressor {
    config: XGBoostConfig,
    ensemble: Option<TreeEnsemble>,
    history: EvalHistory,
}

impl XGBoostRegressor {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            ensemble: None,
            history: EvalHistory::default(),
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_with_eval(x, y, None)
    }

    pub fn fit_with_eval(&mut self, x: &Array2<f64>, y: &Array1<f64>, eval: Option<&EvalSet<'_>>) -> Result<()> {
        let (ensemble, history) = fit_ensemble(&self.config, Objective::SquaredError, x, y, eval)?;
        self.ensemble = Some(ensemble);
        self.history = history;
        Ok(())
    }

    pub fn ensemble(&self) -> Option<&TreeEnsemble> {
        self.ensemble.as_ref()
    }

    pub fn eval_history(&self) -> &EvalHistory {
        &self.history
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        fitted(&self.ensemble)?.predict(x)
    }

    pub fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let p = self.predict(x)?;
        let ym = y.mean().unwrap_or(0.0);
        let ss_res = (&p - y).mapv(|v| v * v).sum();
        let ss_tot = y.mapv(|v| (v - ym).powi(2)).sum();
        Ok(if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot })
    }

    /// Compute feature importances by counting splits across all trees
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        self.ensemble.as_ref().map(|e| e.feature_importances())
    }
}

// ─── XGBoost Classifier ────────────────────────────────────────────────────

/// XGBoost Classifier (logistic loss with second-order approximation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostClassifier {
    config: XGBoostConfig,
    ensemble: Option<TreeEnsemble>,
    history: EvalHistory,
}

impl XGBoostClassifier {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            ensemble: None,
            history: EvalHistory::default(),
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_with_eval(x, y, None)
    }

    pub fn fit_with_eval(&mut self, x: &Array2<f64>, y: &Array1<f64>, eval: Option<&EvalSet<'_>>) -> Result<()> {
        let (ensemble, history) = fit_ensemble(&self.config, Objective::BinaryLogistic, x, y, eval)?;
        self.ensemble = Some(ensemble);
        self.history = history;
        Ok(())
    }

    pub fn ensemble(&self) -> Option<&TreeEnsemble> {
        self.ensemble.as_ref()
    }

    pub fn eval_history(&self) -> &EvalHistory {
        &self.history
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let probs = fitted(&self.ensemble)?.predict(x)?;
        Ok(probs.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    /// Class probabilities, columns `[P(0), P(1)]`
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let p1 = fitted(&self.ensemble)?.predict(x)?;
        Ok(two_class_proba(&p1))
    }

    pub fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let preds = self.predict(x)?;
        let correct = preds.iter().zip(y.iter())
            .filter(|(p, a)| (*p - *a).abs() < 0.5)
            .count();
        Ok(correct as f64 / y.len() as f64)
    }

    /// Compute feature importances by counting splits across all trees
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        self.ensemble.as_ref().map(|e| e.feature_importances())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::invalid_param(name, value, "must be positive"))
    }
}

pub(crate) fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PipelineError::invalid_param(name, value, "must be non-negative"))
    }
}

pub(crate) fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(PipelineError::invalid_param(name, value, "must be in (0, 1]"))
    }
}

pub(crate) fn fitted(ensemble: &Option<TreeEnsemble>) -> Result<&TreeEnsemble> {
    ensemble.as_ref().ok_or(PipelineError::ModelNotFitted)
}

pub(crate) fn two_class_proba(p1: &Array1<f64>) -> Array2<f64> {
    let mut proba = Array2::zeros((p1.len(), 2));
    for (i, &p) in p1.iter().enumerate() {
        proba[[i, 0]] = 1.0 - p;
        proba[[i, 1]] = p;
    }
    proba
}

fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = (((n as f64) * ratio).ceil() as usize).max(1);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k);
    indices.sort();
    indices
}
