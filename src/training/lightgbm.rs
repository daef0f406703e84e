//! LightGBM-style gradient boosting with leaf-wise tree growth
//!
//! Key differences from standard/XGBoost-style gradient boosting:
//! - Leaf-wise (best-first) tree growth instead of level-wise
//! - Histogram split finding over quantized features
//! - Optional Gradient-based One-Side Sampling (GOSS): keeps top gradients,
//!   samples low gradients and re-weights them by `(1 - top_rate) / other_rate`

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::booster::{boost, EvalHistory, EvalSet, TreeEnsemble};
use super::objective::Objective;
use super::splitter::{leaf_weight, partition, SplitCandidate, SplitFinder, SplitParams};
use super::tree::TreeNode;
use super::xgboost::{check_fraction, check_non_negative, check_positive, fitted, two_class_proba};

/// Row sampling strategy per boosting round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostingType {
    /// Plain gradient boosting with optional bagging (`subsample`)
    #[default]
    Gbdt,
    /// Gradient-based one-side sampling
    Goss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightGBMConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    #[serde(alias = "max_leaves")]
    pub num_leaves: usize,
    /// `None`, `null` or any value `<= 0` (LightGBM's `-1`) means no limit
    #[serde(deserialize_with = "depth_limit")]
    pub max_depth: Option<usize>,
    pub min_child_samples: usize,
    /// Minimum hessian sum per leaf
    pub min_child_weight: f64,
    /// Minimum gain to perform a split
    pub min_split_gain: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub boosting: BoostingType,
    pub top_rate: f64,
    pub other_rate: f64,
    pub max_bin: usize,
    pub random_state: Option<u64>,
}

impl Default for LightGBMConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: None,
            min_child_samples: 20,
            min_child_weight: 1e-3,
            min_split_gain: 0.0,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            boosting: BoostingType::Gbdt,
            top_rate: 0.2,
            other_rate: 0.1,
            max_bin: 255,
            random_state: Some(42),
        }
    }
}

fn depth_limit<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<usize>, D::Error> {
    let depth = Option::<i64>::deserialize(deserializer)?;
    Ok(depth.and_then(|d| usize::try_from(d).ok()).filter(|&d| d > 0))
}

impl LightGBMConfig {
    /// Check every parameter domain
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(PipelineError::invalid_param("n_estimators", self.n_estimators, "must be at least 1"));
        }
        check_positive("learning_rate", self.learning_rate)?;
        if self.num_leaves < 2 {
            return Err(PipelineError::invalid_param("num_leaves", self.num_leaves, "must be at least 2"));
        }
        if self.max_depth == Some(0) {
            return Err(PipelineError::invalid_param("max_depth", 0, "must be at least 1 or unset"));
        }
        check_non_negative("min_child_weight", self.min_child_weight)?;
        check_non_negative("min_split_gain", self.min_split_gain)?;
        check_non_negative("reg_lambda", self.reg_lambda)?;
        check_non_negative("reg_alpha", self.reg_alpha)?;
        check_fraction("subsample", self.subsample)?;
        check_fraction("colsample_bytree", self.colsample_bytree)?;
        if self.boosting == BoostingType::Goss {
            check_fraction("top_rate", self.top_rate)?;
            check_fraction("other_rate", self.other_rate)?;
            if self.top_rate + self.other_rate > 1.0 {
                return Err(PipelineError::invalid_param(
                    "other_rate",
                    self.other_rate,
                    "top_rate + other_rate must not exceed 1",
                ));
            }
        }
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
            min_child_samples: self.min_child_samples,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingSplit {
    candidate: SplitCandidate,
    node_id: usize,
}

impl PartialEq for PendingSplit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingSplit {}

impl PartialOrd for PendingSplit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingSplit {
    /// Max-heap on gain; equal gains pop the earlier node first
    fn cmp(&self, other: &Self) -> Ordering {
        self.candidate
            .gain
            .total_cmp(&other.candidate.gain)
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

enum NodeSlot {
    Leaf(Vec<usize>),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

struct LeafWiseBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    finder: &'a SplitFinder,
    config: &'a LightGBMConfig,
    params: SplitParams,
}

impl LeafWiseBuilder<'_> {
    fn best_split(&self, indices: &[usize], node_id: usize) -> Option<PendingSplit> {
        if indices.len() < self.config.min_child_samples.max(1) * 2 {
            return None;
        }
        self.finder
            .find_best(self.x, self.grad, self.hess, indices, self.features, &self.params)
            .filter(|c| c.gain > self.config.min_split_gain)
            .map(|candidate| PendingSplit { candidate, node_id })
    }

    /// Grow leaf-wise (best-first) until `num_leaves` is reached or no leaf has a split
    fn build(&self, indices: Vec<usize>) -> TreeNode {
        let max_depth = self.config.max_depth.unwrap_or(usize::MAX);
        let mut heap: BinaryHeap<PendingSplit> = BinaryHeap::new();
        if max_depth > 0 {
            heap.extend(self.best_split(&indices, 0));
        }

        let mut nodes: Vec<NodeSlot> = vec![NodeSlot::Leaf(indices)];
        let mut depths: Vec<usize> = vec![0];
        let mut n_leaves = 1usize;

        while n_leaves < self.config.num_leaves {
            let Some(split) = heap.pop() else { break };
            let node_id = split.node_id;
            let SplitCandidate { feature, threshold, .. } = split.candidate;

            let NodeSlot::Leaf(rows) = &nodes[node_id] else { continue };
            let (left_rows, right_rows) = partition(self.x, rows, feature, threshold);
            if left_rows.is_empty() || right_rows.is_empty() {
                continue;
            }

            let depth = depths[node_id] + 1;
            let left_id = nodes.len();
            let right_id = left_id + 1;

            if depth < max_depth {
                heap.extend(self.best_split(&left_rows, left_id));
                heap.extend(self.best_split(&right_rows, right_id));
            }

            nodes.push(NodeSlot::Leaf(left_rows));
            nodes.push(NodeSlot::Leaf(right_rows));
            depths.push(depth);
            depths.push(depth);
            nodes[node_id] = NodeSlot::Split {
                feature,
                threshold,
                left: left_id,
                right: right_id,
            };
            n_leaves += 1;
        }

        self.to_node(&nodes, 0)
    }

    fn to_node(&self, nodes: &[NodeSlot], idx: usize) -> TreeNode {
        match &nodes[idx] {
            NodeSlot::Leaf(rows) => {
                let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
                let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
                TreeNode::leaf(leaf_weight(g, h, self.config.reg_lambda, self.config.reg_alpha))
            }
            NodeSlot::Split {
                feature,
                threshold,
                left,
                right,
            } => TreeNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(self.to_node(nodes, *left)),
                right: Box::new(self.to_node(nodes, *right)),
            },
        }
    }
}

/// Rows used for one round, with per-row gradient multipliers
struct RoundSample {
    indices: Vec<usize>,
    weights: Option<Vec<f64>>,
}

fn goss_sample(
    gradients: &[f64],
    top_rate: f64,
    other_rate: f64,
    rng: &mut Xoshiro256PlusPlus,
) -> RoundSample {
    let n = gradients.len();
    let n_top = ((n as f64 * top_rate).ceil() as usize).min(n);
    let n_other = ((n as f64 * other_rate).ceil() as usize).min(n - n_top);

    let mut sorted: Vec<usize> = (0..n).collect();
    sorted.sort_by(|&a, &b| gradients[b].abs().total_cmp(&gradients[a].abs()).then(a.cmp(&b)));

    let mut remaining: Vec<usize> = sorted[n_top..].to_vec();
    remaining.shuffle(rng);
    remaining.truncate(n_other);

    let amplify = if other_rate > 0.0 { (1.0 - top_rate) / other_rate } else { 1.0 };
    let mut weights = vec![0.0; n];
    for &i in &sorted[..n_top] {
        weights[i] = 1.0;
    }
    for &i in &remaining {
        weights[i] = amplify;
    }

    let mut indices: Vec<usize> = sorted[..n_top].iter().chain(&remaining).copied().collect();
    indices.sort_unstable();
    RoundSample {
        indices,
        weights: Some(weights),
    }
}

fn round_sample(config: &LightGBMConfig, gradients: &[f64], rng: &mut Xoshiro256PlusPlus) -> RoundSample {
    let n = gradients.len();
    if config.boosting == BoostingType::Goss && config.top_rate + config.other_rate < 1.0 {
        goss_sample(gradients, config.top_rate, config.other_rate, rng)
    } else if config.subsample < 1.0 {
        let k = ((n as f64 * config.subsample).ceil() as usize).max(1);
        let mut idx: Vec<usize> = (0..n).collect();
        idx.shuffle(rng);
        idx.truncate(k);
        idx.sort_unstable();
        RoundSample {
            indices: idx,
            weights: None,
        }
    } else {
        RoundSample {
            indices: (0..n).collect(),
            weights: None,
        }
    }
}

fn fit_ensemble(
    config: &LightGBMConfig,
    objective: Objective,
    x: &Array2<f64>,
    y: &Array1<f64>,
    eval: Option<&EvalSet<'_>>,
) -> Result<(TreeEnsemble, EvalHistory)> {
    config.validate()?;
    let n_features = x.ncols();
    let finder = SplitFinder::histogram(x, config.max_bin);
    let params = config.split_params();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.random_state.unwrap_or(42));

    boost(
        objective,
        x,
        y,
        config.n_estimators,
        config.learning_rate,
        eval,
        |_, grad, hess| {
            let sample = round_sample(config, grad, &mut rng);

            let n_selected = ((n_features as f64 * config.colsample_bytree).ceil() as usize).clamp(1, n_features);
            let mut features: Vec<usize> = (0..n_features).collect();
            if n_selected < n_features {
                features.shuffle(&mut rng);
                features.truncate(n_selected);
                features.sort_unstable();
            }

            let (grad, hess): (Vec<f64>, Vec<f64>) = match &sample.weights {
                Some(w) => (
                    grad.iter().zip(w).map(|(g, w)| g * w).collect(),
                    hess.iter().zip(w).map(|(h, w)| h * w).collect(),
                ),
                None => (grad.to_vec(), hess.to_vec()),
            };

            let builder = LeafWiseBuilder {
                x,
                grad: &grad,
                hess: &hess,
                features: &features,
                finder: &finder,
                config,
                params,
            };
            Ok(builder.build(sample.indices))
        },
    )
}

// ============ LightGBM Regressor ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMRegressor {
    pub config: LightGBMConfig,
    ensemble: Option<TreeEnsemble>,
    history: EvalHistory,
}

impl LightGBMRegressor {
    pub fn new(config: LightGBMConfig) -> Self {
        Self { config, ensemble: None, history: EvalHistory::default() }
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
}

// ============ LightGBM Classifier ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMClassifier {
    pub config: LightGBMConfig,
    ensemble: Option<TreeEnsemble>,
    history: EvalHistory,
}

impl LightGBMClassifier {
    pub fn new(config: LightGBMConfig) -> Self {
        Self { config, ensemble: None, history: EvalHistory::default() }
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
        let p = fitted(&self.ensemble)?.predict(x)?;
        Ok(p.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let p = fitted(&self.ensemble)?.predict(x)?;
        Ok(two_class_proba(&p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec((100, 3), (0..300).map(|i| (i as f64) / 100.0).collect()).unwrap();
        let y = Array1::from_vec((0..100).map(|i| {
            let x0 = (i * 3) as f64 / 100.0;
            2.0 * x0 + 0.1
        }).collect());
        (x, y)
    }

    fn make_classification_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec((100, 2), (0..200).map(|i| (i as f64) / 100.0).collect()).unwrap();
        let y = Array1::from_vec((0..100).map(|i| if i < 50 { 0.0 } else { 1.0 }).collect());
        (x, y)
    }

    #[test]
    fn test_lightgbm_regressor() {
        let (x, y) = make_regression_data();
        let config = LightGBMConfig { n_estimators: 50, num_leaves: 8, min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMRegressor::new(config);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), 100);

        let mse = (&preds - &y).mapv(|v| v * v).mean().unwrap();
        let var = y.var(0.0);
        assert!(mse < 0.1 * var, "mse {} vs variance {}", mse, var);
    }

    #[test]
    fn test_lightgbm_leaf_budget() {
        let (x, y) = make_regression_data();
        let config = LightGBMConfig { n_estimators: 5, num_leaves: 4, min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMRegressor::new(config);
        model.fit(&x, &y).unwrap();
        for tree in &model.ensemble().unwrap().trees {
            assert!(tree.n_leaves() <= 4);
        }
    }

    #[test]
    fn test_lightgbm_max_depth() {
        let (x, y) = make_regression_data();
        let config = LightGBMConfig {
            n_estimators: 5, num_leaves: 31, max_depth: Some(2), min_child_samples: 2, ..Default::default()
        };
        let mut model = LightGBMRegressor::new(config);
        model.fit(&x, &y).unwrap();
        for tree in &model.ensemble().unwrap().trees {
            assert!(tree.depth() <= 2);
        }
    }

    #[test]
    fn test_lightgbm_max_depth_from_json() {
        let parse = |json: &str| serde_json::from_str::<LightGBMConfig>(json).unwrap().max_depth;
        assert_eq!(parse(r#"{"max_depth": -1}"#), None);
        assert_eq!(parse(r#"{"max_depth": null}"#), None);
        assert_eq!(parse(r#"{"max_depth": 6}"#), Some(6));
        assert_eq!(parse(r#"{"num_leaves": 15}"#), None);
    }

    #[test]
    fn test_lightgbm_classifier() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig { n_estimators: 30, num_leaves: 8, min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        let acc = preds.iter().zip(y.iter()).filter(|(&p, &t)| p == t).count() as f64 / 100.0;
        assert!(acc > 0.7, "Accuracy too low: {}", acc);
    }

    #[test]
    fn test_lightgbm_predict_proba() {
        let (x, y) = make_classification_data();
        let config = LightGBMConfig { n_estimators: 10, num_leaves: 8, min_child_samples: 2, ..Default::default() };
        let mut model = LightGBMClassifier::new(config);
        model.fit(&x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for i in 0..proba.nrows() {
            assert!((proba[[i, 0]] + proba[[i, 1]] - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_lightgbm_goss() {
        let (x, y) = make_regression_data();
        let config = LightGBMConfig {
            n_estimators: 10, num_leaves: 8, min_child_samples: 2,
            boosting: BoostingType::Goss, top_rate: 0.3, other_rate: 0.2, ..Default::default()
        };
        let mut model = LightGBMRegressor::new(config);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap().len(), 100);
    }

    #[test]
    fn test_goss_amplifies_small_gradients() {
        let grads: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let sample = goss_sample(&grads, 0.2, 0.4, &mut rng);
        let weights = sample.weights.unwrap();

        assert_eq!(sample.indices.len(), 6);
        assert_eq!(weights[9], 1.0);
        assert_eq!(weights[8], 1.0);
        let amplified: Vec<usize> = (0..8).filter(|&i| weights[i] > 0.0).collect();
        assert_eq!(amplified.len(), 4);
        assert!(amplified.iter().all(|&i| (weights[i] - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_max_leaves_alias() {
        let config: LightGBMConfig = serde_json::from_str(r#"{"max_leaves": 7}"#).unwrap();
        assert_eq!(config.num_leaves, 7);
        assert_eq!(config.min_child_samples, 20);
    }
}
