//! Additive tree ensemble and the shared boosting loop

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::objective::Objective;
use super::tree::{split_count_importances, TreeNode};

/// Fitted additive model: `raw = base_score + sum(tree(x))`.
///
/// Leaf values already include the learning rate, so the ensemble can be
/// exported as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub objective: Objective,
    pub base_score: f64,
    pub trees: Vec<TreeNode>,
    pub n_features: usize,
}

impl TreeEnsemble {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.n_features {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }

    /// Untransformed scores
    pub fn predict_raw(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_input(x)?;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
            .collect())
    }

    /// Scores mapped through the objective's link (identity or sigmoid)
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let objective = self.objective;
        Ok(self.predict_raw(x)?.mapv(|r| objective.transform(r)))
    }

    pub fn feature_importances(&self) -> Array1<f64> {
        split_count_importances(&self.trees, self.n_features)
    }
}

/// Held-out data monitored during boosting
#[derive(Debug, Clone, Copy)]
pub struct EvalSet<'a> {
    pub x: &'a Array2<f64>,
    pub y: &'a Array1<f64>,
    /// Stop once the metric has not improved for this many rounds
    pub early_stopping_rounds: Option<usize>,
}

/// Per-round held-out metric and the iteration kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalHistory {
    pub metric: String,
    pub values: Vec<f64>,
    pub best_iteration: Option<usize>,
}

pub(crate) fn check_training_data(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(PipelineError::TrainingError("Empty dataset".into()));
    }
    if x.ncols() == 0 {
        return Err(PipelineError::TrainingError("No features".into()));
    }
    if x.nrows() != y.len() {
        return Err(PipelineError::ShapeError {
            expected: format!("{} targets", x.nrows()),
            actual: format!("{} targets", y.len()),
        });
    }
    Ok(())
}

/// Run `n_estimators` boosting rounds, growing each tree with `grow`.
///
/// `grow` receives the round index and the full gradient/hessian vectors and
/// returns an unscaled tree; the learning rate is folded into its leaves here.
/// Raw scores are updated for every training row, whatever subset the tree
/// was grown on.
pub(crate) fn boost<F>(
    objective: Objective,
    x: &Array2<f64>,
    y: &Array1<f64>,
    n_estimators: usize,
    learning_rate: f64,
    eval: Option<&EvalSet<'_>>,
    mut grow: F,
) -> Result<(TreeEnsemble, EvalHistory)>
where
    F: FnMut(usize, &[f64], &[f64]) -> Result<TreeNode>,
{
    check_training_data(x, y)?;
    objective.check_targets(y)?;
    if let Some(eval) = eval {
        check_training_data(eval.x, eval.y)?;
        objective.check_targets(eval.y)?;
        if eval.x.ncols() != x.ncols() {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", x.ncols()),
                actual: format!("{} features in eval set", eval.x.ncols()),
            });
        }
    }

    let base_score = objective.base_score(y);
    let mut raw = Array1::from_elem(x.nrows(), base_score);
    let mut eval_raw = eval.map(|e| Array1::from_elem(e.x.nrows(), base_score));

    let mut trees = Vec::with_capacity(n_estimators);
    let mut history = EvalHistory {
        metric: objective.metric_name().to_string(),
        ..Default::default()
    };
    let mut best_value = f64::INFINITY;

    for round in 0..n_estimators {
        let (grad, hess) = objective.gradients(y, &raw);
        let tree = grow(round, &grad, &hess)?.scaled(learning_rate);

        for (i, row) in x.rows().into_iter().enumerate() {
            raw[i] += tree.predict(row);
        }

        if let (Some(eval), Some(eval_raw)) = (eval, eval_raw.as_mut()) {
            for (i, row) in eval.x.rows().into_iter().enumerate() {
                eval_raw[i] += tree.predict(row);
            }
            let value = objective.eval_metric(eval.y, eval_raw);
            history.values.push(value);
            if value < best_value {
                best_value = value;
                history.best_iteration = Some(round);
            }
        }

        trees.push(tree);

        if let (Some(rounds), Some(best)) = (
            eval.and_then(|e| e.early_stopping_rounds),
            history.best_iteration,
        ) {
            if round - best >= rounds {
                debug!(round, best_iteration = best, "Early stopping");
                break;
            }
        }
    }

    if let (Some(best), Some(_)) = (history.best_iteration, eval.and_then(|e| e.early_stopping_rounds)) {
        trees.truncate(best + 1);
    }

    Ok((
        TreeEnsemble {
            objective,
            base_score,
            trees,
            n_features: x.ncols(),
        },
        history,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_boost_with_constant_trees() {
        let x = array![[0.0], [1.0]];
        let y = array![1.0, 3.0];
        // Leaf = negative mean gradient, i.e. a plain residual fit
        let (ens, _) = boost(Objective::SquaredError, &x, &y, 3, 0.5, None, |_, g, _| {
            Ok(TreeNode::leaf(-g.iter().sum::<f64>() / g.len() as f64))
        })
        .unwrap();
        assert_eq!(ens.n_trees(), 3);
        assert!((ens.base_score - 2.0).abs() < 1e-12);
        let p = ens.predict(&x).unwrap();
        assert!((p[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_early_stopping_truncates() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 2.0];
        let ex = array![[0.0], [1.0]];
        let ey = array![1.0, 1.0];
        let eval = EvalSet {
            x: &ex,
            y: &ey,
            early_stopping_rounds: Some(2),
        };
        // Constant trees that push every prediction upward, so the eval
        // metric (targets at the base score) only gets worse after round 0
        let (ens, history) = boost(Objective::SquaredError, &x, &y, 50, 1.0, Some(&eval), |round, _, _| {
            Ok(TreeNode::leaf(if round == 0 { 0.0 } else { 1.0 }))
        })
        .unwrap();
        assert_eq!(history.best_iteration, Some(0));
        assert_eq!(history.values.len(), 3);
        assert_eq!(ens.n_trees(), 1);
    }

    #[test]
    fn test_shape_mismatch() {
        let x = array![[0.0], [1.0]];
        let y = array![1.0];
        let err = boost(Objective::SquaredError, &x, &y, 1, 0.1, None, |_, _, _| {
            Ok(TreeNode::leaf(0.0))
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::ShapeError { .. }));
    }

    #[test]
    fn test_predict_checks_width() {
        let ens = TreeEnsemble {
            objective: Objective::SquaredError,
            base_score: 0.0,
            trees: vec![],
            n_features: 2,
        };
        assert!(ens.predict(&array![[1.0]]).is_err());
    }
}
