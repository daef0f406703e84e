//! Loss functions: gradients, base score and held-out metric

use crate::error::{PipelineError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

const PROB_EPS: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Squared error on the raw score
    SquaredError,
    /// Log loss on `sigmoid(raw)`, labels in {0, 1}
    BinaryLogistic,
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Objective {
    /// Constant initial raw score
    pub fn base_score(&self, y: &Array1<f64>) -> f64 {
        match self {
            Objective::SquaredError => y.mean().unwrap_or(0.0),
            Objective::BinaryLogistic => {
                let p = y.mean().unwrap_or(0.5).clamp(PROB_EPS, 1.0 - PROB_EPS);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// First and second derivatives of the loss at `raw`
    pub fn gradients(&self, y: &Array1<f64>, raw: &Array1<f64>) -> (Vec<f64>, Vec<f64>) {
        match self {
            Objective::SquaredError => {
                let grad = raw.iter().zip(y.iter()).map(|(&p, &t)| p - t).collect();
                (grad, vec![1.0; y.len()])
            }
            Objective::BinaryLogistic => raw
                .iter()
                .zip(y.iter())
                .map(|(&r, &t)| {
                    let p = sigmoid(r);
                    (p - t, (p * (1.0 - p)).max(1e-16))
                })
                .unzip(),
        }
    }

    /// Map a raw score to the prediction space
    pub fn transform(&self, raw: f64) -> f64 {
        match self {
            Objective::SquaredError => raw,
            Objective::BinaryLogistic => sigmoid(raw),
        }
    }

    /// Held-out metric used for early stopping, lower is better
    pub fn eval_metric(&self, y: &Array1<f64>, raw: &Array1<f64>) -> f64 {
        let n = y.len().max(1) as f64;
        match self {
            Objective::SquaredError => {
                let sse: f64 = raw.iter().zip(y.iter()).map(|(p, t)| (p - t).powi(2)).sum();
                (sse / n).sqrt()
            }
            Objective::BinaryLogistic => {
                let loss: f64 = raw
                    .iter()
                    .zip(y.iter())
                    .map(|(&r, &t)| {
                        let p = sigmoid(r).clamp(PROB_EPS, 1.0 - PROB_EPS);
                        -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
                    })
                    .sum();
                loss / n
            }
        }
    }

    pub fn metric_name(&self) -> &'static str {
        match self {
            Objective::SquaredError => "rmse",
            Objective::BinaryLogistic => "logloss",
        }
    }

    /// Reject targets the loss is not defined for
    pub fn check_targets(&self, y: &Array1<f64>) -> Result<()> {
        if let Some(bad) = y.iter().find(|v| !v.is_finite()) {
            return Err(PipelineError::TrainingError(format!(
                "target contains non-finite value {}",
                bad
            )));
        }
        if *self == Objective::BinaryLogistic {
            if let Some(bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
                return Err(PipelineError::TrainingError(format!(
                    "binary classification expects labels 0/1, found {}",
                    bad
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_base_scores() {
        let y = array![0.0, 1.0, 1.0, 1.0];
        assert!((Objective::SquaredError.base_score(&y) - 0.75).abs() < 1e-12);
        assert!((Objective::BinaryLogistic.base_score(&y) - 3.0f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_logistic_gradients() {
        let (g, h) = Objective::BinaryLogistic.gradients(&array![1.0], &array![0.0]);
        assert!((g[0] + 0.5).abs() < 1e-12);
        assert!((h[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_eval_metric_rmse() {
        let m = Objective::SquaredError.eval_metric(&array![1.0, 3.0], &array![2.0, 2.0]);
        assert!((m - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_check_targets() {
        assert!(Objective::BinaryLogistic.check_targets(&array![0.0, 1.0]).is_ok());
        assert!(Objective::BinaryLogistic.check_targets(&array![0.0, 2.0]).is_err());
        assert!(Objective::SquaredError.check_targets(&array![f64::NAN]).is_err());
    }
}
