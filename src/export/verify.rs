//! Numeric check of an exported model against the in-memory model

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::runtime::OnnxRuntime;
use crate::error::{PipelineError, Result};
use crate::training::{ModelMetrics, TaskKind, TrainedModel};

/// RMSE difference tolerated for regression exports, absolute below an RMSE
/// of 1 and relative above it
pub const DEFAULT_TOLERANCE: f64 = 1e-3;
/// Minimum share of identical labels for classification exports
pub const MIN_LABEL_AGREEMENT: f64 = 0.99;

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// `rmse` or `accuracy`
    pub metric: String,
    pub native: f64,
    pub exported: f64,
    /// RMSE difference scaled by `max(native RMSE, 1)`, absolute for accuracy
    pub difference: f64,
    /// Share of rows with identical labels (classification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_agreement: Option<f64>,
    pub max_abs_diff: f64,
    pub n_samples: usize,
}

/// Compare `model` and the exported graph on held-out data.
///
/// Regression passes when the RMSE difference is at most `tolerance`,
/// either absolutely or relative to the native RMSE, so a near-perfect fit
/// is not failed by `f32` rounding. Classification passes when accuracy moves by at most one
/// row and at least 99% of labels agree.
pub fn verify_export(
    model: &TrainedModel,
    runtime: &OnnxRuntime,
    x_test: &Array2<f64>,
    y_test: &Array1<f64>,
    tolerance: f64,
) -> Result<VerificationReport> {
    if x_test.nrows() == 0 {
        return Err(PipelineError::VerificationFailed("no rows to verify on".to_string()));
    }
    if x_test.nrows() != y_test.len() {
        return Err(PipelineError::ShapeError {
            expected: format!("{} targets", x_test.nrows()),
            actual: format!("{} targets", y_test.len()),
        });
    }

    let native = model.predict(x_test)?;
    let exported = runtime.run(x_test)?.predictions();
    let n = y_test.len();
    let max_abs_diff = native
        .iter()
        .zip(exported.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);

    let report = match model.task() {
        TaskKind::Regression => {
            let native_rmse = rmse(y_test, &native);
            let exported_rmse = rmse(y_test, &exported);
            let difference = (native_rmse - exported_rmse).abs() / native_rmse.max(1.0);
            if !(difference <= tolerance) {
                return Err(PipelineError::VerificationFailed(format!(
                    "exported RMSE {:.6} differs from native RMSE {:.6} by {:.3e} (tolerance {:.1e})",
                    exported_rmse, native_rmse, difference, tolerance
                )));
            }
            VerificationReport {
                metric: "rmse".to_string(),
                native: native_rmse,
                exported: exported_rmse,
                difference,
                label_agreement: None,
                max_abs_diff,
                n_samples: n,
            }
        }
        TaskKind::Classification => {
            let native_acc = accuracy(y_test, &native);
            let exported_acc = accuracy(y_test, &exported);
            let difference = (native_acc - exported_acc).abs();
            let agreement = native.iter().zip(exported.iter()).filter(|(a, b)| a == b).count() as f64 / n as f64;

            // one row of slack, plus rounding
            let max_difference = 1.0 / n as f64 + 1e-12;
            if difference > max_difference || agreement < MIN_LABEL_AGREEMENT {
                return Err(PipelineError::VerificationFailed(format!(
                    "exported accuracy {:.4} vs native {:.4}, label agreement {:.2}%",
                    exported_acc,
                    native_acc,
                    agreement * 100.0
                )));
            }
            VerificationReport {
                metric: "accuracy".to_string(),
                native: native_acc,
                exported: exported_acc,
                difference,
                label_agreement: Some(agreement),
                max_abs_diff,
                n_samples: n,
            }
        }
    };

    info!(
        metric = %report.metric,
        native = report.native,
        exported = report.exported,
        "Exported model verified"
    );
    Ok(report)
}

fn rmse(y: &Array1<f64>, pred: &Array1<f64>) -> f64 {
    ModelMetrics::compute_regression(y, pred).rmse.unwrap_or(0.0)
}

fn accuracy(y: &Array1<f64>, pred: &Array1<f64>) -> f64 {
    ModelMetrics::compute_classification(y, pred, None).accuracy.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::OnnxExporter;
    use crate::training::{ModelSpec, XGBoostConfig};

    fn setup(task: TaskKind) -> (TrainedModel, Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((100, 2), |(i, j)| ((i * 13 + j * 5) % 31) as f64 / 3.0);
        let y = match task {
            TaskKind::Regression => x.column(0).mapv(|v| 1.5 * v) + x.column(1),
            TaskKind::Classification => x.column(1).mapv(|v| if v > 5.0 { 1.0 } else { 0.0 }),
        };
        let spec = ModelSpec::XGBoost(XGBoostConfig { n_estimators: 20, max_depth: 3, ..Default::default() });
        let model = spec.fit(task, &x, &y, None).unwrap();
        (model, x, y)
    }

    fn runtime_for(model: &TrainedModel) -> OnnxRuntime {
        OnnxRuntime::from_bytes(&OnnxExporter::new().to_bytes(model, 2).unwrap()).unwrap()
    }

    #[test]
    fn test_regression_export_verifies() {
        let (model, x, y) = setup(TaskKind::Regression);
        let report = verify_export(&model, &runtime_for(&model), &x, &y, DEFAULT_TOLERANCE).unwrap();
        assert_eq!(report.metric, "rmse");
        assert!(report.difference <= DEFAULT_TOLERANCE);
        assert!(report.label_agreement.is_none());
    }

    #[test]
    fn test_classification_export_verifies() {
        let (model, x, y) = setup(TaskKind::Classification);
        let report = verify_export(&model, &runtime_for(&model), &x, &y, DEFAULT_TOLERANCE).unwrap();
        assert_eq!(report.metric, "accuracy");
        assert!(report.label_agreement.unwrap() >= MIN_LABEL_AGREEMENT);
    }

    #[test]
    fn test_exact_fit_verifies_despite_f32_rounding() {
        let x = Array2::from_shape_fn((200, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = x.column(0).mapv(|v| if v < 100.0 { 987.654 } else { 1234.567 });
        let spec = ModelSpec::XGBoost(XGBoostConfig { n_estimators: 200, max_depth: 3, ..Default::default() });
        let model = spec.fit(TaskKind::Regression, &x, &y, None).unwrap();

        let report = verify_export(&model, &runtime_for(&model), &x, &y, DEFAULT_TOLERANCE).unwrap();
        assert!(report.native < 1e-3);
        assert!(report.difference <= DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_mismatched_export_fails() {
        let (model, x, y) = setup(TaskKind::Regression);
        let (other, _, _) = setup(TaskKind::Classification);
        // A classifier graph scored as if it were the regressor
        let err = verify_export(&model, &runtime_for(&other), &x, &y, DEFAULT_TOLERANCE).unwrap_err();
        assert!(matches!(err, PipelineError::VerificationFailed(_)));
    }
}
