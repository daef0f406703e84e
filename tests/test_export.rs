//! Integration test: ONNX export, reload and numeric parity

use gazolive_ml::error::PipelineError;
use gazolive_ml::export::proto::ModelProto;
use gazolive_ml::export::{
    verify_export, EnsembleKind, OnnxExporter, OnnxOutput, OnnxRuntime, DEFAULT_TOLERANCE, INPUT_NAME,
    LABEL_OUTPUT, PROBABILITY_OUTPUT, REGRESSOR_OUTPUT,
};
use gazolive_ml::training::{LightGBMConfig, ModelSpec, TaskKind, TrainedModel, XGBoostConfig};
use ndarray::{Array1, Array2};
use prost::Message;

fn features(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, 4), |(i, j)| ((i * (j + 3) * 17 + j * 5) % 101) as f64 / 10.0)
}

fn regression_target(x: &Array2<f64>) -> Array1<f64> {
    x.rows().into_iter().map(|r| 2.0 * r[0] - r[1] + 0.3 * r[2] * r[3]).collect()
}

fn classification_target(x: &Array2<f64>) -> Array1<f64> {
    x.rows().into_iter().map(|r| if r[0] + r[2] > 10.0 { 1.0 } else { 0.0 }).collect()
}

fn fit(spec: ModelSpec, task: TaskKind) -> (TrainedModel, Array2<f64>, Array1<f64>) {
    let x = features(300);
    let y = match task {
        TaskKind::Regression => regression_target(&x),
        TaskKind::Classification => classification_target(&x),
    };
    let model = spec.fit(task, &x, &y, None).unwrap();
    (model, x, y)
}

fn xgb() -> ModelSpec {
    ModelSpec::XGBoost(XGBoostConfig { n_estimators: 30, max_depth: 4, ..Default::default() })
}

fn lgb() -> ModelSpec {
    ModelSpec::LightGBM(LightGBMConfig {
        n_estimators: 30,
        num_leaves: 12,
        min_child_samples: 5,
        ..Default::default()
    })
}

#[test]
fn test_regressor_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/reg.onnx");

    for spec in [xgb(), lgb()] {
        let (model, x, y) = fit(spec, TaskKind::Regression);
        OnnxExporter::new().export(&model, 4, &path).unwrap();

        let runtime = OnnxRuntime::load(&path).unwrap();
        assert_eq!(runtime.kind(), EnsembleKind::Regressor);
        assert_eq!(runtime.n_features(), 4);

        let exported = runtime.run(&x).unwrap().predictions();
        let native = model.predict(&x).unwrap();
        for (a, b) in exported.iter().zip(native.iter()) {
            assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0), "{} vs {}", a, b);
        }

        let report = verify_export(&model, &runtime, &x, &y, DEFAULT_TOLERANCE).unwrap();
        assert!(report.difference <= DEFAULT_TOLERANCE);
    }
}

#[test]
fn test_classifier_outputs_labels_and_probabilities() {
    for spec in [xgb(), lgb()] {
        let (model, x, _) = fit(spec, TaskKind::Classification);
        let runtime = OnnxRuntime::from_bytes(&OnnxExporter::new().to_bytes(&model, 4).unwrap()).unwrap();
        assert_eq!(runtime.kind(), EnsembleKind::Classifier);

        let OnnxOutput::Classification { labels, probabilities } = runtime.run(&x).unwrap() else {
            panic!("expected classifier output");
        };
        assert_eq!(probabilities.dim(), (300, 2));
        for (row, &label) in probabilities.rows().into_iter().zip(labels.iter()) {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-5);
            assert_eq!(label, i64::from(row[1] >= 0.5));
        }

        let native = model.predict_proba(&x).unwrap();
        for (a, b) in probabilities.column(1).iter().zip(native.column(1).iter()) {
            assert!((f64::from(*a) - b).abs() < 1e-3);
        }
    }
}

#[test]
fn test_graph_layout() {
    let (model, _, _) = fit(xgb(), TaskKind::Classification);
    let proto = OnnxExporter::new().with_model_name("AnomalyDetector").build(&model, 4).unwrap();

    assert_eq!(proto.ir_version, 7);
    let opsets: Vec<(String, i64)> = proto.opset_import.iter().map(|o| (o.domain.clone(), o.version)).collect();
    assert!(opsets.contains(&(String::new(), 12)));
    assert!(opsets.contains(&("ai.onnx.ml".to_string(), 1)));

    let graph = proto.graph.as_ref().unwrap();
    assert_eq!(graph.name, "AnomalyDetector");
    assert_eq!(graph.input[0].name, INPUT_NAME);
    let outputs: Vec<&str> = graph.output.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(outputs, [LABEL_OUTPUT, PROBABILITY_OUTPUT]);
    assert_eq!(graph.node[0].op_type, "TreeEnsembleClassifier");

    let (reg, _, _) = fit(xgb(), TaskKind::Regression);
    let proto = OnnxExporter::new().build(&reg, 4).unwrap();
    let graph = proto.graph.unwrap();
    assert_eq!(graph.output[0].name, REGRESSOR_OUTPUT);
    assert_eq!(graph.node[0].op_type, "TreeEnsembleRegressor");
}

#[test]
fn test_missing_values_follow_the_same_branch() {
    let (model, x, _) = fit(lgb(), TaskKind::Regression);
    let mut x_nan = x.slice(ndarray::s![..20, ..]).to_owned();
    for i in 0..20 {
        x_nan[[i, i % 4]] = f64::NAN;
    }

    let runtime = OnnxRuntime::from_bytes(&OnnxExporter::new().to_bytes(&model, 4).unwrap()).unwrap();
    let exported = runtime.run(&x_nan).unwrap().predictions();
    let native = model.predict(&x_nan).unwrap();
    for (a, b) in exported.iter().zip(native.iter()) {
        assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0));
    }
}

#[test]
fn test_width_mismatch_is_rejected() {
    let (model, x, _) = fit(xgb(), TaskKind::Regression);
    assert!(matches!(
        OnnxExporter::new().build(&model, 5),
        Err(PipelineError::ShapeError { .. })
    ));

    let runtime = OnnxRuntime::from_bytes(&OnnxExporter::new().to_bytes(&model, 4).unwrap()).unwrap();
    let narrow = x.slice(ndarray::s![.., ..3]).to_owned();
    assert!(matches!(runtime.run(&narrow), Err(PipelineError::ShapeError { .. })));
}

#[test]
fn test_corrupt_files_fail_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.onnx");
    std::fs::write(&path, b"\xff\xff\xff\xff not protobuf").unwrap();
    assert!(matches!(OnnxRuntime::load(&path), Err(PipelineError::ExportError(_))));

    // Well-formed protobuf, but no graph
    let empty = ModelProto { ir_version: 7, ..Default::default() }.encode_to_vec();
    assert!(matches!(OnnxRuntime::from_bytes(&empty), Err(PipelineError::ExportError(_))));

    assert!(matches!(
        OnnxRuntime::load(&dir.path().join("missing.onnx")),
        Err(PipelineError::IoError(_))
    ));
}
