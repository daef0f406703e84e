//! ONNX export of fitted tree ensembles
//!
//! Writes a binary `ModelProto` holding a single `ai.onnx.ml`
//! `TreeEnsembleRegressor` or `TreeEnsembleClassifier` node, the same graph
//! layout onnxmltools produces for LightGBM and XGBoost models.

use prost::Message;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::proto::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, ValueInfoProto, ELEM_FLOAT, ELEM_INT64,
    ML_DOMAIN,
};
use crate::error::{PipelineError, Result};
use crate::training::{Objective, TrainedModel, TreeEnsemble, TreeNode};

pub const INPUT_NAME: &str = "float_input";
pub const REGRESSOR_OUTPUT: &str = "variable";
pub const LABEL_OUTPUT: &str = "label";
pub const PROBABILITY_OUTPUT: &str = "probabilities";

/// ONNX export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// Graph name, e.g. `BiogasProductionPredictor`
    pub model_name: String,
    pub ir_version: i64,
    /// Default-domain opset
    pub opset_version: i64,
    /// `ai.onnx.ml` opset
    pub ml_opset_version: i64,
    pub producer_name: String,
    pub producer_version: String,
    pub doc_string: String,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            model_name: "TreeEnsemble".to_string(),
            ir_version: 7,
            opset_version: 12,
            ml_opset_version: 1,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            doc_string: String::new(),
        }
    }
}

/// Node tables of a flattened ensemble, in the attribute layout of the ONNX
/// tree-ensemble operators
#[derive(Debug, Default)]
struct NodeTables {
    tree_ids: Vec<i64>,
    node_ids: Vec<i64>,
    feature_ids: Vec<i64>,
    values: Vec<f32>,
    modes: Vec<&'static str>,
    true_ids: Vec<i64>,
    false_ids: Vec<i64>,
    leaf_tree_ids: Vec<i64>,
    leaf_node_ids: Vec<i64>,
    leaf_weights: Vec<f32>,
}

impl NodeTables {
    fn from_trees(trees: &[TreeNode]) -> Self {
        let mut tables = Self::default();
        for (tree_id, tree) in trees.iter().enumerate() {
            let mut next_id = 0;
            tables.push(tree_id as i64, tree, &mut next_id);
        }
        tables
    }

    /// Pre-order numbering, root at 0; returns the id given to `node`
    fn push(&mut self, tree_id: i64, node: &TreeNode, next_id: &mut i64) -> i64 {
        let id = *next_id;
        *next_id += 1;
        let slot = self.node_ids.len();

        self.tree_ids.push(tree_id);
        self.node_ids.push(id);

        match node {
            TreeNode::Leaf { value } => {
                self.feature_ids.push(0);
                self.values.push(0.0);
                self.modes.push("LEAF");
                self.true_ids.push(0);
                self.false_ids.push(0);

                self.leaf_tree_ids.push(tree_id);
                self.leaf_node_ids.push(id);
                self.leaf_weights.push(*value as f32);
            }
            TreeNode::Split { feature, threshold, left, right } => {
                self.feature_ids.push(*feature as i64);
                self.values.push(*threshold as f32);
                self.modes.push("BRANCH_LEQ");
                self.true_ids.push(0);
                self.false_ids.push(0);

                let left_id = self.push(tree_id, left, next_id);
                let right_id = self.push(tree_id, right, next_id);
                self.true_ids[slot] = left_id;
                self.false_ids[slot] = right_id;
            }
        }
        id
    }

    fn len(&self) -> usize {
        self.node_ids.len()
    }

    fn node_attributes(&self) -> Vec<AttributeProto> {
        vec![
            AttributeProto::ints("nodes_treeids", self.tree_ids.clone()),
            AttributeProto::ints("nodes_nodeids", self.node_ids.clone()),
            AttributeProto::ints("nodes_featureids", self.feature_ids.clone()),
            AttributeProto::floats("nodes_values", self.values.clone()),
            AttributeProto::strings("nodes_modes", &self.modes),
            AttributeProto::ints("nodes_truenodeids", self.true_ids.clone()),
            AttributeProto::ints("nodes_falsenodeids", self.false_ids.clone()),
            // NaN takes the false (right) branch
            AttributeProto::ints("nodes_missing_value_tracks_true", vec![0; self.len()]),
            AttributeProto::floats("nodes_hitrates", vec![1.0; self.len()]),
        ]
    }
}

/// Exports fitted boosters to ONNX
#[derive(Debug, Clone, Default)]
pub struct OnnxExporter {
    config: OnnxConfig,
}

impl OnnxExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OnnxConfig) -> Self {
        Self { config }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = name.into();
        self
    }

    pub fn config(&self) -> &OnnxConfig {
        &self.config
    }

    /// Build the `ModelProto` for `model` with `n_features` float inputs
    pub fn build(&self, model: &TrainedModel, n_features: usize) -> Result<ModelProto> {
        let ensemble = model.ensemble()?;
        if ensemble.n_features != n_features {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", ensemble.n_features),
                actual: format!("{} features", n_features),
            });
        }
        if ensemble.trees.is_empty() {
            return Err(PipelineError::ExportError("ensemble has no trees".to_string()));
        }

        let tables = NodeTables::from_trees(&ensemble.trees);
        let (node, outputs) = match ensemble.objective {
            Objective::SquaredError => regressor_node(&self.config, ensemble, &tables),
            Objective::BinaryLogistic => classifier_node(&self.config, ensemble, &tables),
        };

        let graph = GraphProto {
            node: vec![node],
            name: self.config.model_name.clone(),
            doc_string: String::new(),
            input: vec![ValueInfoProto::tensor(INPUT_NAME, ELEM_FLOAT, &[None, Some(n_features as i64)])],
            output: outputs,
            value_info: Vec::new(),
        };

        Ok(ModelProto {
            ir_version: self.config.ir_version,
            producer_name: self.config.producer_name.clone(),
            producer_version: self.config.producer_version.clone(),
            domain: String::new(),
            model_version: 0,
            doc_string: self.config.doc_string.clone(),
            graph: Some(graph),
            opset_import: vec![
                OperatorSetIdProto { domain: String::new(), version: self.config.opset_version },
                OperatorSetIdProto { domain: ML_DOMAIN.to_string(), version: self.config.ml_opset_version },
            ],
        })
    }

    /// Serialized model bytes; identical for identical models
    pub fn to_bytes(&self, model: &TrainedModel, n_features: usize) -> Result<Vec<u8>> {
        Ok(self.build(model, n_features)?.encode_to_vec())
    }

    /// Write the binary model to `path`
    pub fn export(&self, model: &TrainedModel, n_features: usize, path: &Path) -> Result<()> {
        let bytes = self.to_bytes(model, n_features)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), graph = %self.config.model_name, "ONNX model written");
        Ok(())
    }
}

fn regressor_node(config: &OnnxConfig, ensemble: &TreeEnsemble, tables: &NodeTables) -> (NodeProto, Vec<ValueInfoProto>) {
    let mut attribute = vec![
        AttributeProto::string("aggregate_function", "SUM"),
        AttributeProto::floats("base_values", vec![ensemble.base_score as f32]),
        AttributeProto::int("n_targets", 1),
        AttributeProto::string("post_transform", "NONE"),
    ];
    attribute.extend(tables.node_attributes());
    attribute.extend([
        AttributeProto::ints("target_treeids", tables.leaf_tree_ids.clone()),
        AttributeProto::ints("target_nodeids", tables.leaf_node_ids.clone()),
        AttributeProto::ints("target_ids", vec![0; tables.leaf_node_ids.len()]),
        AttributeProto::floats("target_weights", tables.leaf_weights.clone()),
    ]);

    let node = NodeProto {
        input: vec![INPUT_NAME.to_string()],
        output: vec![REGRESSOR_OUTPUT.to_string()],
        name: format!("{}_TreeEnsembleRegressor", config.model_name),
        op_type: "TreeEnsembleRegressor".to_string(),
        attribute,
        doc_string: String::new(),
        domain: ML_DOMAIN.to_string(),
    };
    let outputs = vec![ValueInfoProto::tensor(REGRESSOR_OUTPUT, ELEM_FLOAT, &[None, Some(1)])];
    (node, outputs)
}

fn classifier_node(config: &OnnxConfig, ensemble: &TreeEnsemble, tables: &NodeTables) -> (NodeProto, Vec<ValueInfoProto>) {
    let mut attribute = vec![
        AttributeProto::floats("base_values", vec![ensemble.base_score as f32]),
        AttributeProto::ints("classlabels_int64s", vec![0, 1]),
        AttributeProto::string("post_transform", "LOGISTIC"),
    ];
    attribute.extend(tables.node_attributes());
    attribute.extend([
        AttributeProto::ints("class_treeids", tables.leaf_tree_ids.clone()),
        AttributeProto::ints("class_nodeids", tables.leaf_node_ids.clone()),
        AttributeProto::ints("class_ids", vec![0; tables.leaf_node_ids.len()]),
        AttributeProto::floats("class_weights", tables.leaf_weights.clone()),
    ]);

    let node = NodeProto {
        input: vec![INPUT_NAME.to_string()],
        output: vec![LABEL_OUTPUT.to_string(), PROBABILITY_OUTPUT.to_string()],
        name: format!("{}_TreeEnsembleClassifier", config.model_name),
        op_type: "TreeEnsembleClassifier".to_string(),
        attribute,
        doc_string: String::new(),
        domain: ML_DOMAIN.to_string(),
    };
    let outputs = vec![
        ValueInfoProto::tensor(LABEL_OUTPUT, ELEM_INT64, &[None]),
        ValueInfoProto::tensor(PROBABILITY_OUTPUT, ELEM_FLOAT, &[None, Some(2)]),
    ];
    (node, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{ModelSpec, TaskKind, XGBoostConfig};
    use ndarray::{Array1, Array2};

    fn fitted(task: TaskKind) -> TrainedModel {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| ((i * 5 + j * 11) % 17) as f64);
        let y: Array1<f64> = match task {
            TaskKind::Regression => x.column(0).mapv(|v| v * 2.0 - 1.0),
            TaskKind::Classification => x.column(1).mapv(|v| if v > 8.0 { 1.0 } else { 0.0 }),
        };
        let spec = ModelSpec::XGBoost(XGBoostConfig { n_estimators: 5, max_depth: 3, ..Default::default() });
        spec.fit(task, &x, &y, None).unwrap()
    }

    #[test]
    fn test_preorder_numbering() {
        let tree = TreeNode::Split {
            feature: 2,
            threshold: 0.5,
            left: Box::new(TreeNode::Split {
                feature: 0,
                threshold: -1.0,
                left: Box::new(TreeNode::leaf(1.0)),
                right: Box::new(TreeNode::leaf(2.0)),
            }),
            right: Box::new(TreeNode::leaf(3.0)),
        };
        let tables = NodeTables::from_trees(&[tree.clone(), tree]);

        assert_eq!(tables.node_ids, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4]);
        assert_eq!(tables.true_ids[..5], [1, 2, 0, 0, 0]);
        assert_eq!(tables.false_ids[..5], [4, 3, 0, 0, 0]);
        assert_eq!(tables.modes[..5], ["BRANCH_LEQ", "BRANCH_LEQ", "LEAF", "LEAF", "LEAF"]);
        assert_eq!(tables.leaf_node_ids, vec![2, 3, 4, 2, 3, 4]);
        assert_eq!(tables.leaf_weights[..3], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_regressor_graph_header() {
        let model = fitted(TaskKind::Regression);
        let proto = OnnxExporter::new().with_model_name("Demo").build(&model, 3).unwrap();

        assert_eq!(proto.ir_version, 7);
        assert_eq!(proto.opset_import.len(), 2);
        assert_eq!(proto.opset_import[1].domain, ML_DOMAIN);

        let graph = proto.graph.unwrap();
        assert_eq!(graph.name, "Demo");
        assert_eq!(graph.input[0].tensor_shape().unwrap().1, vec![None, Some(3)]);
        assert_eq!(graph.node[0].op_type, "TreeEnsembleRegressor");
        assert_eq!(graph.output[0].name, REGRESSOR_OUTPUT);
    }

    #[test]
    fn test_classifier_outputs() {
        let model = fitted(TaskKind::Classification);
        let graph = OnnxExporter::new().build(&model, 3).unwrap().graph.unwrap();
        let node = &graph.node[0];

        assert_eq!(node.op_type, "TreeEnsembleClassifier");
        assert_eq!(node.output, vec![LABEL_OUTPUT, PROBABILITY_OUTPUT]);
        assert_eq!(node.attr("post_transform").unwrap().as_str(), "LOGISTIC");
        assert_eq!(node.attr("classlabels_int64s").unwrap().ints, vec![0, 1]);
    }

    #[test]
    fn test_export_is_deterministic_and_checks_width() {
        let model = fitted(TaskKind::Regression);
        let exporter = OnnxExporter::new();
        assert_eq!(exporter.to_bytes(&model, 3).unwrap(), exporter.to_bytes(&model, 3).unwrap());
        assert!(matches!(exporter.to_bytes(&model, 4), Err(PipelineError::ShapeError { .. })));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.onnx");
        exporter.export(&model, 3, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), exporter.to_bytes(&model, 3).unwrap());
    }
}
