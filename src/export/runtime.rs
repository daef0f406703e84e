//! Minimal evaluator for exported tree-ensemble graphs
//!
//! Decodes a `ModelProto`, validates that it holds a single ONNX-ML tree
//! ensemble node over one `float[N, n]` input and evaluates it with `f32`
//! inputs and thresholds, like onnxruntime does.

use ndarray::{Array1, Array2};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::proto::{ModelProto, NodeProto, ELEM_FLOAT, ML_DOMAIN};
use crate::error::{PipelineError, Result};
use crate::training::sigmoid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsembleKind {
    Regressor,
    Classifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostTransform {
    None,
    Logistic,
}

#[derive(Debug, Clone, Copy)]
enum FlatNode {
    Branch { feature: usize, threshold: f32, missing_true: bool, true_idx: usize, false_idx: usize },
    Leaf { weight: f64 },
}

#[derive(Debug, Clone)]
struct FlatTree {
    nodes: Vec<FlatNode>,
    root: usize,
}

impl FlatTree {
    fn eval(&self, row: &[f32]) -> f64 {
        let mut idx = self.root;
        loop {
            match self.nodes[idx] {
                FlatNode::Leaf { weight } => return weight,
                FlatNode::Branch { feature, threshold, missing_true, true_idx, false_idx } => {
                    let v = row[feature];
                    let go_true = if v.is_nan() { missing_true } else { v <= threshold };
                    idx = if go_true { true_idx } else { false_idx };
                }
            }
        }
    }
}

/// Outputs of one `run`
#[derive(Debug, Clone, PartialEq)]
pub enum OnnxOutput {
    /// `variable`, one value per row
    Regression { values: Array1<f32> },
    /// `label` and `probabilities` (`[P(0), P(1)]` per row)
    Classification { labels: Array1<i64>, probabilities: Array2<f32> },
}

impl OnnxOutput {
    /// Regression values or class labels, as `f64`
    pub fn predictions(&self) -> Array1<f64> {
        match self {
            OnnxOutput::Regression { values } => values.mapv(f64::from),
            OnnxOutput::Classification { labels, .. } => labels.mapv(|l| l as f64),
        }
    }
}

/// Printable description of a loaded graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxSummary {
    pub graph_name: String,
    pub producer: String,
    pub ir_version: i64,
    pub opsets: BTreeMap<String, i64>,
    pub op_type: String,
    pub kind: EnsembleKind,
    pub n_features: usize,
    pub n_trees: usize,
    pub n_nodes: usize,
    pub n_leaves: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A validated, ready-to-run tree-ensemble model
#[derive(Debug, Clone)]
pub struct OnnxRuntime {
    kind: EnsembleKind,
    n_features: usize,
    base_value: f64,
    post_transform: PostTransform,
    trees: Vec<FlatTree>,
    summary: OnnxSummary,
}

impl OnnxRuntime {
    /// Read and validate an ONNX file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let model = ModelProto::decode(bytes)?;
        Self::from_proto(&model)
    }

    pub fn from_proto(model: &ModelProto) -> Result<Self> {
        let graph = model.graph.as_ref().ok_or_else(|| malformed("model has no graph"))?;

        let [input] = graph.input.as_slice() else {
            return Err(malformed(format!("expected one graph input, found {}", graph.input.len())));
        };
        let (elem_type, dims) = input
            .tensor_shape()
            .ok_or_else(|| malformed(format!("input '{}' is not a tensor", input.name)))?;
        if elem_type != ELEM_FLOAT {
            return Err(malformed(format!("input '{}' must be float, found element type {}", input.name, elem_type)));
        }
        let n_features = match dims.as_slice() {
            [_, Some(n)] if *n > 0 => *n as usize,
            _ => return Err(malformed(format!("input '{}' must have shape [N, n_features]", input.name))),
        };

        let [node] = graph.node.as_slice() else {
            return Err(malformed(format!("expected one node, found {}", graph.node.len())));
        };
        if node.domain != ML_DOMAIN {
            return Err(malformed(format!("node domain '{}' is not {}", node.domain, ML_DOMAIN)));
        }
        if node.input.first() != Some(&input.name) {
            return Err(malformed("tree ensemble node does not read the graph input"));
        }

        let (kind, prefix) = match node.op_type.as_str() {
            "TreeEnsembleRegressor" => (EnsembleKind::Regressor, "target"),
            "TreeEnsembleClassifier" => (EnsembleKind::Classifier, "class"),
            other => return Err(malformed(format!("unsupported operator '{}'", other))),
        };

        let post_transform = match node.attr("post_transform").map(|a| a.as_str()).as_deref() {
            None | Some("NONE") => PostTransform::None,
            Some("LOGISTIC") => PostTransform::Logistic,
            Some(other) => return Err(malformed(format!("unsupported post_transform '{}'", other))),
        };
        if kind == EnsembleKind::Regressor {
            if let Some(agg) = node.attr("aggregate_function") {
                if agg.as_str() != "SUM" {
                    return Err(malformed(format!("unsupported aggregate_function '{}'", agg.as_str())));
                }
            }
        }
        if kind == EnsembleKind::Classifier {
            let labels = node.attr("classlabels_int64s").map(|a| a.ints.clone()).unwrap_or_default();
            if labels != [0, 1] {
                return Err(malformed(format!("expected binary class labels [0, 1], found {:?}", labels)));
            }
        }

        let base_value = match node.attr("base_values").map(|a| a.floats.as_slice()) {
            None | Some([]) => 0.0,
            Some([b]) => f64::from(*b),
            Some(values) => return Err(malformed(format!("expected one base value, found {}", values.len()))),
        };

        let trees = build_trees(node, prefix, n_features)?;

        let summary = OnnxSummary {
            graph_name: graph.name.clone(),
            producer: format!("{} {}", model.producer_name, model.producer_version).trim().to_string(),
            ir_version: model.ir_version,
            opsets: model.opset_import.iter().map(|o| (o.domain.clone(), o.version)).collect(),
            op_type: node.op_type.clone(),
            kind,
            n_features,
            n_trees: trees.len(),
            n_nodes: trees.iter().map(|t| t.nodes.len()).sum(),
            n_leaves: trees
                .iter()
                .flat_map(|t| &t.nodes)
                .filter(|n| matches!(n, FlatNode::Leaf { .. }))
                .count(),
            inputs: graph.input.iter().map(|i| i.name.clone()).collect(),
            outputs: graph.output.iter().map(|o| o.name.clone()).collect(),
        };

        Ok(Self { kind, n_features, base_value, post_transform, trees, summary })
    }

    pub fn kind(&self) -> EnsembleKind {
        self.kind
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn summary(&self) -> &OnnxSummary {
        &self.summary
    }

    /// Evaluate the graph on `x`, cast to `f32`
    ///
    /// Thresholds are compared in `f32`, so a value the training data never
    /// held that lies within `f32` rounding above a cut point can branch
    /// differently from `TrainedModel::predict`.
    pub fn run(&self, x: &Array2<f64>) -> Result<OnnxOutput> {
        if x.ncols() != self.n_features {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut row = vec![0f32; self.n_features];
        let scores: Vec<f64> = x
            .rows()
            .into_iter()
            .map(|r| {
                for (dst, &src) in row.iter_mut().zip(r.iter()) {
                    *dst = src as f32;
                }
                self.base_value + self.trees.iter().map(|t| t.eval(&row)).sum::<f64>()
            })
            .collect();

        match self.kind {
            EnsembleKind::Regressor => {
                let values = scores.iter().map(|&s| self.apply_transform(s) as f32).collect();
                Ok(OnnxOutput::Regression { values: Array1::from_vec(values) })
            }
            EnsembleKind::Classifier => {
                let n = scores.len();
                let mut labels = Array1::zeros(n);
                let mut probabilities = Array2::zeros((n, 2));
                for (i, &s) in scores.iter().enumerate() {
                    let p1 = self.apply_transform(s);
                    labels[i] = i64::from(p1 >= 0.5);
                    probabilities[[i, 0]] = (1.0 - p1) as f32;
                    probabilities[[i, 1]] = p1 as f32;
                }
                Ok(OnnxOutput::Classification { labels, probabilities })
            }
        }
    }

    fn apply_transform(&self, score: f64) -> f64 {
        match self.post_transform {
            PostTransform::None => score,
            PostTransform::Logistic => sigmoid(score),
        }
    }
}

fn malformed(msg: impl Into<String>) -> PipelineError {
    PipelineError::ExportError(format!("malformed ONNX model: {}", msg.into()))
}

fn ints<'a>(node: &'a NodeProto, name: &str) -> Result<&'a [i64]> {
    node.attr(name)
        .map(|a| a.ints.as_slice())
        .ok_or_else(|| malformed(format!("missing attribute '{}'", name)))
}

fn floats<'a>(node: &'a NodeProto, name: &str) -> Result<&'a [f32]> {
    node.attr(name)
        .map(|a| a.floats.as_slice())
        .ok_or_else(|| malformed(format!("missing attribute '{}'", name)))
}

fn check_len(name: &str, len: usize, expected: usize) -> Result<()> {
    if len == expected {
        Ok(())
    } else {
        Err(malformed(format!("attribute '{}' has {} entries, expected {}", name, len, expected)))
    }
}

/// Rebuild per-tree node arrays from the flattened attribute tables
fn build_trees(node: &NodeProto, prefix: &str, n_features: usize) -> Result<Vec<FlatTree>> {
    let tree_ids = ints(node, "nodes_treeids")?;
    let node_ids = ints(node, "nodes_nodeids")?;
    let feature_ids = ints(node, "nodes_featureids")?;
    let values = floats(node, "nodes_values")?;
    let true_ids = ints(node, "nodes_truenodeids")?;
    let false_ids = ints(node, "nodes_falsenodeids")?;
    let modes = node
        .attr("nodes_modes")
        .map(|a| a.as_strings())
        .ok_or_else(|| malformed("missing attribute 'nodes_modes'"))?;
    let missing_true = node
        .attr("nodes_missing_value_tracks_true")
        .map(|a| a.ints.clone())
        .unwrap_or_else(|| vec![0; tree_ids.len()]);

    let n = tree_ids.len();
    check_len("nodes_nodeids", node_ids.len(), n)?;
    check_len("nodes_featureids", feature_ids.len(), n)?;
    check_len("nodes_values", values.len(), n)?;
    check_len("nodes_truenodeids", true_ids.len(), n)?;
    check_len("nodes_falsenodeids", false_ids.len(), n)?;
    check_len("nodes_modes", modes.len(), n)?;
    check_len("nodes_missing_value_tracks_true", missing_true.len(), n)?;

    // (tree id, node id) -> position inside that tree
    let mut tree_order: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &t) in tree_ids.iter().enumerate() {
        tree_order.entry(t).or_default().push(i);
    }
    let mut position: HashMap<(i64, i64), usize> = HashMap::with_capacity(n);
    for members in tree_order.values() {
        for (pos, &i) in members.iter().enumerate() {
            if position.insert((tree_ids[i], node_ids[i]), pos).is_some() {
                return Err(malformed(format!("duplicate node {} in tree {}", node_ids[i], tree_ids[i])));
            }
        }
    }

    // Leaf weights, summed when a leaf carries several entries
    let target_tree_ids = ints(node, &format!("{}_treeids", prefix))?;
    let target_node_ids = ints(node, &format!("{}_nodeids", prefix))?;
    let target_ids = ints(node, &format!("{}_ids", prefix))?;
    let weights = floats(node, &format!("{}_weights", prefix))?;
    check_len(&format!("{}_nodeids", prefix), target_node_ids.len(), target_tree_ids.len())?;
    check_len(&format!("{}_ids", prefix), target_ids.len(), target_tree_ids.len())?;
    check_len(&format!("{}_weights", prefix), weights.len(), target_tree_ids.len())?;

    let mut leaf_weight: HashMap<(i64, i64), f64> = HashMap::new();
    for i in 0..target_tree_ids.len() {
        if target_ids[i] != 0 {
            return Err(malformed(format!("{}_ids must all be 0 for a single output", prefix)));
        }
        let key = (target_tree_ids[i], target_node_ids[i]);
        if !position.contains_key(&key) {
            return Err(malformed(format!("weight refers to unknown node {} in tree {}", key.1, key.0)));
        }
        *leaf_weight.entry(key).or_insert(0.0) += f64::from(weights[i]);
    }

    let mut trees = Vec::with_capacity(tree_order.len());
    for (&tree_id, members) in &tree_order {
        let mut nodes = Vec::with_capacity(members.len());
        let mut is_child = vec![false; members.len()];

        for &i in members {
            let flat = match modes[i].as_str() {
                "LEAF" => FlatNode::Leaf {
                    weight: leaf_weight.get(&(tree_id, node_ids[i])).copied().unwrap_or(0.0),
                },
                "BRANCH_LEQ" => {
                    let feature = usize::try_from(feature_ids[i])
                        .ok()
                        .filter(|&f| f < n_features)
                        .ok_or_else(|| malformed(format!("feature id {} out of range", feature_ids[i])))?;
                    let lookup = |child: i64| {
                        position
                            .get(&(tree_id, child))
                            .copied()
                            .ok_or_else(|| malformed(format!("node {} in tree {} does not exist", child, tree_id)))
                    };
                    let true_idx = lookup(true_ids[i])?;
                    let false_idx = lookup(false_ids[i])?;
                    is_child[true_idx] = true;
                    is_child[false_idx] = true;
                    FlatNode::Branch {
                        feature,
                        threshold: values[i],
                        missing_true: missing_true[i] != 0,
                        true_idx,
                        false_idx,
                    }
                }
                other => return Err(malformed(format!("unsupported node mode '{}'", other))),
            };
            nodes.push(flat);
        }

        let roots: Vec<usize> = (0..nodes.len()).filter(|&p| !is_child[p]).collect();
        let [root] = roots.as_slice() else {
            return Err(malformed(format!("tree {} has {} roots", tree_id, roots.len())));
        };
        let tree = FlatTree { nodes, root: *root };
        check_acyclic(&tree, tree_id)?;
        trees.push(tree);
    }

    if trees.is_empty() {
        return Err(malformed("ensemble has no trees"));
    }
    Ok(trees)
}

/// Every node reachable from the root exactly once
fn check_acyclic(tree: &FlatTree, tree_id: i64) -> Result<()> {
    let mut seen = vec![false; tree.nodes.len()];
    let mut stack = vec![tree.root];
    while let Some(idx) = stack.pop() {
        if std::mem::replace(&mut seen[idx], true) {
            return Err(malformed(format!("tree {} is not a tree (node reached twice)", tree_id)));
        }
        if let FlatNode::Branch { true_idx, false_idx, .. } = tree.nodes[idx] {
            stack.push(true_idx);
            stack.push(false_idx);
        }
    }
    Ok(())
}
