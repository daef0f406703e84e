//! Regression tree shared by both boosting families

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// A node of a binary regression tree.
///
/// Rows go left when `x[feature] <= threshold`. `NaN` fails the comparison,
/// so missing values always take the right branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn leaf(value: f64) -> Self {
        TreeNode::Leaf { value }
    }

    /// Leaf value reached by `sample`
    pub fn predict(&self, sample: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Copy of the tree with every leaf value multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> TreeNode {
        match self {
            TreeNode::Leaf { value } => TreeNode::Leaf {
                value: value * factor,
            },
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => TreeNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(left.scaled(factor)),
                right: Box::new(right.scaled(factor)),
            },
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.n_nodes() + right.n_nodes(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn count_splits(&self, counts: &mut [f64]) {
        if let TreeNode::Split {
            feature,
            left,
            right,
            ..
        } = self
        {
            if *feature < counts.len() {
                counts[*feature] += 1.0;
            }
            left.count_splits(counts);
            right.count_splits(counts);
        }
    }
}

/// Normalized split-count importances over a forest
pub fn split_count_importances(trees: &[TreeNode], n_features: usize) -> Array1<f64> {
    let mut counts = vec![0.0f64; n_features];
    for tree in trees {
        tree.count_splits(&mut counts);
    }
    let total: f64 = counts.iter().sum();
    if total > 0.0 {
        for c in counts.iter_mut() {
            *c /= total;
        }
    }
    Array1::from_vec(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stump() -> TreeNode {
        TreeNode::Split {
            feature: 1,
            threshold: 0.5,
            left: Box::new(TreeNode::leaf(-1.0)),
            right: Box::new(TreeNode::leaf(2.0)),
        }
    }

    #[test]
    fn test_predict_routes_by_threshold() {
        let tree = stump();
        assert_eq!(tree.predict(array![9.0, 0.5].view()), -1.0);
        assert_eq!(tree.predict(array![9.0, 0.6].view()), 2.0);
    }

    #[test]
    fn test_nan_goes_right() {
        assert_eq!(stump().predict(array![0.0, f64::NAN].view()), 2.0);
    }

    #[test]
    fn test_scaled_and_shape() {
        let tree = stump().scaled(0.1);
        assert!((tree.predict(array![0.0, 1.0].view()) - 0.2).abs() < 1e-12);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_importances_normalized() {
        let imp = split_count_importances(&[stump(), stump(), TreeNode::leaf(0.0)], 3);
        assert_eq!(imp.to_vec(), vec![0.0, 1.0, 0.0]);
    }
}
