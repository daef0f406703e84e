//! Gradient-boosted tree training
//!
//! Provides the two booster families used by the pipeline:
//! - XGBoost-style: depth-wise growth, exact or histogram split finding
//! - LightGBM-style: leaf-wise growth, histogram split finding, optional GOSS
//!
//! Both share the same tree representation and boosting loop, so a fitted
//! model always exposes a [`TreeEnsemble`] for export.

mod booster;
mod metrics;
mod model;
mod objective;
mod splitter;
mod tree;
pub mod lightgbm;
pub mod xgboost;

pub use booster::{EvalHistory, EvalSet, TreeEnsemble};
pub use lightgbm::{BoostingType, LightGBMClassifier, LightGBMConfig, LightGBMRegressor};
pub use metrics::ModelMetrics;
pub use model::{ModelSpec, TaskKind, TrainedModel};
pub use objective::{sigmoid, Objective};
pub use tree::{split_count_importances, TreeNode};
pub use xgboost::{TreeMethod, XGBoostClassifier, XGBoostConfig, XGBoostRegressor};
