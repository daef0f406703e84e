//! Hyperparameter optimization module (HyperOptX)
//!
//! Sequential black-box search over a declared parameter space:
//! - Random search
//! - Tree-structured Parzen Estimators (TPE)
//!
//! Trials run one at a time. A trial whose objective fails is recorded with
//! the worst possible score instead of aborting the search.

mod config;
mod search_space;
mod optimizer;
mod samplers;

pub use config::{OptimizationConfig, OptimizeDirection};
pub use search_space::{SearchSpace, Parameter, ParameterType, TrialParams, ParameterValue};
pub use optimizer::{HyperOptX, Study, TrialResult};
pub use samplers::{Sampler, SamplerType, RandomSampler, TpeSampler, create_sampler};
