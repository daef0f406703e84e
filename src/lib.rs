//! Gazolive ML - gradient-boosted tree pipelines for biogas plant data
//!
//! This crate trains XGBoost- and LightGBM-style boosters on tabular CSV
//! data, optionally tunes them, and exports the result as a standard ONNX
//! tree-ensemble graph that is checked against the in-memory model.
//!
//! # Modules
//!
//! - [`data`] - CSV loading, one-hot encoding, train/test splitting
//! - [`training`] - Booster families, objectives, metrics
//! - [`optimizer`] - Hyperparameter search (random, TPE)
//! - [`export`] - ONNX export, loading and verification
//! - [`pipeline`] - Configured end-to-end runs and presets
//! - [`device`] - Hardware detection for accelerator settings
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core ML modules
pub mod data;
pub mod training;
pub mod optimizer;
pub mod export;

// Orchestration
pub mod pipeline;
pub mod device;

// Services
pub mod cli;

pub use error::{PipelineError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{PipelineError, Result};

    // Data
    pub use crate::data::{DataConfig, DataLoader, Dataset, FeatureSchema, SplitConfig};

    // Training
    pub use crate::training::{
        LightGBMConfig, ModelMetrics, ModelSpec, TaskKind, TrainedModel, TreeEnsemble, TreeMethod,
        XGBoostConfig,
    };

    // Optimization
    pub use crate::optimizer::{HyperOptX, OptimizationConfig, SamplerType, SearchSpace, Study, TrialParams};

    // Export
    pub use crate::export::{verify_export, OnnxExporter, OnnxRuntime, VerificationReport};

    // Pipeline
    pub use crate::pipeline::{run_pipeline, PipelineConfig, PipelineReport, PipelineRunner, Preset};

    // Device
    pub use crate::device::DeviceCapabilities;
}
