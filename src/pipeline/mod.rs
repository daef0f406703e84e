//! End-to-end training pipeline
//!
//! A [`PipelineConfig`] describes one run: where the data lives, how to
//! split it, which booster to fit, whether to tune it first, and where the
//! ONNX artifact goes. [`PipelineRunner`] executes it and returns a
//! [`PipelineReport`].
//!
//! # Example
//!
//! ```no_run
//! use gazolive_ml::pipeline::{run_pipeline, PipelineConfig, Preset};
//!
//! let config = PipelineConfig::preset(Preset::Biogas, "biogas_data.csv", None)?;
//! let report = run_pipeline(&config)?;
//! println!("r2 = {:?}", report.metrics.r2);
//! # Ok::<(), gazolive_ml::error::PipelineError>(())
//! ```

mod config;
mod runner;

pub use config::{ExportConfig, PipelineConfig, Preset, SearchConfig};
pub use runner::{run_pipeline, PipelineReport, PipelineRun, PipelineRunner, SearchSummary};
