//! Model export
//!
//! Provides functionality to export fitted boosters to binary ONNX and to
//! check an exported file against the model it came from:
//! - `proto`: the ONNX protobuf messages
//! - `OnnxExporter`: tree ensemble → `ModelProto`
//! - `OnnxRuntime`: decode, validate and evaluate an exported graph
//! - `verify_export`: held-out metric comparison

pub mod proto;
mod onnx;
mod runtime;
mod verify;

pub use onnx::{OnnxConfig, OnnxExporter, INPUT_NAME, LABEL_OUTPUT, PROBABILITY_OUTPUT, REGRESSOR_OUTPUT};
pub use runtime::{EnsembleKind, OnnxOutput, OnnxRuntime, OnnxSummary};
pub use verify::{verify_export, VerificationReport, DEFAULT_TOLERANCE, MIN_LABEL_AGREEMENT};
