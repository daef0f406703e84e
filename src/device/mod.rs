//! Hardware detection.
//!
//! # Example
//! ```no_run
//! use gazolive_ml::device::DeviceCapabilities;
//!
//! let caps = DeviceCapabilities::detect();
//! println!("CPU threads: {}, CUDA: {}", caps.cpu.threads, caps.has_gpu());
//! ```
mod capabilities;

pub use capabilities::{detect_environment, probe_gpu, CpuInfo, DeviceCapabilities, GpuDevice, MemoryInfo};
