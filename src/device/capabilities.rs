//! Hardware detection used to resolve accelerator-dependent settings.
//!
//! CPU and memory come from `sysinfo`; a CUDA device is detected through the
//! NVIDIA kernel driver and the `CUDA_VISIBLE_DEVICES` mask.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use sysinfo::System;

const NVIDIA_DRIVER_VERSION: &str = "/proc/driver/nvidia/version";
const NVIDIA_GPU_DIR: &str = "/proc/driver/nvidia/gpus";

/// CPU information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub brand: String,
    pub cores: usize,
    pub threads: usize,
    pub frequency_mhz: u64,
    pub has_avx2: bool,
    pub has_neon: bool,
}

/// System memory information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// A CUDA-capable device visible to this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Driver version string, e.g. `535.104.05`
    pub driver_version: String,
    /// Number of GPUs the driver reports, when known
    pub count: Option<usize>,
}

/// Detected hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub environment: String,
    pub gpu: Option<GpuDevice>,
}

impl DeviceCapabilities {
    /// Probe the running machine.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let nvidia = fs::read_to_string(NVIDIA_DRIVER_VERSION).ok();
        let visible = std::env::var("CUDA_VISIBLE_DEVICES").ok();
        let gpu = probe_gpu(nvidia.as_deref(), visible.as_deref()).map(|mut device| {
            device.count = count_driver_gpus(Path::new(NVIDIA_GPU_DIR));
            device
        });

        Self {
            cpu: detect_cpu(&sys),
            memory: MemoryInfo {
                total_bytes: sys.total_memory(),
                available_bytes: sys.available_memory(),
            },
            environment: detect_environment(),
            gpu,
        }
    }

    /// CPU-only capabilities, for callers that must not touch the hardware
    pub fn cpu_only() -> Self {
        Self {
            cpu: CpuInfo {
                brand: String::new(),
                cores: 1,
                threads: 1,
                frequency_mhz: 0,
                has_avx2: false,
                has_neon: false,
            },
            memory: MemoryInfo { total_bytes: 0, available_bytes: 0 },
            environment: "unknown".to_string(),
            gpu: None,
        }
    }

    pub fn with_gpu(mut self, gpu: GpuDevice) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    /// Worker threads available to rayon
    pub fn worker_threads(&self) -> usize {
        rayon::current_num_threads().min(self.cpu.threads.max(1))
    }
}

fn detect_cpu(sys: &System) -> CpuInfo {
    let cpus = sys.cpus();
    let cores = sys.physical_core_count().unwrap_or(1);
    CpuInfo {
        brand: cpus.first().map(|c| c.brand().trim().to_string()).unwrap_or_default(),
        cores,
        threads: cpus.len().max(1),
        frequency_mhz: cpus.first().map_or(0, |c| c.frequency()),
        has_avx2: cfg!(target_feature = "avx2"),
        has_neon: cfg!(target_arch = "aarch64"),
    }
}

/// Decide whether a CUDA device is usable from the driver banner and the
/// `CUDA_VISIBLE_DEVICES` mask. An empty mask or `-1` hides every device.
pub fn probe_gpu(driver_banner: Option<&str>, visible_devices: Option<&str>) -> Option<GpuDevice> {
    if let Some(mask) = visible_devices {
        let mask = mask.trim();
        if mask.is_empty() || mask == "-1" || mask.eq_ignore_ascii_case("none") {
            return None;
        }
    }

    let banner = driver_banner?;
    // "NVRM version: NVIDIA UNIX x86_64 Kernel Module  535.104.05  Sat Aug 19 ..."
    let driver_version = banner
        .lines()
        .next()?
        .split_whitespace()
        .find(|tok| tok.contains('.') && tok.chars().all(|c| c.is_ascii_digit() || c == '.'))?
        .to_string();

    Some(GpuDevice { driver_version, count: None })
}

fn count_driver_gpus(dir: &Path) -> Option<usize> {
    fs::read_dir(dir).ok().map(|entries| entries.filter_map(|e| e.ok()).count())
}

/// Detect the runtime environment (docker, vm, bare-metal).
pub fn detect_environment() -> String {
    if Path::new("/.dockerenv").exists() {
        return "docker".to_string();
    }
    if let Ok(cgroup) = fs::read_to_string("/proc/1/cgroup") {
        if cgroup.contains("docker") || cgroup.contains("kubepods") {
            return "docker".to_string();
        }
    }

    if let Ok(product) = fs::read_to_string("/sys/class/dmi/id/product_name") {
        let lower = product.to_lowercase();
        if ["virtualbox", "vmware", "kvm", "qemu", "hyper-v", "xen"]
            .iter()
            .any(|vm| lower.contains(vm))
        {
            return "vm".to_string();
        }
    }

    "bare-metal".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANNER: &str = "NVRM version: NVIDIA UNIX x86_64 Kernel Module  535.104.05  Sat Aug 19 01:15:15 UTC 2023\nGCC version:  gcc version 12.2.0";

    #[test]
    fn test_detect() {
        let caps = DeviceCapabilities::detect();
        assert!(caps.cpu.cores >= 1);
        assert!(caps.cpu.threads >= 1);
        assert!(caps.worker_threads() >= 1);
        assert!(!caps.environment.is_empty());
    }

    #[test]
    fn test_probe_gpu_reads_driver_version() {
        let gpu = probe_gpu(Some(BANNER), None).unwrap();
        assert_eq!(gpu.driver_version, "535.104.05");
        assert!(probe_gpu(Some(BANNER), Some("0,1")).is_some());
    }

    #[test]
    fn test_probe_gpu_respects_mask() {
        assert!(probe_gpu(Some(BANNER), Some("")).is_none());
        assert!(probe_gpu(Some(BANNER), Some("-1")).is_none());
        assert!(probe_gpu(None, Some("0")).is_none());
        assert!(probe_gpu(Some("garbage"), None).is_none());
    }

    #[test]
    fn test_cpu_only() {
        let caps = DeviceCapabilities::cpu_only();
        assert!(!caps.has_gpu());
        let caps = caps.with_gpu(GpuDevice { driver_version: "1.0".into(), count: Some(1) });
        assert!(caps.has_gpu());
    }
}
