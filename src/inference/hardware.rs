//! 硬件探测
//!
//! 一次性探测内存、CPU 与加速器，给出内存预算与粗粒度的能力等级；
//! 同时提供批处理调度所需的系统负载采样。

use crate::config::defaults::DEFAULT_MEMORY_FRACTION;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 硬件能力等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    /// 仅适合最小模型
    LowEnd,
    Medium,
    /// 有 GPU 且内存充足
    HighEnd,
}

impl CapabilityTier {
    /// 按内存与 GPU 判定等级
    pub fn classify(memory_gb: f64, has_gpu: bool) -> Self {
        if has_gpu && memory_gb >= 16.0 {
            CapabilityTier::HighEnd
        } else if memory_gb >= 8.0 {
            CapabilityTier::Medium
        } else {
            CapabilityTier::LowEnd
        }
    }
}

impl std::fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapabilityTier::LowEnd => "low_end",
            CapabilityTier::Medium => "medium",
            CapabilityTier::HighEnd => "high_end",
        };
        f.write_str(s)
    }
}

/// 硬件概况
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub total_memory_gb: f64,
    pub available_memory_gb: f64,
    pub cpu_count: usize,
    pub has_gpu: bool,
    pub tier: CapabilityTier,
    pub platform: String,
}

impl HardwareProfile {
    /// 由已知数值构造（测试或外部探测结果）
    pub fn from_parts(total_memory_gb: f64, cpu_count: usize, has_gpu: bool) -> Self {
        Self {
            total_memory_gb,
            available_memory_gb: total_memory_gb,
            cpu_count,
            has_gpu,
            tier: CapabilityTier::classify(total_memory_gb, has_gpu),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// 模型可用的内存预算（GB）
    ///
    /// 显式覆盖值优先，否则为总内存的 80%。
    pub fn memory_budget_gb(&self, override_gb: Option<f64>) -> f64 {
        override_gb.unwrap_or(self.total_memory_gb * DEFAULT_MEMORY_FRACTION)
    }
}

/// 硬件探测器
#[derive(Debug, Clone)]
pub struct HardwareProfiler {
    probe_gpu: bool,
}

impl HardwareProfiler {
    pub fn new() -> Self {
        Self { probe_gpu: true }
    }

    /// 跳过 `nvidia-smi` 探测
    pub fn without_gpu_probe() -> Self {
        Self { probe_gpu: false }
    }

    /// 执行一次探测
    pub fn detect(&self) -> HardwareProfile {
        let sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        let total_memory_gb = sys.total_memory() as f64 / BYTES_PER_GB;
        let available_memory_gb = sys.available_memory() as f64 / BYTES_PER_GB;
        let cpu_count = num_cpus::get();
        let has_gpu = self.probe_gpu && detect_nvidia_gpu();

        let profile = HardwareProfile {
            total_memory_gb,
            available_memory_gb,
            cpu_count,
            has_gpu,
            tier: CapabilityTier::classify(total_memory_gb, has_gpu),
            platform: std::env::consts::OS.to_string(),
        };

        tracing::info!(
            "Hardware capabilities: {} tier, {} CPUs, {:.1}GB RAM ({:.1}GB available), GPU: {}",
            profile.tier,
            profile.cpu_count,
            profile.total_memory_gb,
            profile.available_memory_gb,
            profile.has_gpu
        );

        profile
    }
}

impl Default for HardwareProfiler {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_nvidia_gpu() -> bool {
    match std::process::Command::new("nvidia-smi").output() {
        Ok(output) => output.status.success(),
        Err(e) => {
            tracing::debug!("nvidia-smi not available: {}", e);
            false
        }
    }
}

/// 系统负载读数（百分比）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// 系统负载来源
pub trait LoadMonitor: Send + Sync {
    fn sample(&self) -> LoadSample;
}

/// 基于 sysinfo 的负载采样
pub struct SystemLoadMonitor {
    system: Mutex<System>,
}

impl SystemLoadMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU 使用率需要两次刷新才有意义，先预热一次
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemLoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadMonitor for SystemLoadMonitor {
    fn sample(&self) -> LoadSample {
        let mut sys = self.system.lock();
        sys.refresh_cpu();
        sys.refresh_memory();

        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            sys.used_memory() as f64 / total as f64 * 100.0
        };

        LoadSample {
            cpu_percent: sys.global_cpu_info().cpu_usage() as f64,
            memory_percent,
        }
    }
}

/// 固定读数，用于测试与离线场景
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub LoadSample);

impl FixedLoad {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self(LoadSample {
            cpu_percent,
            memory_percent,
        })
    }
}

impl LoadMonitor for FixedLoad {
    fn sample(&self) -> LoadSample {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_classification() {
        assert_eq!(CapabilityTier::classify(32.0, true), CapabilityTier::HighEnd);
        assert_eq!(CapabilityTier::classify(32.0, false), CapabilityTier::Medium);
        assert_eq!(CapabilityTier::classify(8.0, false), CapabilityTier::Medium);
        assert_eq!(CapabilityTier::classify(4.0, true), CapabilityTier::LowEnd);
    }

    #[test]
    fn test_memory_budget() {
        let profile = HardwareProfile::from_parts(10.0, 4, false);
        assert!((profile.memory_budget_gb(None) - 8.0).abs() < 1e-9);
        assert_eq!(profile.memory_budget_gb(Some(2.5)), 2.5);
    }

    #[test]
    fn test_detect_produces_sane_values() {
        let profile = HardwareProfiler::without_gpu_probe().detect();
        assert!(profile.cpu_count >= 1);
        assert!(profile.total_memory_gb > 0.0);
        assert!(!profile.has_gpu);
    }

    #[test]
    fn test_system_load_in_range() {
        let monitor = SystemLoadMonitor::new();
        let sample = monitor.sample();
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
    }
}
