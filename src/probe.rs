//! System resource probing for admission control.
//!
//! Every call re-measures; nothing is cached. CPU readings need two samples
//! separated by a short blocking window, so [`ResourceProbe::per_core_cpu`]
//! and [`ResourceProbe::overall_cpu`] block for [`SystemProbe::window`].

use crate::error::{Result, TranspoolError};
use serde::Serialize;
use std::time::Duration;
use sysinfo::System;

/// Source of live utilization readings.
///
/// The coordinator only ever talks to this trait, which is what lets tests
/// simulate an overloaded host.
pub trait ResourceProbe: Send + Sync {
    /// System memory utilization in percent (0-100).
    fn memory_percent(&self) -> Result<f64>;

    /// Per-core CPU utilization in percent, indexed by core id.
    fn per_core_cpu(&self) -> Result<Vec<f64>>;

    /// Overall CPU utilization in percent.
    fn overall_cpu(&self) -> Result<f64>;

    /// Number of cores queues may be pinned to.
    fn total_cores(&self) -> usize;

    /// Take every reading at once.
    fn snapshot(&self) -> Result<ResourceSnapshot> {
        let per_core = self.per_core_cpu()?;
        let cpu_percent = if per_core.is_empty() {
            self.overall_cpu()?
        } else {
            per_core.iter().sum::<f64>() / per_core.len() as f64
        };
        Ok(ResourceSnapshot {
            memory_percent: self.memory_percent()?,
            cpu_percent,
            per_core,
            total_cores: self.total_cores(),
        })
    }
}

/// One set of readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub per_core: Vec<f64>,
    pub total_cores: usize,
}

/// Probe backed by `sysinfo`.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    window: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
    }
}

impl SystemProbe {
    /// Create a probe that samples CPU usage over `window`.
    ///
    /// Windows shorter than the platform minimum are raised to it, otherwise
    /// the second sample would report zero usage.
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    /// The CPU sampling window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn sampled_system(&self) -> System {
        let mut system = System::new();
        system.refresh_cpu_usage();
        std::thread::sleep(self.window);
        system.refresh_cpu_usage();
        system
    }
}

impl ResourceProbe for SystemProbe {
    fn memory_percent(&self) -> Result<f64> {
        let mut system = System::new();
        system.refresh_memory();
        memory_utilization(system.total_memory(), system.available_memory())
    }

    fn per_core_cpu(&self) -> Result<Vec<f64>> {
        let system = self.sampled_system();
        let usage: Vec<f64> = system
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()))
            .collect();
        if usage.is_empty() {
            return Err(TranspoolError::Probe("no CPUs reported".into()));
        }
        Ok(usage)
    }

    fn overall_cpu(&self) -> Result<f64> {
        let system = self.sampled_system();
        Ok(f64::from(system.global_cpu_usage()))
    }

    fn total_cores(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Percentage of memory in use, from total and available byte counts.
fn memory_utilization(total: u64, available: u64) -> Result<f64> {
    if total == 0 {
        return Err(TranspoolError::Probe("total memory reported as zero".into()));
    }
    let used = total.saturating_sub(available);
    Ok(used as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_utilization() {
        assert_eq!(memory_utilization(1000, 250).unwrap(), 75.0);
        assert_eq!(memory_utilization(1000, 1000).unwrap(), 0.0);
        // available larger than total must not underflow
        assert_eq!(memory_utilization(1000, 2000).unwrap(), 0.0);
        assert!(memory_utilization(0, 0).is_err());
    }

    #[test]
    fn test_window_is_raised_to_platform_minimum() {
        let probe = SystemProbe::new(Duration::from_millis(1));
        assert!(probe.window() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    }

    #[test]
    fn test_system_probe_readings_in_range() {
        let probe = SystemProbe::default();
        let memory = probe.memory_percent().unwrap();
        assert!((0.0..=100.0).contains(&memory));

        let per_core = probe.per_core_cpu().unwrap();
        assert!(!per_core.is_empty());
        assert!(probe.total_cores() >= 1);
    }

    #[test]
    fn test_snapshot_averages_cores() {
        struct Fixed;
        impl ResourceProbe for Fixed {
            fn memory_percent(&self) -> Result<f64> {
                Ok(40.0)
            }
            fn per_core_cpu(&self) -> Result<Vec<f64>> {
                Ok(vec![10.0, 30.0])
            }
            fn overall_cpu(&self) -> Result<f64> {
                unreachable!("per-core readings are available")
            }
            fn total_cores(&self) -> usize {
                2
            }
        }

        let snapshot = Fixed.snapshot().unwrap();
        assert_eq!(snapshot.cpu_percent, 20.0);
        assert_eq!(snapshot.memory_percent, 40.0);
        assert_eq!(snapshot.total_cores, 2);
    }
}
