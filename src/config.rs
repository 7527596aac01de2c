//! Scheduler configuration.
//!
//! Everything here is read once at startup. There is no live reload: the
//! coordinator copies what it needs when it is constructed.

use crate::error::{Result, TranspoolError};
use std::time::Duration;

/// Maximum per-core CPU utilization (percent) a queue may run at and still
/// receive new work.
pub const DEFAULT_MAX_CPU_PERCENT: f64 = 85.0;

/// System memory utilization (percent) at or above which submissions are
/// rejected as overloaded.
pub const DEFAULT_MAX_RAM_PERCENT: f64 = 85.0;

/// Number of completion latencies kept for the rolling mean.
pub const DEFAULT_LATENCY_WINDOW: usize = 10;

/// In-flight jobs a single queue accepts before it counts as full.
pub const DEFAULT_QUEUE_CAPACITY: u32 = 10;

/// Grace period before the health supervisor starts checking the scheduler.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(25);

/// Interval between health checks of the scheduler thread.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between CPU/RAM samples published to the metrics.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(500);

/// Sleep between polls when a worker's inbound channel is empty.
pub const DEFAULT_WORKER_IDLE: Duration = Duration::from_millis(100);

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Per-core CPU ceiling for dispatching onto a queue.
    pub max_cpu_percent: f64,
    /// System memory ceiling for admitting new jobs.
    pub max_ram_percent: f64,
    /// Latency window size.
    pub latency_window: usize,
    /// Per-queue in-flight capacity.
    pub queue_capacity: u32,
    /// Number of cores available for queues. `None` uses the probe's count.
    pub cores: Option<usize>,
    /// Optional per-job deadline. `None` disables reaping.
    pub job_timeout: Option<Duration>,
    pub startup_delay: Duration,
    pub health_check_interval: Duration,
    pub stats_interval: Duration,
    pub worker_idle: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            max_ram_percent: DEFAULT_MAX_RAM_PERCENT,
            latency_window: DEFAULT_LATENCY_WINDOW,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cores: None,
            job_timeout: None,
            startup_delay: DEFAULT_STARTUP_DELAY,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
            worker_idle: DEFAULT_WORKER_IDLE,
        }
    }
}

impl SchedulerConfig {
    /// Set the number of cores queues may be pinned to.
    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = Some(cores);
        self
    }

    /// Set the per-queue capacity.
    pub fn with_queue_capacity(mut self, capacity: u32) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the admission thresholds.
    pub fn with_thresholds(mut self, max_cpu_percent: f64, max_ram_percent: f64) -> Self {
        self.max_cpu_percent = max_cpu_percent;
        self.max_ram_percent = max_ram_percent;
        self
    }

    /// Set the latency window size.
    pub fn with_latency_window(mut self, size: usize) -> Self {
        self.latency_window = size;
        self
    }

    /// Enable per-job deadlines.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Check that every value is usable.
    ///
    /// An invalid configuration is the one condition allowed to stop the
    /// process, so this returns the first problem found instead of clamping.
    pub fn validate(&self) -> Result<()> {
        check_percent("max_cpu_percent", self.max_cpu_percent)?;
        check_percent("max_ram_percent", self.max_ram_percent)?;

        if self.latency_window == 0 {
            return Err(TranspoolError::Config(
                "latency_window must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(TranspoolError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.cores == Some(0) {
            return Err(TranspoolError::Config("cores must be at least 1".into()));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(TranspoolError::Config(
                "job_timeout must be greater than zero".into(),
            ));
        }
        if self.health_check_interval.is_zero() || self.stats_interval.is_zero() {
            return Err(TranspoolError::Config(
                "health_check_interval and stats_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn check_percent(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 100.0 {
        Ok(())
    } else {
        Err(TranspoolError::Config(format!(
            "{} must be in (0, 100], got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.latency_window, 10);
        assert_eq!(config.max_cpu_percent, 85.0);
        assert_eq!(config.max_ram_percent, 85.0);
        assert!(config.cores.is_none());
        assert!(config.job_timeout.is_none());
    }

    #[test]
    fn test_rejects_out_of_range_percent() {
        for bad in [0.0, -1.0, 100.5, f64::NAN] {
            let config = SchedulerConfig::default().with_thresholds(bad, 85.0);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("max_cpu_percent"));
        }
        let config = SchedulerConfig::default().with_thresholds(85.0, 101.0);
        assert!(config.validate().unwrap_err().to_string().contains("max_ram_percent"));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(SchedulerConfig::default().with_latency_window(0).validate().is_err());
        assert!(SchedulerConfig::default().with_queue_capacity(0).validate().is_err());
        assert!(SchedulerConfig::default().with_cores(0).validate().is_err());
        assert!(
            SchedulerConfig::default()
                .with_job_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::default()
            .with_cores(2)
            .with_queue_capacity(3)
            .with_thresholds(70.0, 50.0)
            .with_job_timeout(Duration::from_secs(30));
        assert_eq!(config.cores, Some(2));
        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.max_cpu_percent, 70.0);
        assert_eq!(config.max_ram_percent, 50.0);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }
}
