//! Scheduler metrics.
//!
//! The coordinator keeps plain counters on its own thread and publishes a
//! [`MetricsSnapshot`] into [`SharedMetrics`] after every pass. A
//! [`StatsPoller`] thread adds CPU and RAM readings to the same store.

use crate::error::{Result, TranspoolError};
use crate::probe::ResourceProbe;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Event counters owned by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub completed: u64,
    pub rejected_overloaded: u64,
    pub rejected_busy: u64,
    pub dispatch_failures: u64,
    /// Tasks resolved with a failure notice because their queue broke.
    pub orphaned: u64,
    pub timed_out: u64,
    /// Probe failures, missing core samples, spawn failures, garbled messages.
    pub degraded_checks: u64,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_count: usize,
    /// Sum of every queue's in-flight count.
    pub active_jobs: u64,
    pub pending_tasks: usize,
    /// Rolling mean completion latency.
    pub avg_latency_secs: Option<f64>,
    pub completed: u64,
    pub rejected_overloaded: u64,
    pub rejected_busy: u64,
    pub dispatch_failures: u64,
    pub orphaned: u64,
    pub timed_out: u64,
    pub degraded_checks: u64,
    pub cpu_percent: Option<f64>,
    pub ram_percent: Option<f64>,
}

/// Lock-free metrics store shared between threads.
///
/// Floats are stored as their bit patterns; NaN stands for "no value".
#[derive(Debug)]
pub struct SharedMetrics {
    queue_count: AtomicU64,
    active_jobs: AtomicU64,
    pending_tasks: AtomicU64,
    avg_latency_bits: AtomicU64,
    completed: AtomicU64,
    rejected_overloaded: AtomicU64,
    rejected_busy: AtomicU64,
    dispatch_failures: AtomicU64,
    orphaned: AtomicU64,
    timed_out: AtomicU64,
    degraded_checks: AtomicU64,
    cpu_bits: AtomicU64,
    ram_bits: AtomicU64,
}

fn store_opt(cell: &AtomicU64, value: Option<f64>) {
    cell.store(value.unwrap_or(f64::NAN).to_bits(), Ordering::Relaxed);
}

fn load_opt(cell: &AtomicU64) -> Option<f64> {
    let value = f64::from_bits(cell.load(Ordering::Relaxed));
    (!value.is_nan()).then_some(value)
}

impl Default for SharedMetrics {
    fn default() -> Self {
        let none = f64::NAN.to_bits();
        Self {
            queue_count: AtomicU64::new(0),
            active_jobs: AtomicU64::new(0),
            pending_tasks: AtomicU64::new(0),
            avg_latency_bits: AtomicU64::new(none),
            completed: AtomicU64::new(0),
            rejected_overloaded: AtomicU64::new(0),
            rejected_busy: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            orphaned: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            degraded_checks: AtomicU64::new(0),
            cpu_bits: AtomicU64::new(none),
            ram_bits: AtomicU64::new(none),
        }
    }
}

impl SharedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the coordinator's view. Resource readings are left alone.
    pub fn publish(&self, snapshot: &MetricsSnapshot) {
        self.queue_count
            .store(snapshot.queue_count as u64, Ordering::Relaxed);
        self.active_jobs.store(snapshot.active_jobs, Ordering::Relaxed);
        self.pending_tasks
            .store(snapshot.pending_tasks as u64, Ordering::Relaxed);
        store_opt(&self.avg_latency_bits, snapshot.avg_latency_secs);
        self.completed.store(snapshot.completed, Ordering::Relaxed);
        self.rejected_overloaded
            .store(snapshot.rejected_overloaded, Ordering::Relaxed);
        self.rejected_busy
            .store(snapshot.rejected_busy, Ordering::Relaxed);
        self.dispatch_failures
            .store(snapshot.dispatch_failures, Ordering::Relaxed);
        self.orphaned.store(snapshot.orphaned, Ordering::Relaxed);
        self.timed_out.store(snapshot.timed_out, Ordering::Relaxed);
        self.degraded_checks
            .store(snapshot.degraded_checks, Ordering::Relaxed);
    }

    /// Store the latest CPU and RAM readings.
    pub fn record_resources(&self, cpu_percent: Option<f64>, ram_percent: Option<f64>) {
        store_opt(&self.cpu_bits, cpu_percent);
        store_opt(&self.ram_bits, ram_percent);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_count: self.queue_count.load(Ordering::Relaxed) as usize,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            pending_tasks: self.pending_tasks.load(Ordering::Relaxed) as usize,
            avg_latency_secs: load_opt(&self.avg_latency_bits),
            completed: self.completed.load(Ordering::Relaxed),
            rejected_overloaded: self.rejected_overloaded.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            degraded_checks: self.degraded_checks.load(Ordering::Relaxed),
            cpu_percent: load_opt(&self.cpu_bits),
            ram_percent: load_opt(&self.ram_bits),
        }
    }
}

/// Longest single sleep of the poller, so shutdown is not held up.
const POLLER_TICK: Duration = Duration::from_millis(50);

/// Background thread sampling CPU and RAM into [`SharedMetrics`].
pub struct StatsPoller {
    /// Flag to stop the poller thread.
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StatsPoller {
    /// Start sampling every `interval`.
    pub fn start(
        probe: Arc<dyn ResourceProbe>,
        metrics: Arc<SharedMetrics>,
        interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("stats-poller".to_string())
            .spawn(move || poller_loop(probe.as_ref(), &metrics, interval, &shutdown_clone))
            .map_err(|e| TranspoolError::Worker(format!("Failed to spawn stats poller: {}", e)))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poller_loop(
    probe: &dyn ResourceProbe,
    metrics: &SharedMetrics,
    interval: Duration,
    shutdown: &AtomicBool,
) {
    tracing::debug!(interval_ms = interval.as_millis() as u64, "Stats poller started");

    while !shutdown.load(Ordering::Relaxed) {
        let cpu = probe
            .overall_cpu()
            .inspect_err(|e| tracing::debug!(error = %e, "CPU sample failed"))
            .ok();
        let ram = probe
            .memory_percent()
            .inspect_err(|e| tracing::debug!(error = %e, "Memory sample failed"))
            .ok();
        metrics.record_resources(cpu, ram);

        let current = metrics.snapshot();
        tracing::debug!(
            cpu_percent = ?cpu,
            ram_percent = ?ram,
            queues = current.queue_count,
            active_jobs = current.active_jobs,
            avg_latency_secs = ?current.avg_latency_secs,
            "Stats"
        );

        let wake = Instant::now() + interval;
        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= wake {
                break;
            }
            thread::sleep((wake - now).min(POLLER_TICK));
        }
    }

    tracing::debug!("Stats poller stopped");
}
