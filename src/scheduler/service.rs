//! The scheduler thread.
//!
//! Owns the [`Coordinator`] and interleaves submissions with completion
//! polling. The inbox receive timeout is the monitor's adaptive wait, so a
//! new job is picked up immediately instead of after the current sleep.

use super::coordinator::Coordinator;
use super::job::Job;
use super::metrics::{MetricsSnapshot, SharedMetrics};
use super::monitor::next_delay;
use crate::error::{Result, TranspoolError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum Command {
    Submit(Job),
    /// Signal once nothing is pending.
    Flush(Sender<()>),
    Shutdown,
}

/// Handle to a running scheduler thread.
pub struct SchedulerHandle {
    tx: Sender<Command>,
    metrics: Arc<SharedMetrics>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Move the coordinator onto its own thread and start the loop.
    pub fn start(coordinator: Coordinator, metrics: Arc<SharedMetrics>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let loop_metrics = Arc::clone(&metrics);

        let thread = std::thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || scheduler_loop(coordinator, rx, &loop_metrics))
            .map_err(|e| {
                TranspoolError::Worker(format!("Failed to spawn scheduler thread: {}", e))
            })?;

        Ok(Self {
            tx,
            metrics,
            thread: Some(thread),
        })
    }

    /// Hand a job to the scheduler. The reply arrives on the job's handle.
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx
            .send(Command::Submit(job))
            .map_err(|_| TranspoolError::SchedulerStopped)
    }

    /// A cloneable handle that can only submit, for other threads.
    pub fn submitter(&self) -> Submitter {
        Submitter {
            tx: self.tx.clone(),
        }
    }

    /// Wait until every job submitted so far has been answered.
    ///
    /// Returns `false` if `timeout` passed first.
    pub fn drain(&self, timeout: Duration) -> Result<bool> {
        let (done_tx, done_rx) = bounded(1);
        self.tx
            .send(Command::Flush(done_tx))
            .map_err(|_| TranspoolError::SchedulerStopped)?;
        match done_rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(TranspoolError::SchedulerStopped),
        }
    }

    /// Latest published metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the scheduler thread is still running.
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop, stop every worker and wait for the thread.
    pub fn shutdown(&mut self) -> Result<()> {
        let _ = self.tx.send(Command::Shutdown);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| TranspoolError::Worker("scheduler thread panicked".into())),
            None => Ok(()),
        }
    }
}

/// Submit-only handle to the scheduler thread.
#[derive(Clone)]
pub struct Submitter {
    tx: Sender<Command>,
}

impl Submitter {
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx
            .send(Command::Submit(job))
            .map_err(|_| TranspoolError::SchedulerStopped)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn scheduler_loop(mut coordinator: Coordinator, rx: Receiver<Command>, metrics: &SharedMetrics) {
    tracing::debug!("Scheduler loop started");
    let mut waiters: Vec<Sender<()>> = Vec::new();
    let mut delay = next_delay(false, 0);

    'run: loop {
        let mut processed = 0;

        let first = match rx.recv_timeout(delay) {
            Ok(cmd) => Some(cmd),
            Err(RecvTimeoutError::Timeout) => None,
            // Every handle is gone: nobody can submit or read replies
            Err(RecvTimeoutError::Disconnected) => break 'run,
        };

        let mut next = first;
        while let Some(cmd) = next {
            match cmd {
                Command::Submit(job) => {
                    coordinator.submit(job);
                    processed += 1;
                }
                Command::Flush(done) => waiters.push(done),
                Command::Shutdown => break 'run,
            }
            next = match rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break 'run,
            };
        }

        processed += coordinator.poll_completions();
        processed += coordinator.reap_expired(Instant::now());

        metrics.publish(&coordinator.metrics());
        if coordinator.pending_count() == 0 {
            for done in waiters.drain(..) {
                let _ = done.send(());
            }
        }

        delay = next_delay(coordinator.queue_count() > 0, processed);
    }

    coordinator.shutdown();
    metrics.publish(&coordinator.metrics());
    tracing::debug!("Scheduler loop stopped");
}
