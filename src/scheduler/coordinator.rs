//! Admission control, queue management and task bookkeeping.
//!
//! The coordinator owns every queue and every pending task. It is driven
//! from a single thread (see [`super::service`]), so none of its tables are
//! locked.

use super::job::{Job, PendingTask, ReplyHandle, notices};
use super::metrics::{Counters, MetricsSnapshot};
use super::queue::{Queue, QueueInfo};
use crate::config::SchedulerConfig;
use crate::error::{Result, TranspoolError};
use crate::latency::LatencyWindow;
use crate::probe::ResourceProbe;
use crate::worker::{WorkRequest, WorkerSpawner};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happened to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Sent to a worker; the reply comes later.
    Dispatched { task_id: u64, queue_id: u64 },
    /// Rejected: memory at or above the ceiling.
    Overloaded,
    /// Rejected: no queue has room and no core is free.
    Busy,
    /// The chosen queue's channel broke while sending.
    DispatchFailed,
}

pub struct Coordinator {
    pub(super) config: SchedulerConfig,
    probe: Arc<dyn ResourceProbe>,
    spawner: Box<dyn WorkerSpawner>,
    /// Keyed by queue id, so iteration is creation order.
    pub(super) queues: BTreeMap<u64, Queue>,
    pub(super) pending: HashMap<u64, PendingTask>,
    next_task_id: u64,
    next_queue_id: u64,
    latency: LatencyWindow,
    total_cores: usize,
    pub(super) counters: Counters,
}

impl Coordinator {
    /// Validate the configuration and build an empty coordinator.
    ///
    /// No workers are started until the first job needs one.
    pub fn new(
        config: SchedulerConfig,
        probe: Arc<dyn ResourceProbe>,
        spawner: Box<dyn WorkerSpawner>,
    ) -> Result<Self> {
        config.validate()?;

        let detected = probe.total_cores().max(1);
        let total_cores = match config.cores {
            Some(cores) => {
                if cores > detected {
                    tracing::warn!(
                        configured = cores,
                        detected,
                        "More cores configured than detected; pinning may fail"
                    );
                }
                cores
            }
            None => detected,
        };

        tracing::info!(
            total_cores,
            queue_capacity = config.queue_capacity,
            max_cpu_percent = config.max_cpu_percent,
            max_ram_percent = config.max_ram_percent,
            "Coordinator ready"
        );

        Ok(Self {
            latency: LatencyWindow::new(config.latency_window),
            config,
            probe,
            spawner,
            queues: BTreeMap::new(),
            pending: HashMap::new(),
            next_task_id: 1,
            next_queue_id: 0,
            total_cores,
            counters: Counters::default(),
        })
    }

    /// Admit and dispatch a job, or answer it with a rejection notice.
    ///
    /// Every outcome other than [`Admission::Dispatched`] has already been
    /// replied to when this returns.
    pub fn submit(&mut self, job: Job) -> Admission {
        let (text, reply) = job.into_parts();

        match self.probe.memory_percent() {
            Ok(memory) if memory >= self.config.max_ram_percent => {
                self.counters.rejected_overloaded += 1;
                tracing::info!(
                    memory_percent = memory,
                    max_ram_percent = self.config.max_ram_percent,
                    "Rejecting job: memory overloaded"
                );
                notify(reply.as_ref(), notices::OVERLOADED);
                return Admission::Overloaded;
            }
            Ok(_) => {}
            Err(e) => {
                self.counters.degraded_checks += 1;
                tracing::warn!(error = %e, "Memory probe failed, admitting anyway");
            }
        }

        let Some(queue_id) = self.select_queue() else {
            self.counters.rejected_busy += 1;
            tracing::info!(
                queues = self.queues.len(),
                total_cores = self.total_cores,
                "Rejecting job: all queues busy"
            );
            notify(reply.as_ref(), notices::TOO_BUSY);
            return Admission::Busy;
        };

        let task_id = self.next_task_id;
        self.next_task_id += 1;
        self.pending.insert(
            task_id,
            PendingTask {
                task_id,
                reply,
                queue_id,
                submitted_at: Utc::now(),
                deadline: self.config.job_timeout.map(|t| Instant::now() + t),
            },
        );

        let request = WorkRequest::translate(task_id, text);
        let sent = match self.queues.get_mut(&queue_id) {
            Some(queue) => queue
                .channel
                .send(&request)
                .map(|()| queue.task_count += 1),
            None => Err(TranspoolError::Invariant(format!(
                "selected queue {} does not exist",
                queue_id
            ))),
        };

        match sent {
            Ok(()) => {
                tracing::debug!(task_id, queue_id, "Dispatched job");
                Admission::Dispatched { task_id, queue_id }
            }
            Err(e) => {
                self.counters.dispatch_failures += 1;
                tracing::warn!(task_id, queue_id, error = %e, "Dispatch failed, dropping queue");
                let task = self.pending.remove(&task_id);
                self.drop_queue(queue_id, "send failed");
                if let Some(task) = task {
                    notify(task.reply.as_ref(), notices::TRANSIENT_FAILURE);
                }
                Admission::DispatchFailed
            }
        }
    }

    /// Finalize a task with the worker's result.
    ///
    /// Unknown ids (already finalized, reaped or never issued) are ignored.
    pub fn complete(&mut self, task_id: u64, result: Option<String>, finished_at: DateTime<Utc>) {
        let Some(task) = self.pending.remove(&task_id) else {
            tracing::debug!(task_id, "Ignoring result for unknown task");
            return;
        };

        // Clock skew between processes can make this negative
        let elapsed = (finished_at - task.submitted_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let mean = self.latency.record(elapsed);

        let text = match result {
            Some(text) if !text.is_empty() => text,
            _ => notices::TRANSLATION_FAILED.to_string(),
        };
        notify(task.reply.as_ref(), &text);

        match self.queues.get_mut(&task.queue_id) {
            Some(queue) => queue.task_count = queue.task_count.saturating_sub(1),
            None => {
                self.counters.degraded_checks += 1;
                tracing::warn!(task_id, queue_id = task.queue_id, "Completed task has no queue");
            }
        }
        self.counters.completed += 1;

        tracing::debug!(
            task_id,
            queue_id = task.queue_id,
            elapsed_ms = elapsed.as_millis() as u64,
            avg_latency_ms = mean.as_millis() as u64,
            "Task complete"
        );

        self.collect_idle_queues();
    }

    /// Stop every worker and answer anything still pending.
    ///
    /// Best-effort: individual failures are logged.
    pub fn shutdown(&mut self) {
        let queues = std::mem::take(&mut self.queues);
        tracing::info!(
            queues = queues.len(),
            pending = self.pending.len(),
            "Shutting down coordinator"
        );

        for (_, task) in self.pending.drain() {
            self.counters.orphaned += 1;
            notify(task.reply.as_ref(), notices::TRANSIENT_FAILURE);
        }
        for (queue_id, queue) in queues {
            tracing::debug!(queue_id, pid = queue.worker_pid, "Stopping worker");
            queue.channel.close();
        }
    }

    /// Current values for the metrics store. Resource readings are left empty.
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_count: self.queues.len(),
            active_jobs: self.queues.values().map(|q| u64::from(q.task_count)).sum(),
            pending_tasks: self.pending.len(),
            avg_latency_secs: self.latency.mean().map(|d| d.as_secs_f64()),
            completed: self.counters.completed,
            rejected_overloaded: self.counters.rejected_overloaded,
            rejected_busy: self.counters.rejected_busy,
            dispatch_failures: self.counters.dispatch_failures,
            orphaned: self.counters.orphaned,
            timed_out: self.counters.timed_out,
            degraded_checks: self.counters.degraded_checks,
            cpu_percent: None,
            ram_percent: None,
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn total_cores(&self) -> usize {
        self.total_cores
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Live queues in creation order.
    pub fn queues(&self) -> Vec<QueueInfo> {
        self.queues.values().map(Queue::info).collect()
    }

    /// Check the bookkeeping invariants.
    ///
    /// Every queue's task count equals the pending tasks pointing at it,
    /// every pending task points at a live queue, and queues fit on distinct
    /// cores.
    pub fn verify_invariants(&self) -> Result<()> {
        if self.queues.len() > self.total_cores {
            return Err(TranspoolError::Invariant(format!(
                "{} queues for {} cores",
                self.queues.len(),
                self.total_cores
            )));
        }

        let mut per_queue: HashMap<u64, u32> = HashMap::new();
        for task in self.pending.values() {
            if !self.queues.contains_key(&task.queue_id) {
                return Err(TranspoolError::Invariant(format!(
                    "task {} points at missing queue {}",
                    task.task_id, task.queue_id
                )));
            }
            *per_queue.entry(task.queue_id).or_default() += 1;
        }

        let mut cores = BTreeSet::new();
        for queue in self.queues.values() {
            let pending = per_queue.get(&queue.queue_id).copied().unwrap_or(0);
            if pending != queue.task_count {
                return Err(TranspoolError::Invariant(format!(
                    "queue {} counts {} tasks but {} are pending",
                    queue.queue_id, queue.task_count, pending
                )));
            }
            if queue.core_id >= self.total_cores || !cores.insert(queue.core_id) {
                return Err(TranspoolError::Invariant(format!(
                    "queue {} has invalid or shared core {}",
                    queue.queue_id, queue.core_id
                )));
            }
        }
        Ok(())
    }

    /// First-fit over existing queues, then scale out onto a free core.
    fn select_queue(&mut self) -> Option<u64> {
        let usage = match self.probe.per_core_cpu() {
            Ok(usage) => Some(usage),
            Err(e) => {
                self.counters.degraded_checks += 1;
                tracing::warn!(error = %e, "Per-core CPU probe failed, treating queues as busy");
                None
            }
        };

        let max_cpu = self.config.max_cpu_percent;
        let capacity = self.config.queue_capacity;
        let mut missing_samples = 0u64;
        let chosen = self
            .queues
            .values()
            .find(|queue| {
                let core_usage = usage.as_ref().and_then(|u| u.get(queue.core_id).copied());
                let Some(core_usage) = core_usage else {
                    if usage.is_some() {
                        missing_samples += 1;
                    }
                    return false;
                };
                core_usage < max_cpu && queue.task_count < capacity
            })
            .map(|queue| queue.queue_id);

        if missing_samples > 0 {
            self.counters.degraded_checks += missing_samples;
            tracing::warn!(
                missing_samples,
                "No CPU sample for some queue cores, treating them as busy"
            );
        }

        chosen.or_else(|| self.open_queue())
    }

    /// Start a worker on the lowest unused core, if any is left.
    fn open_queue(&mut self) -> Option<u64> {
        if self.queues.len() >= self.total_cores {
            return None;
        }
        let used: BTreeSet<usize> = self.queues.values().map(|q| q.core_id).collect();
        let core_id = (0..self.total_cores).find(|core| !used.contains(core))?;

        let channel = match self.spawner.spawn(core_id) {
            Ok(channel) => channel,
            Err(e) => {
                self.counters.degraded_checks += 1;
                tracing::warn!(core_id, error = %e, "Failed to start worker");
                return None;
            }
        };

        let queue_id = self.next_queue_id;
        self.next_queue_id += 1;
        let queue = Queue::new(queue_id, core_id, channel);
        tracing::info!(queue_id, core_id, pid = queue.worker_pid, "Opened queue");
        self.queues.insert(queue_id, queue);
        Some(queue_id)
    }

    /// Remove a queue whose channel broke, failing every task still on it.
    pub(super) fn drop_queue(&mut self, queue_id: u64, reason: &str) {
        let Some(queue) = self.queues.remove(&queue_id) else {
            return;
        };

        let orphaned: Vec<u64> = self
            .pending
            .values()
            .filter(|task| task.queue_id == queue_id)
            .map(|task| task.task_id)
            .collect();

        tracing::warn!(
            queue_id,
            pid = queue.worker_pid,
            core_id = queue.core_id,
            orphaned = orphaned.len(),
            reason,
            "Dropping queue"
        );

        for task_id in orphaned {
            if let Some(task) = self.pending.remove(&task_id) {
                self.counters.orphaned += 1;
                notify(task.reply.as_ref(), notices::TRANSIENT_FAILURE);
            }
        }
        queue.channel.close();
    }

    /// Retire every idle queue except the oldest one.
    pub(super) fn collect_idle_queues(&mut self) {
        let idle: Vec<u64> = self
            .queues
            .values()
            .filter(|queue| queue.is_idle())
            .map(|queue| queue.queue_id)
            .skip(1)
            .collect();

        for queue_id in idle {
            if let Some(queue) = self.queues.remove(&queue_id) {
                tracing::info!(
                    queue_id,
                    pid = queue.worker_pid,
                    core_id = queue.core_id,
                    "Retiring idle queue"
                );
                queue.channel.close();
            }
        }
    }
}

/// Deliver a reply, logging instead of failing.
pub(super) fn notify(reply: &dyn ReplyHandle, text: &str) {
    if let Err(e) = reply.reply(text) {
        tracing::warn!(error = %e, "Failed to deliver reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::*;
    use crate::translate::Translator;
    use crate::worker::ThreadSpawner;

    fn config(cores: usize) -> SchedulerConfig {
        SchedulerConfig::default().with_cores(cores)
    }

    fn coordinator(config: SchedulerConfig, probe: FakeProbe, spawner: FakeSpawner) -> Coordinator {
        Coordinator::new(config, Arc::new(probe), Box::new(spawner)).unwrap()
    }

    fn dispatched(admission: Admission) -> (u64, u64) {
        match admission {
            Admission::Dispatched { task_id, queue_id } => (task_id, queue_id),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_with_one_core() {
        let translator = Arc::new(RecordingTranslator::default());
        let spawner = ThreadSpawner::new(translator.clone() as Arc<dyn Translator>, 10)
            .with_idle(Duration::from_millis(1));
        let mut coord =
            Coordinator::new(config(1), Arc::new(FakeProbe::idle(1)), Box::new(spawner)).unwrap();

        let reply = RecordingReply::default();
        let (_, queue_id) = dispatched(coord.submit(Job::new("Hallo", reply.clone())));
        assert_eq!(coord.queue_count(), 1);
        assert_eq!(coord.queues()[0].task_count, 1);
        coord.verify_invariants().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while coord.pending_count() > 0 && Instant::now() < deadline {
            coord.poll_completions();
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(reply.replies(), vec!["Hallo".to_string()]);
        assert_eq!(translator.calls(), vec!["Hallo".to_string()]);
        let queues = coord.queues();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].queue_id, queue_id);
        assert_eq!(queues[0].task_count, 0);
        assert!(queues[0].ready);
        coord.verify_invariants().unwrap();
        coord.shutdown();
    }

    #[test]
    fn test_dispatch_sends_translate_request() {
        let spawner = FakeSpawner::default();
        let workers = spawner.workers();
        let mut coord = coordinator(config(2), FakeProbe::idle(2), spawner);

        let (task_id, _) = dispatched(coord.submit(Job::new("Hallo", RecordingReply::default())));
        assert_eq!(workers.len(), 1);
        assert_eq!(
            workers.sent(0),
            vec![WorkRequest::Translate {
                id: task_id,
                text: "Hallo".into()
            }]
        );
    }

    #[test]
    fn test_memory_overload_rejects_without_state() {
        let probe = FakeProbe::idle(4).with_memory(90.0);
        let mut coord = coordinator(
            config(4).with_thresholds(85.0, 50.0),
            probe,
            FakeSpawner::default(),
        );

        let reply = RecordingReply::default();
        assert_eq!(coord.submit(Job::new("Hallo", reply.clone())), Admission::Overloaded);
        assert_eq!(reply.replies(), vec![notices::OVERLOADED.to_string()]);
        assert_eq!(coord.queue_count(), 0);
        assert_eq!(coord.pending_count(), 0);
        assert_eq!(coord.counters().rejected_overloaded, 1);
    }

    #[test]
    fn test_memory_at_threshold_is_overloaded() {
        let probe = FakeProbe::idle(1).with_memory(85.0);
        let mut coord = coordinator(config(1), probe, FakeSpawner::default());
        assert_eq!(
            coord.submit(Job::new("Hallo", RecordingReply::default())),
            Admission::Overloaded
        );
    }

    #[test]
    fn test_memory_probe_failure_fails_open() {
        let probe = FakeProbe::idle(1).with_memory_error();
        let mut coord = coordinator(config(1), probe, FakeSpawner::default());

        dispatched(coord.submit(Job::new("Hallo", RecordingReply::default())));
        assert_eq!(coord.counters().degraded_checks, 1);
    }

    #[test]
    fn test_broken_channel_at_dispatch_rolls_back() {
        let spawner = FakeSpawner::default().broken();
        let mut coord = coordinator(config(2), FakeProbe::idle(2), spawner);

        let reply = RecordingReply::default();
        assert_eq!(
            coord.submit(Job::new("Hallo", reply.clone())),
            Admission::DispatchFailed
        );
        assert_eq!(reply.replies(), vec![notices::TRANSIENT_FAILURE.to_string()]);
        assert_eq!(coord.pending_count(), 0);
        assert_eq!(coord.queue_count(), 0);
        assert_eq!(coord.counters().dispatch_failures, 1);
        coord.verify_invariants().unwrap();
    }

    #[test]
    fn test_never_more_queues_than_cores() {
        let mut coord = coordinator(
            config(2).with_queue_capacity(1),
            FakeProbe::idle(2),
            FakeSpawner::default(),
        );

        dispatched(coord.submit(Job::new("eins", RecordingReply::default())));
        dispatched(coord.submit(Job::new("zwei", RecordingReply::default())));

        let reply = RecordingReply::default();
        assert_eq!(coord.submit(Job::new("drei", reply.clone())), Admission::Busy);
        assert_eq!(reply.replies(), vec![notices::TOO_BUSY.to_string()]);
        assert_eq!(coord.queue_count(), 2);
        coord.verify_invariants().unwrap();
    }

    #[test]
    fn test_first_fit_skips_hot_cores() {
        let probe = FakeProbe::idle(2).with_per_core(vec![95.0, 10.0]);
        let mut coord = coordinator(config(2), probe, FakeSpawner::default());

        // No queues yet: the first one is created regardless of load
        let (_, first) = dispatched(coord.submit(Job::new("a", RecordingReply::default())));
        let (_, second) = dispatched(coord.submit(Job::new("b", RecordingReply::default())));
        let (_, third) = dispatched(coord.submit(Job::new("c", RecordingReply::default())));

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(third, 1);
        let cores: Vec<_> = coord.queues().iter().map(|q| q.core_id).collect();
        assert_eq!(cores, vec![0, 1]);
    }

    #[test]
    fn test_first_fit_prefers_oldest_queue_with_room() {
        let mut coord = coordinator(
            config(3).with_queue_capacity(2),
            FakeProbe::idle(3),
            FakeSpawner::default(),
        );

        let ids: Vec<u64> = (0..4)
            .map(|i| {
                let job = Job::new(format!("{i}"), RecordingReply::default());
                dispatched(coord.submit(job)).1
            })
            .collect();
        assert_eq!(ids, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_gc_keeps_lowest_idle_queue() {
        let mut coord = coordinator(
            config(3).with_queue_capacity(1),
            FakeProbe::idle(3),
            FakeSpawner::default(),
        );
        let (t0, _) = dispatched(coord.submit(Job::new("a", RecordingReply::default())));
        let (t1, _) = dispatched(coord.submit(Job::new("b", RecordingReply::default())));
        let (t2, _) = dispatched(coord.submit(Job::new("c", RecordingReply::default())));
        assert_eq!(coord.queue_count(), 3);

        // Queues 1 and 2 both idle: only queue 1 survives
        coord.complete(t1, Some("b".into()), Utc::now());
        assert_eq!(coord.queue_count(), 3);
        coord.complete(t2, Some("c".into()), Utc::now());
        let ids: Vec<_> = coord.queues().iter().map(|q| q.queue_id).collect();
        assert_eq!(ids, vec![0, 1]);

        // Now queues 0 and 1 are idle: queue 0 survives
        coord.complete(t0, Some("a".into()), Utc::now());
        let ids: Vec<_> = coord.queues().iter().map(|q| q.queue_id).collect();
        assert_eq!(ids, vec![0]);
        coord.verify_invariants().unwrap();
    }

    #[test]
    fn test_retired_core_is_reused_but_queue_id_is_not() {
        let spawner = FakeSpawner::default();
        let workers = spawner.workers();
        let mut coord = coordinator(config(2).with_queue_capacity(1), FakeProbe::idle(2), spawner);

        let (t0, _) = dispatched(coord.submit(Job::new("a", RecordingReply::default())));
        let (t1, _) = dispatched(coord.submit(Job::new("b", RecordingReply::default())));
        coord.complete(t1, Some("b".into()), Utc::now());
        coord.complete(t0, Some("a".into()), Utc::now());
        assert_eq!(coord.queue_count(), 1);
        assert!(workers.closed(1));

        dispatched(coord.submit(Job::new("c", RecordingReply::default())));
        let (_, queue_id) = dispatched(coord.submit(Job::new("d", RecordingReply::default())));
        assert_eq!(queue_id, 2);
        let info = coord.queues();
        assert_eq!(info[1].core_id, 1);
    }

    #[test]
    fn test_task_ids_unique_and_monotonic() {
        let probe = FakeProbe::idle(2);
        let mut coord =
            coordinator(config(2).with_queue_capacity(3), probe, FakeSpawner::default());

        let mut ids = Vec::new();
        for i in 0..10 {
            if let Admission::Dispatched { task_id, .. } =
                coord.submit(Job::new(format!("{i}"), RecordingReply::default()))
            {
                ids.push(task_id);
            }
            if i % 3 == 0
                && let Some(&last) = ids.last()
            {
                coord.complete(last, Some("x".into()), Utc::now());
            }
            coord.verify_invariants().unwrap();
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_failed_result_gets_placeholder() {
        let mut coord = coordinator(config(1), FakeProbe::idle(1), FakeSpawner::default());
        let none = RecordingReply::default();
        let empty = RecordingReply::default();
        let (t0, _) = dispatched(coord.submit(Job::new("a", none.clone())));
        let (t1, _) = dispatched(coord.submit(Job::new("b", empty.clone())));

        coord.complete(t0, None, Utc::now());
        coord.complete(t1, Some(String::new()), Utc::now());
        assert_eq!(none.replies(), vec![notices::TRANSLATION_FAILED.to_string()]);
        assert_eq!(empty.replies(), vec![notices::TRANSLATION_FAILED.to_string()]);
    }

    #[test]
    fn test_unknown_and_duplicate_completions_are_ignored() {
        let mut coord = coordinator(config(1), FakeProbe::idle(1), FakeSpawner::default());
        let reply = RecordingReply::default();
        let (task_id, _) = dispatched(coord.submit(Job::new("a", reply.clone())));

        coord.complete(999, Some("?".into()), Utc::now());
        coord.complete(task_id, Some("A".into()), Utc::now());
        coord.complete(task_id, Some("A".into()), Utc::now());

        assert_eq!(reply.replies(), vec!["A".to_string()]);
        assert_eq!(coord.counters().completed, 1);
        coord.verify_invariants().unwrap();
    }

    #[test]
    fn test_negative_latency_clamps_to_zero() {
        let mut coord = coordinator(config(1), FakeProbe::idle(1), FakeSpawner::default());
        let (task_id, _) = dispatched(coord.submit(Job::new("a", RecordingReply::default())));

        coord.complete(task_id, Some("A".into()), Utc::now() - chrono::TimeDelta::seconds(30));
        assert_eq!(coord.metrics().avg_latency_secs, Some(0.0));
    }

    #[test]
    fn test_spawn_failure_is_busy_and_degraded() {
        let mut coord =
            coordinator(config(1), FakeProbe::idle(1), FakeSpawner::default().failing());
        let reply = RecordingReply::default();
        assert_eq!(coord.submit(Job::new("a", reply.clone())), Admission::Busy);
        assert_eq!(reply.replies(), vec![notices::TOO_BUSY.to_string()]);
        assert_eq!(coord.counters().degraded_checks, 1);
    }

    #[test]
    fn test_missing_core_sample_counts_as_busy() {
        let probe = FakeProbe::idle(2).with_per_core(vec![]);
        let mut coord = coordinator(config(2), probe, FakeSpawner::default());

        dispatched(coord.submit(Job::new("a", RecordingReply::default())));
        let (_, second) = dispatched(coord.submit(Job::new("b", RecordingReply::default())));
        assert_eq!(second, 1);
        assert_eq!(coord.submit(Job::new("c", RecordingReply::default())), Admission::Busy);
        // One missing sample on the second submit, two on the third
        assert_eq!(coord.counters().degraded_checks, 3);
    }

    #[test]
    fn test_cpu_probe_failure_counts_as_busy() {
        let probe = FakeProbe::idle(1).with_cpu_error();
        let mut coord = coordinator(config(1), probe, FakeSpawner::default());

        dispatched(coord.submit(Job::new("a", RecordingReply::default())));
        assert_eq!(coord.submit(Job::new("b", RecordingReply::default())), Admission::Busy);
        assert_eq!(coord.counters().degraded_checks, 2);
    }

    #[test]
    fn test_metrics_sum_task_counts() {
        let mut coord = coordinator(
            config(2).with_queue_capacity(2),
            FakeProbe::idle(2),
            FakeSpawner::default(),
        );
        for i in 0..3 {
            dispatched(coord.submit(Job::new(format!("{i}"), RecordingReply::default())));
        }
        let metrics = coord.metrics();
        assert_eq!(metrics.queue_count, 2);
        assert_eq!(metrics.active_jobs, 3);
        assert_eq!(metrics.pending_tasks, 3);
        assert!(metrics.avg_latency_secs.is_none());
    }

    #[test]
    fn test_shutdown_stops_workers_and_answers_pending() {
        let spawner = FakeSpawner::default();
        let workers = spawner.workers();
        let mut coord = coordinator(config(2).with_queue_capacity(1), FakeProbe::idle(2), spawner);
        let reply = RecordingReply::default();
        dispatched(coord.submit(Job::new("a", reply.clone())));
        dispatched(coord.submit(Job::new("b", reply.clone())));

        coord.shutdown();
        assert_eq!(coord.queue_count(), 0);
        assert_eq!(coord.pending_count(), 0);
        assert!(workers.closed(0) && workers.closed(1));
        assert_eq!(reply.replies().len(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Coordinator::new(
            SchedulerConfig::default().with_queue_capacity(0),
            Arc::new(FakeProbe::idle(1)),
            Box::new(FakeSpawner::default()),
        );
        assert!(matches!(result, Err(TranspoolError::Config(_))));
    }

    #[test]
    fn test_detected_cores_used_by_default() {
        let coord = Coordinator::new(
            SchedulerConfig::default(),
            Arc::new(FakeProbe::idle(6)),
            Box::new(FakeSpawner::default()),
        )
        .unwrap();
        assert_eq!(coord.total_cores(), 6);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::scheduler::testing::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Step {
        Submit,
        Echo(usize),
        HangUp(usize),
        Poll,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Submit),
            2 => (0usize..8).prop_map(Step::Echo),
            1 => (0usize..8).prop_map(Step::HangUp),
            2 => Just(Step::Poll),
        ]
    }

    proptest! {
        /// Bookkeeping stays consistent after every step, and every job is
        /// answered exactly once by the time the coordinator shuts down.
        #[test]
        fn bookkeeping_holds_for_any_sequence(steps in prop::collection::vec(step(), 1..80)) {
            let spawner = FakeSpawner::default();
            let workers = spawner.workers();
            let mut coord = Coordinator::new(
                SchedulerConfig::default().with_cores(3).with_queue_capacity(2),
                Arc::new(FakeProbe::idle(3)),
                Box::new(spawner),
            )
            .unwrap();
            let mut replies = Vec::new();

            for step in steps {
                match step {
                    Step::Submit => {
                        let reply = RecordingReply::default();
                        coord.submit(Job::new("Hallo", reply.clone()));
                        replies.push(reply);
                    }
                    Step::Echo(i) if !workers.is_empty() => workers.echo_all(i % workers.len()),
                    Step::HangUp(i) if !workers.is_empty() => workers.hang_up(i % workers.len()),
                    Step::Poll => {
                        coord.poll_completions();
                    }
                    _ => {}
                }
                let check = coord.verify_invariants();
                prop_assert!(check.is_ok(), "{:?}", check);
                prop_assert!(coord.queue_count() <= 3);
            }

            coord.shutdown();
            for reply in &replies {
                prop_assert_eq!(reply.replies().len(), 1);
            }
        }
    }
}
