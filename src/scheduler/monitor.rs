//! Completion monitor.
//!
//! Runs on the scheduler thread between submissions: drains finished results
//! from every queue, drops queues whose worker went away and reaps tasks past
//! their deadline.

use super::coordinator::{Coordinator, notify};
use super::job::notices;
use crate::worker::{Recv, WorkResponse};
use std::time::{Duration, Instant};

/// Wait when there are no queues at all.
pub const IDLE_DELAY: Duration = Duration::from_millis(500);

/// Wait after a pass that handled at least one message.
pub const ACTIVE_DELAY: Duration = Duration::from_millis(50);

/// Wait after a pass that found nothing.
pub const QUIET_DELAY: Duration = Duration::from_millis(200);

/// How long to wait before the next monitor pass.
pub fn next_delay(has_queues: bool, processed: usize) -> Duration {
    if !has_queues {
        IDLE_DELAY
    } else if processed > 0 {
        ACTIVE_DELAY
    } else {
        QUIET_DELAY
    }
}

impl Coordinator {
    /// Poll every queue once without blocking.
    ///
    /// Returns the number of messages and hangups handled.
    pub fn poll_completions(&mut self) -> usize {
        let queue_ids: Vec<u64> = self.queues.keys().copied().collect();
        // Cap per queue so a chatty worker cannot starve the others
        let budget = self.config.queue_capacity as usize + 2;
        let mut processed = 0;

        for queue_id in queue_ids {
            for _ in 0..budget {
                // Completions may retire this queue mid-drain
                let Some(queue) = self.queues.get_mut(&queue_id) else {
                    break;
                };

                match queue.channel.try_recv() {
                    Ok(Recv::Message(WorkResponse::Result {
                        id,
                        result,
                        finished_at,
                    })) => {
                        self.complete(id, result, finished_at);
                        processed += 1;
                    }
                    Ok(Recv::Message(WorkResponse::Ready { pid, core })) => {
                        queue.ready = true;
                        if core != queue.core_id {
                            tracing::warn!(
                                queue_id,
                                expected = queue.core_id,
                                reported = core,
                                "Worker reports unexpected core"
                            );
                        }
                        tracing::debug!(queue_id, pid, core, "Worker ready");
                        processed += 1;
                    }
                    Ok(Recv::Empty) => break,
                    Ok(Recv::Closed) => {
                        self.drop_queue(queue_id, "worker channel closed");
                        processed += 1;
                        break;
                    }
                    Err(e) => {
                        self.counters.degraded_checks += 1;
                        tracing::warn!(queue_id, error = %e, "Skipping garbled worker message");
                        processed += 1;
                    }
                }
            }
        }

        processed
    }

    /// Fail every pending task whose deadline is at or before `now`.
    ///
    /// A late result for a reaped task arrives as an unknown id and is
    /// ignored.
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .pending
            .values()
            .filter(|task| task.deadline.is_some_and(|deadline| deadline <= now))
            .map(|task| task.task_id)
            .collect();

        for task_id in &expired {
            let Some(task) = self.pending.remove(task_id) else {
                continue;
            };
            if let Some(queue) = self.queues.get_mut(&task.queue_id) {
                queue.task_count = queue.task_count.saturating_sub(1);
            }
            self.counters.timed_out += 1;
            tracing::info!(task_id, queue_id = task.queue_id, "Task timed out");
            notify(task.reply.as_ref(), notices::TIMED_OUT);
        }

        if !expired.is_empty() {
            self.collect_idle_queues();
        }
        expired.len()
    }
}
