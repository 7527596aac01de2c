//! A queue binds one worker to the coordinator and counts its in-flight jobs.

use crate::worker::WorkerChannel;
use serde::Serialize;
use std::fmt;

pub struct Queue {
    pub queue_id: u64,
    /// Jobs dispatched to this queue and not yet finalized.
    pub task_count: u32,
    pub worker_pid: u32,
    pub core_id: usize,
    pub channel: Box<dyn WorkerChannel>,
    /// Set once the worker has announced itself.
    pub ready: bool,
}

impl Queue {
    pub fn new(queue_id: u64, core_id: usize, channel: Box<dyn WorkerChannel>) -> Self {
        Self {
            queue_id,
            task_count: 0,
            worker_pid: channel.worker_pid(),
            core_id,
            channel,
            ready: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.task_count == 0
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            queue_id: self.queue_id,
            task_count: self.task_count,
            worker_pid: self.worker_pid,
            core_id: self.core_id,
            ready: self.ready,
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("queue_id", &self.queue_id)
            .field("task_count", &self.task_count)
            .field("worker_pid", &self.worker_pid)
            .field("core_id", &self.core_id)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub queue_id: u64,
    pub task_count: u32,
    pub worker_pid: u32,
    pub core_id: usize,
    pub ready: bool,
}
