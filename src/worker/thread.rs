//! In-process workers on dedicated threads.
//!
//! Same loop and protocol as the subprocess workers, carried over crossbeam
//! channels instead of pipes. Used for `--worker-mode thread` and in tests.

use super::affinity;
use super::channel::{WorkerChannel, WorkerSpawner};
use super::protocol::{Recv, WorkRequest, WorkResponse};
use super::worker_main::{WorkerEndpoint, worker_loop};
use crate::config::DEFAULT_WORKER_IDLE;
use crate::error::{Result, TranspoolError};
use crate::translate::Translator;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, unbounded};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Spawns one worker thread per queue, sharing a single translator.
pub struct ThreadSpawner {
    translator: Arc<dyn Translator>,
    capacity: usize,
    idle: Duration,
}

impl ThreadSpawner {
    /// `capacity` bounds each worker's inbox; the coordinator never has more
    /// than the queue capacity outstanding, plus room for a stop.
    pub fn new(translator: Arc<dyn Translator>, capacity: usize) -> Self {
        Self {
            translator,
            capacity,
            idle: DEFAULT_WORKER_IDLE,
        }
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }
}

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self, core_id: usize) -> Result<Box<dyn WorkerChannel>> {
        let (request_tx, request_rx) = bounded(self.capacity + 2);
        let (response_tx, response_rx) = unbounded();

        let translator = Arc::clone(&self.translator);
        let idle = self.idle;
        let handle = std::thread::Builder::new()
            .name(format!("worker-core{}", core_id))
            .spawn(move || {
                affinity::pin_or_warn(core_id);
                let mut endpoint = ThreadEndpoint {
                    rx: request_rx,
                    tx: response_tx,
                };
                if let Err(e) = worker_loop(&mut endpoint, translator.as_ref(), core_id, idle) {
                    tracing::debug!(core = core_id, error = %e, "Worker thread exiting");
                }
            })
            .map_err(|e| TranspoolError::Worker(format!("Failed to spawn worker thread: {}", e)))?;

        Ok(Box::new(ThreadChannel {
            tx: request_tx,
            rx: response_rx,
            handle: Some(handle),
        }))
    }
}

struct ThreadEndpoint {
    rx: Receiver<WorkRequest>,
    tx: Sender<WorkResponse>,
}

impl WorkerEndpoint for ThreadEndpoint {
    fn try_recv(&mut self) -> Result<Recv<WorkRequest>> {
        Ok(match self.rx.try_recv() {
            Ok(request) => Recv::Message(request),
            Err(TryRecvError::Empty) => Recv::Empty,
            Err(TryRecvError::Disconnected) => Recv::Closed,
        })
    }

    fn send(&mut self, response: &WorkResponse) -> Result<()> {
        self.tx
            .send(response.clone())
            .map_err(|_| TranspoolError::ChannelClosed {
                pid: std::process::id(),
            })
    }
}

/// Coordinator-side end of a worker thread.
pub struct ThreadChannel {
    tx: Sender<WorkRequest>,
    rx: Receiver<WorkResponse>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerChannel for ThreadChannel {
    fn worker_pid(&self) -> u32 {
        std::process::id()
    }

    fn send(&mut self, request: &WorkRequest) -> Result<()> {
        self.tx.try_send(request.clone()).map_err(|e| match e {
            TrySendError::Full(_) => TranspoolError::Worker("worker inbox full".into()),
            TrySendError::Disconnected(_) => TranspoolError::ChannelClosed {
                pid: self.worker_pid(),
            },
        })
    }

    fn try_recv(&mut self) -> Result<Recv<WorkResponse>> {
        Ok(match self.rx.try_recv() {
            Ok(response) => Recv::Message(response),
            Err(TryRecvError::Empty) => Recv::Empty,
            Err(TryRecvError::Disconnected) => Recv::Closed,
        })
    }

    fn close(mut self: Box<Self>) {
        let _ = self.tx.try_send(WorkRequest::Stop);
        // Detach: the thread finishes its current job, sees the stop and exits
        drop(self.handle.take());
    }
}
