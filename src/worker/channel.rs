//! The coordinator's view of a worker: a bidirectional message channel.

use super::protocol::{Recv, WorkRequest, WorkResponse};
use crate::error::Result;

/// Coordinator-side end of the point-to-point channel to one worker.
///
/// This is the only thing the coordinator shares with a worker. Both the
/// subprocess pipe pair and the in-process thread channel implement it.
pub trait WorkerChannel: Send {
    /// Process id of the worker.
    fn worker_pid(&self) -> u32;

    /// Send a request. An error means the channel is broken.
    fn send(&mut self, request: &WorkRequest) -> Result<()>;

    /// Receive one response without blocking.
    ///
    /// `Err` means a garbled message that was consumed and can be skipped;
    /// a dead peer is reported as [`Recv::Closed`].
    fn try_recv(&mut self) -> Result<Recv<WorkResponse>>;

    /// Ask the worker to stop and release its resources.
    ///
    /// Best-effort and non-blocking for the caller: anything that must wait
    /// for the worker to exit happens elsewhere.
    fn close(self: Box<Self>);
}

/// Starts workers pinned to a core.
pub trait WorkerSpawner: Send {
    fn spawn(&self, core_id: usize) -> Result<Box<dyn WorkerChannel>>;
}
