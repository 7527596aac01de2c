//! Admission-controlled job scheduler.
//!
//! Jobs go through [`Coordinator::submit`]: a memory gate, then first-fit
//! selection over the live queues, scaling out onto a free core when every
//! queue is hot or full. Results come back through the completion monitor,
//! which also scales idle queues back in.
//!
//! ```text
//!   gateway ──submit──▶ SchedulerHandle ──▶ scheduler thread
//!                                            ├─ Coordinator::submit
//!                                            ├─ Coordinator::poll_completions
//!                                            └─ Coordinator::reap_expired
//! ```

mod coordinator;
mod job;
mod metrics;
mod monitor;
mod queue;
mod service;
#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Admission, Coordinator};
pub use job::{Job, PendingTask, ReplyHandle, notices};
pub use metrics::{Counters, MetricsSnapshot, SharedMetrics, StatsPoller};
pub use monitor::next_delay;
pub use queue::QueueInfo;
pub use service::{SchedulerHandle, Submitter};
