//! Jobs, reply handles and the tasks the coordinator tracks for them.

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Instant;

/// Fixed texts sent back instead of a translation.
pub mod notices {
    /// Memory is at or above the configured ceiling.
    pub const OVERLOADED: &str = "System overloaded, please try again later.";
    /// Every queue is busy and no core is free for another.
    pub const TOO_BUSY: &str = "Bot is processing too many requests, please try again later.";
    /// The worker channel broke before the job finished.
    pub const TRANSIENT_FAILURE: &str = "Translation service temporarily unavailable";
    /// The translator returned nothing.
    pub const TRANSLATION_FAILED: &str = "[Translation failed]";
    /// The job outlived its deadline.
    pub const TIMED_OUT: &str = "Translation timed out, please try again";
}

/// Where the answer to a job goes.
///
/// Implemented by the gateway. Failures are logged by the caller and never
/// retried.
pub trait ReplyHandle: Send {
    fn reply(&self, text: &str) -> Result<()>;
}

/// A unit of translation work plus the handle to answer it on.
pub struct Job {
    text: String,
    reply: Box<dyn ReplyHandle>,
}

impl Job {
    pub fn new(text: impl Into<String>, reply: impl ReplyHandle + 'static) -> Self {
        Self {
            text: text.into(),
            reply: Box::new(reply),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn into_parts(self) -> (String, Box<dyn ReplyHandle>) {
        (self.text, self.reply)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("chars", &self.text.chars().count())
            .finish_non_exhaustive()
    }
}

/// A dispatched job awaiting its result.
pub struct PendingTask {
    pub task_id: u64,
    pub reply: Box<dyn ReplyHandle>,
    pub queue_id: u64,
    pub submitted_at: DateTime<Utc>,
    /// Reap time when a job timeout is configured.
    pub deadline: Option<Instant>,
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("task_id", &self.task_id)
            .field("queue_id", &self.queue_id)
            .field("submitted_at", &self.submitted_at)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
