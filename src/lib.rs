//! transpool: admission-controlled scheduling of translation jobs onto
//! CPU-pinned workers.
//!
//! The [`scheduler`] owns a set of queues, one per core, each backed by a
//! worker from [`worker`]. New jobs are admitted only while memory is below
//! the configured ceiling, and go to the first queue whose core is cool
//! enough and whose in-flight count is under capacity.

pub mod config;
pub mod error;
pub mod gateway;
pub mod latency;
pub mod logging;
pub mod probe;
pub mod scheduler;
pub mod translate;
pub mod version;
pub mod worker;
