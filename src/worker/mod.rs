//! Translation workers pinned to CPU cores.
//!
//! Each queue owns exactly one worker. The coordinator talks to it through
//! a [`WorkerChannel`]; workers never share state with each other.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Coordinator   │
//!                     │ (scheduler thr) │
//!                     └────────┬────────┘
//!                              │ JSON lines
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 0  │  │ Worker 1  │  │ Worker N  │
//!         │  core 0   │  │  core 1   │  │  core N   │
//!         │ Translator│  │ Translator│  │ Translator│
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! Two transports share the same loop and protocol:
//!
//! - **Processes** ([`ProcessSpawner`]): `transpool worker` subprocesses
//!   over pipes, pinned with `sched_setaffinity`
//! - **Threads** ([`ThreadSpawner`]): in-process threads over crossbeam
//!   channels

pub mod affinity;
mod channel;
mod ipc;
mod proc;
pub mod protocol;
mod signals;
mod spawn;
mod thread;
pub mod worker_main;

pub use channel::{WorkerChannel, WorkerSpawner};
pub use protocol::{Recv, WorkRequest, WorkResponse};
pub use spawn::ProcessSpawner;
pub use thread::ThreadSpawner;
