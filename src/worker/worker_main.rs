//! Worker main loop.
//!
//! Runs inside `transpool worker` subprocesses and on in-process worker
//! threads. The loop polls its inbox without blocking, translates each job
//! and reports the result with a completion timestamp.

use super::affinity;
use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{Recv, WorkRequest, WorkResponse};
use crate::error::{Result, TranspoolError};
use crate::translate::{Translator, TranslatorSpec};
use std::time::Duration;

/// Worker-side end of the channel to the coordinator.
pub trait WorkerEndpoint {
    /// Receive one request without blocking. `Err(Json)` is a garbled line.
    fn try_recv(&mut self) -> Result<Recv<WorkRequest>>;

    fn send(&mut self, response: &WorkResponse) -> Result<()>;
}

/// JSON lines over this process's stdin/stdout.
pub struct StdioEndpoint {
    reader: LineReader,
    writer: LineWriter,
}

impl StdioEndpoint {
    /// Take over fds 0 and 1.
    ///
    /// # Safety
    /// Nothing else in the process may use stdin or stdout afterwards.
    pub unsafe fn from_stdio() -> Self {
        // Safety: fds 0 and 1 are valid for the life of the process
        let (stdin_fd, stdout_fd) = unsafe { (PipeFd::from_raw(0), PipeFd::from_raw(1)) };
        Self {
            reader: LineReader::new(stdin_fd),
            writer: LineWriter::new(stdout_fd),
        }
    }
}

impl WorkerEndpoint for StdioEndpoint {
    fn try_recv(&mut self) -> Result<Recv<WorkRequest>> {
        Ok(match self.reader.try_read_line()? {
            Recv::Message(line) => Recv::Message(WorkRequest::from_line(&line)?),
            Recv::Empty => Recv::Empty,
            Recv::Closed => Recv::Closed,
        })
    }

    fn send(&mut self, response: &WorkResponse) -> Result<()> {
        self.writer.write_line(&response.to_line()?)?;
        Ok(())
    }
}

/// Translate one job, mapping engine failures to an absent result.
fn handle_translate(translator: &dyn Translator, id: u64, text: &str) -> WorkResponse {
    match translator.translate(text) {
        Ok(translated) => WorkResponse::result(id, Some(translated)),
        Err(e) => {
            tracing::warn!(task_id = id, error = %e, "Translation failed");
            WorkResponse::result(id, None)
        }
    }
}

/// Poll for jobs until told to stop or the coordinator goes away.
///
/// Announces itself with [`WorkResponse::Ready`] first. Sleeps `idle` when
/// the inbox is empty.
pub fn worker_loop(
    endpoint: &mut dyn WorkerEndpoint,
    translator: &dyn Translator,
    core_id: usize,
    idle: Duration,
) -> Result<()> {
    endpoint.send(&WorkResponse::Ready {
        pid: std::process::id(),
        core: core_id,
    })?;

    loop {
        match endpoint.try_recv() {
            Ok(Recv::Message(WorkRequest::Translate { id, text })) => {
                let response = handle_translate(translator, id, &text);
                endpoint.send(&response)?;
            }
            Ok(Recv::Message(WorkRequest::Stop)) => {
                tracing::debug!(core = core_id, "Stop requested");
                return Ok(());
            }
            Ok(Recv::Closed) => {
                tracing::debug!(core = core_id, "Coordinator hung up");
                return Ok(());
            }
            Ok(Recv::Empty) => std::thread::sleep(idle),
            Err(TranspoolError::Json(e)) => {
                tracing::warn!(core = core_id, error = %e, "Skipping malformed request");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Entry point of `transpool worker`.
///
/// Never returns: exits 0 after a stop or hangup, 1 on a broken channel.
pub fn run_worker_main(core_id: usize, translator: TranslatorSpec, idle: Duration) -> ! {
    // Ignore SIGPIPE - a vanished coordinator surfaces as EPIPE instead
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    affinity::pin_or_warn(core_id);

    let engine = translator.build();
    tracing::info!(
        pid = std::process::id(),
        core = core_id,
        translator = %translator.label(),
        "Worker started"
    );

    // Safety: logging goes to stderr and nothing else touches stdin/stdout
    let mut endpoint = unsafe { StdioEndpoint::from_stdio() };

    match worker_loop(&mut endpoint, engine.as_ref(), core_id, idle) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(core = core_id, error = %e, "Worker channel failed");
            std::process::exit(1);
        }
    }
}
