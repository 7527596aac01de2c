//! Process handle for worker subprocesses.
//!
//! Wraps a child process with IPC channels for communication.

use super::channel::WorkerChannel;
use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{Recv, WorkRequest, WorkResponse};
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{Result, TranspoolError};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::unix::io::OwnedFd;
use std::time::{Duration, Instant};

/// How long a retired worker gets to exit on its own before SIGTERM.
const RETIRE_GRACE: Duration = Duration::from_secs(5);

/// Handle to a worker subprocess with IPC channels.
pub struct Proc {
    /// Process ID
    pid: Pid,
    /// Writer for sending requests to the worker
    writer: LineWriter,
    /// Reader for receiving responses from the worker
    reader: LineReader,
    /// Whether the process has been reaped
    reaped: bool,
}

impl Proc {
    /// Create a new process handle from its components.
    ///
    /// # Arguments
    /// * `pid` - The process ID
    /// * `stdin` - File descriptor for writing to the worker's stdin
    /// * `stdout` - File descriptor for reading from the worker's stdout
    pub fn new(pid: Pid, stdin: PipeFd, stdout: PipeFd) -> Self {
        Self {
            pid,
            writer: LineWriter::new(stdin),
            reader: LineReader::new(stdout),
            reaped: false,
        }
    }

    /// Create from a spawned `std::process::Child`.
    ///
    /// Takes ownership of the child's stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TranspoolError::Worker("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranspoolError::Worker("Child stdout not captured".into()))?;

        Ok(Self::new(
            pid,
            PipeFd::new(OwnedFd::from(stdin)),
            PipeFd::new(OwnedFd::from(stdout)),
        ))
    }

    /// Get the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            _ => {
                self.reaped = true;
                false
            }
        }
    }

    /// Wait for the process to exit (blocking).
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(TranspoolError::Worker("Process already reaped".into()));
        }
        match waitpid(self.pid, None) {
            Ok(status) => {
                self.reaped = true;
                Ok(status)
            }
            Err(e) => Err(TranspoolError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Try to wait for the process (non-blocking).
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(TranspoolError::Worker("Process already reaped".into()));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Err(e) => Err(TranspoolError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| TranspoolError::Worker(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL to the process and wait for it to exit.
    pub fn kill(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(TranspoolError::Worker("Process already reaped".into()));
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| TranspoolError::Worker(format!("Failed to send SIGKILL: {}", e)))?;
        self.wait()
    }

    /// Gracefully stop the worker: send stop, wait briefly, then escalate.
    ///
    /// Returns why the process ended.
    pub fn stop(&mut self, timeout: Duration) -> Result<TerminationReason> {
        if self.reaped {
            return Ok(TerminationReason::Unknown);
        }

        // The worker may already be gone; escalation below covers that
        let _ = WorkerChannel::send(self, &WorkRequest::Stop);

        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(status)) = self.try_wait() {
                return Ok(analyze_wait_status(status));
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let _ = self.terminate();
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(Some(status)) = self.try_wait() {
            return Ok(analyze_wait_status(status));
        }

        self.kill().map(analyze_wait_status)
    }
}

impl WorkerChannel for Proc {
    fn worker_pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn send(&mut self, request: &WorkRequest) -> Result<()> {
        let line = request.to_line()?;
        self.writer.write_line(&line).map_err(|e| {
            tracing::debug!(pid = %self.pid, error = %e, "Write to worker failed");
            TranspoolError::ChannelClosed {
                pid: self.worker_pid(),
            }
        })
    }

    fn try_recv(&mut self) -> Result<Recv<WorkResponse>> {
        match self.reader.try_read_line() {
            Ok(Recv::Message(line)) => Ok(Recv::Message(WorkResponse::from_line(&line)?)),
            Ok(Recv::Empty) => Ok(Recv::Empty),
            Ok(Recv::Closed) => Ok(Recv::Closed),
            Err(e) => {
                tracing::debug!(pid = %self.pid, error = %e, "Read from worker failed");
                Ok(Recv::Closed)
            }
        }
    }

    fn close(self: Box<Self>) {
        let mut proc = *self;
        let pid = proc.pid;
        let reaper = std::thread::Builder::new()
            .name(format!("reap-worker-{}", pid))
            .spawn(move || match proc.stop(RETIRE_GRACE) {
                Ok(reason) if reason.is_success() => {
                    tracing::debug!(pid = %pid, "Worker exited cleanly");
                }
                Ok(reason) => {
                    tracing::info!(pid = %pid, reason = %reason, "Worker terminated");
                }
                Err(e) => {
                    tracing::warn!(pid = %pid, error = %e, "Failed to reap worker");
                }
            });
        // On spawn failure the closure is dropped with the Proc, which kills it
        if let Err(e) = reaper {
            tracing::warn!(pid = %pid, error = %e, "Could not start reaper thread");
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.terminate();
            std::thread::sleep(Duration::from_millis(10));

            if let Ok(Some(_)) = self.try_wait() {
                return;
            }

            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
