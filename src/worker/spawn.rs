//! Worker subprocess spawning.
//!
//! Workers are this same binary re-executed with the hidden `worker`
//! subcommand, talking JSON lines over stdin/stdout.

use super::channel::{WorkerChannel, WorkerSpawner};
use super::proc::Proc;
use crate::config::DEFAULT_WORKER_IDLE;
use crate::error::{Result, TranspoolError};
use crate::logging::{LOG_FILE_ENV, LOG_FILTER_ENV};
use crate::translate::TranslatorSpec;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Spawns one subprocess per queue.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    exe: PathBuf,
    translator: TranslatorSpec,
    idle: Duration,
    log_filter: Option<String>,
}

impl ProcessSpawner {
    /// Spawner that re-executes the running binary.
    pub fn current(translator: TranslatorSpec) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            TranspoolError::Worker(format!("Failed to get current executable: {}", e))
        })?;
        Ok(Self::with_exe(exe, translator))
    }

    /// Spawner for an explicit `transpool` binary.
    pub fn with_exe(exe: impl Into<PathBuf>, translator: TranslatorSpec) -> Self {
        Self {
            exe: exe.into(),
            translator,
            idle: DEFAULT_WORKER_IDLE,
            log_filter: None,
        }
    }

    /// Sleep used by workers when their inbox is empty.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Log filter handed to workers through the environment.
    pub fn with_log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    fn command(&self, core_id: usize) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("worker")
            .arg("--core")
            .arg(core_id.to_string())
            .arg("--idle-ms")
            .arg(self.idle.as_millis().to_string())
            .args(self.translator.to_args());

        if let Some(filter) = &self.log_filter {
            cmd.env(LOG_FILTER_ENV, filter);
        }
        // Only the parent rotates the log file
        cmd.env_remove(LOG_FILE_ENV);

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Worker logs go to parent's stderr
        cmd
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, core_id: usize) -> Result<Box<dyn WorkerChannel>> {
        let child = self
            .command(core_id)
            .spawn()
            .map_err(|e| TranspoolError::Worker(format!("Failed to spawn worker: {}", e)))?;

        let proc = Proc::from_child(child)?;
        tracing::debug!(
            pid = %proc.pid(),
            core = core_id,
            exe = %self.exe.display(),
            "Spawned worker process"
        );
        Ok(Box::new(proc))
    }
}
