//! Why a worker process ended.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Stopped by SIGTERM, usually our own escalation.
    Terminated,
    /// SIGKILL, either our last-resort escalation or the OOM killer.
    Killed,
    /// SIGSEGV or SIGBUS, typically from a translation engine bug.
    Crashed(Signal),
    /// Any other signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Terminated => "terminated (SIGTERM)".to_string(),
            Self::Killed => "killed (SIGKILL, possibly the OOM killer)".to_string(),
            Self::Crashed(sig) => format!("crashed ({:?})", sig),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => match signal {
            Signal::SIGTERM => TerminationReason::Terminated,
            Signal::SIGKILL => TerminationReason::Killed,
            Signal::SIGSEGV | Signal::SIGBUS => TerminationReason::Crashed(signal),
            _ => TerminationReason::Signaled(signal),
        },
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
