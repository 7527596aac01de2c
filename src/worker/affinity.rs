//! CPU pinning.

use crate::error::{Result, TranspoolError};

/// Restrict the calling thread (or single-threaded process) to one core.
#[cfg(target_os = "linux")]
pub fn pin_to_core(core_id: usize) -> Result<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(core_id)
        .map_err(|e| TranspoolError::Worker(format!("core {} out of range: {}", core_id, e)))?;
    // pid 0 is the calling thread
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| TranspoolError::Worker(format!("sched_setaffinity({}): {}", core_id, e)))
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(core_id: usize) -> Result<()> {
    Err(TranspoolError::Worker(format!(
        "CPU pinning to core {} is not supported on this platform",
        core_id
    )))
}

/// Pin, logging instead of failing: an unpinned worker still does its job.
pub fn pin_or_warn(core_id: usize) {
    match pin_to_core(core_id) {
        Ok(()) => tracing::debug!(core = core_id, "Pinned worker"),
        Err(e) => tracing::warn!(core = core_id, error = %e, "Running unpinned"),
    }
}
