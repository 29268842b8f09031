//! Process memory sampling for worker progress lines and summaries.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::warn;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub trait MemorySampler: Send + Sync {
    /// Resident memory of the current process in bytes; 0 when unknown.
    fn resident_bytes(&self) -> u64;
}

/// Samples the current process through `sysinfo`.
pub struct ProcessMemory {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(reason) => {
                warn!(
                    target: "staticpub::memory",
                    reason,
                    "Cannot resolve current pid; memory figures will read 0"
                );
                None
            }
        };
        Self {
            system: Mutex::new(System::new_with_specifics(RefreshKind::nothing())),
            pid,
        }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemory {
    fn resident_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|process| process.memory()).unwrap_or(0)
    }
}

/// Bytes to megabytes, as used in summaries and progress lines.
pub fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Signed difference in megabytes.
pub fn delta_mb(current: u64, baseline: u64) -> f64 {
    (current as f64 - baseline as f64) / BYTES_PER_MB
}
