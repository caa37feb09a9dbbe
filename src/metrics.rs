//! Per-process usage sampling for status documents.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Usage of one process. Zeros when the process could not be sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidUsage {
    /// CPU usage in percent since the previous sample.
    pub cpu: f64,
    /// Resident memory in bytes.
    pub memory: u64,
    /// Process start time, milliseconds since the Unix epoch.
    pub ctime: u64,
    /// Milliseconds since the process started.
    pub elapsed: u64,
}

pub trait MetricsProvider: Send + Sync + std::fmt::Debug {
    fn usage(&self, pid: u32) -> PidUsage;
}

/// Samples processes through `sysinfo`.
pub struct SysinfoMetrics {
    system: Mutex<System>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoMetrics").finish_non_exhaustive()
    }
}

impl MetricsProvider for SysinfoMetrics {
    fn usage(&self, pid: u32) -> PidUsage {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match system.process(pid) {
            Some(process) => PidUsage {
                cpu: f64::from(process.cpu_usage()),
                memory: process.memory(),
                ctime: process.start_time().saturating_mul(1000),
                elapsed: process.run_time().saturating_mul(1000),
            },
            None => {
                tracing::debug!(%pid, "process not found while sampling usage");
                PidUsage::default()
            }
        }
    }
}

/// Provider that reports nothing; for roles where sampling is unwanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl MetricsProvider for NoMetrics {
    fn usage(&self, _pid: u32) -> PidUsage {
        PidUsage::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_own_process() {
        let metrics = SysinfoMetrics::new();
        let usage = metrics.usage(std::process::id());
        assert!(usage.memory > 0);
        assert!(usage.ctime > 0);
    }

    #[test]
    fn unknown_pid_yields_zeros() {
        let metrics = SysinfoMetrics::new();
        assert_eq!(metrics.usage(u32::MAX - 1), PidUsage::default());
    }
}
