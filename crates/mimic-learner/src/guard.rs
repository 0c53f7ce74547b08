//! Resource guard: keeps the background learner polite.
//!
//! Lowers the process scheduling priority at daemon start (best-effort) and
//! throttles each cycle with a proportional sleep whenever process CPU or
//! resident memory crosses the configured limits.

use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tracing::{info, warn};

/// Maximum throttle sleep per cycle.
const MAX_THROTTLE_SECS: f64 = 5.0;

/// A snapshot of the process's resource usage.
#[derive(Debug, Clone, Copy)]
pub struct ResourceStats {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// CPU/RSS watchdog for the daemon loop.
pub struct ResourceGuard {
    cpu_limit_percent: f32,
    mem_limit_mb: u64,
    system: System,
    pid: Pid,
}

impl ResourceGuard {
    /// Creates a guard with the given limits.
    #[must_use]
    pub fn new(cpu_limit_percent: f32, mem_limit_mb: u64) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new().with_cpu().with_memory()),
        );
        Self {
            cpu_limit_percent,
            mem_limit_mb,
            system,
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Lowers the process priority to the platform minimum. Best-effort.
    #[allow(unsafe_code)] // libc::nice has no safe wrapper
    pub fn setup_low_priority(&self) {
        #[cfg(unix)]
        {
            // nice(19) puts the daemon behind everything interactive.
            let rc = unsafe { libc::nice(19) };
            if rc == -1 {
                warn!("failed to lower process priority, continuing at normal priority");
            }
        }
        #[cfg(not(unix))]
        {
            warn!("priority lowering not supported on this platform");
        }
    }

    /// Samples usage and sleeps proportionally when over a limit.
    ///
    /// Sleep is `min(5.0, 2·overshoot_ratio)` seconds per crossed limit.
    pub async fn check_and_throttle(&mut self) {
        let Some(stats) = self.sample() else {
            return;
        };

        if stats.cpu_percent > self.cpu_limit_percent {
            let overshoot =
                f64::from(stats.cpu_percent - self.cpu_limit_percent) / f64::from(self.cpu_limit_percent);
            let sleep_secs = (overshoot * 2.0).min(MAX_THROTTLE_SECS);
            info!(
                cpu = stats.cpu_percent,
                limit = self.cpu_limit_percent,
                sleep_secs,
                "cpu over limit, throttling"
            );
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
        }

        if stats.memory_mb > self.mem_limit_mb as f64 {
            let overshoot =
                (stats.memory_mb - self.mem_limit_mb as f64) / self.mem_limit_mb as f64;
            let sleep_secs = (overshoot * 2.0).min(MAX_THROTTLE_SECS);
            info!(
                memory_mb = stats.memory_mb,
                limit_mb = self.mem_limit_mb,
                sleep_secs,
                "memory over limit, throttling"
            );
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
        }
    }

    /// Samples this process's CPU and resident memory.
    pub fn sample(&mut self) -> Option<ResourceStats> {
        self.system.refresh_processes();
        let process = self.system.process(self.pid)?;
        Some(ResourceStats {
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
        })
    }
}
