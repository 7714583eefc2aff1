//! Tracked subprocess termination.
//!
//! Forced abandonment signals a task's tracked child PIDs in two phases:
//! a polite SIGTERM to every still-discoverable PID, a bounded graceful wait,
//! then SIGKILL for anything the zero-signal probe still finds alive.

use std::time::Duration;

use tracing::{debug, warn};

/// Outcome of a termination sweep
#[derive(Debug, Default)]
pub struct TerminationReport {
    /// How many processes were signaled for termination
    pub terminated: usize,
    /// Per-PID failures (pid, error text)
    pub errors: Vec<(i32, String)>,
}

/// Terminates tracked child processes gracefully, then forcefully
#[derive(Debug, Clone)]
pub struct ProcessManager {
    graceful_wait: Duration,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessManager {
    pub fn new(graceful_wait: Duration) -> Self {
        Self { graceful_wait }
    }

    /// Signal every PID politely, wait, then force-kill survivors.
    ///
    /// PIDs ≤ 0 are ignored. Already-dead PIDs count neither as terminated
    /// nor as errors.
    pub async fn terminate_all(&self, pids: &[i32]) -> TerminationReport {
        let mut report = TerminationReport::default();
        let live: Vec<i32> = pids
            .iter()
            .copied()
            .filter(|&pid| pid > 0 && is_process_alive(pid))
            .collect();

        if live.is_empty() {
            return report;
        }

        for &pid in &live {
            match signal_terminate(pid) {
                Ok(()) => debug!(pid, "sent polite termination signal"),
                Err(e) => {
                    warn!(pid, error = %e, "polite termination failed");
                    report.errors.push((pid, e));
                }
            }
        }

        tokio::time::sleep(self.graceful_wait).await;

        for &pid in &live {
            if is_process_alive(pid) {
                debug!(pid, "still alive after graceful wait, force killing");
                if let Err(e) = signal_kill(pid) {
                    warn!(pid, error = %e, "force kill failed");
                    report.errors.push((pid, e));
                    continue;
                }
            }
            report.terminated += 1;
        }

        report
    }
}

/// Probe liveness with the zero signal (asserts permission, delivers nothing)
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    probe(pid)
}

/// Filter a PID list down to the processes still alive
pub fn cleanup_dead_processes(pids: &[i32]) -> Vec<i32> {
    pids.iter()
        .copied()
        .filter(|&pid| is_process_alive(pid))
        .collect()
}

#[cfg(unix)]
fn probe(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the permission check, no delivery
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(unix)]
fn signal_terminate(pid: i32) -> Result<(), String> {
    // SAFETY: pid was validated positive by the caller
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(unix)]
fn signal_kill(pid: i32) -> Result<(), String> {
    // SAFETY: pid was validated positive by the caller
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(not(unix))]
fn probe(_pid: i32) -> bool {
    false
}

#[cfg(not(unix))]
fn signal_terminate(pid: i32) -> Result<(), String> {
    let _ = pid;
    Err("signal delivery is not supported on this platform".to_string())
}

#[cfg(not(unix))]
fn signal_kill(pid: i32) -> Result<(), String> {
    let _ = pid;
    Err("signal delivery is not supported on this platform".to_string())
}
