//! OS process utilities for process-based session hosts.
//!
//! Session hosts of type `Process` are plain child processes of the agent.
//! These helpers check liveness, reap exit codes and stop them with
//! SIGTERM followed by SIGKILL.

use std::time::{Duration, Instant};

/// Time to wait for SIGKILL to take effect.
pub const SIGKILL_WAIT: Duration = Duration::from_millis(500);

/// Poll interval while waiting for a graceful exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parse a type-specific id back into a pid.
pub fn parse_pid(type_specific_id: &str) -> Option<libc::pid_t> {
    type_specific_id.parse::<libc::pid_t>().ok().filter(|pid| *pid > 0)
}

/// Check if a process is alive.
pub fn is_alive(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Reap a child without blocking.
///
/// Returns `Some(exit_code)` if the process has exited (or is not our
/// child), `None` while it is still running.
pub fn try_wait(pid: libc::pid_t) -> Option<i32> {
    let mut status: libc::c_int = 0;
    let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };

    if result == pid {
        Some(decode_status(status))
    } else if result < 0 {
        Some(-1)
    } else {
        None
    }
}

fn decode_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        -1
    }
}

/// Send `signal` to a process. Returns false if the process is gone.
fn signal(pid: libc::pid_t, signal: libc::c_int) -> bool {
    unsafe { libc::kill(pid, signal) == 0 }
}

/// Stop a session host process.
///
/// Sends SIGTERM, waits up to `timeout`, then SIGKILLs whatever is left.
/// Returns the exit code when it could be reaped.
pub fn stop_process(pid: libc::pid_t, timeout: Duration) -> Option<i32> {
    if !is_alive(pid) {
        return try_wait(pid);
    }

    if !signal(pid, libc::SIGTERM) {
        return try_wait(pid);
    }

    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(code) = try_wait(pid) {
            return Some(code);
        }
        if !is_alive(pid) {
            return try_wait(pid);
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    tracing::debug!(pid = pid, "SIGTERM timeout, sending SIGKILL");
    signal(pid, libc::SIGKILL);
    std::thread::sleep(SIGKILL_WAIT);
    try_wait(pid)
}
