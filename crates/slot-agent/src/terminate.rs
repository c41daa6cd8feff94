//! Two-phase best-effort process termination.
//!
//! SIGTERM first, then a bounded wait for the process to exit, then
//! SIGKILL. Outcomes are only logged; the coordinator recomputes the
//! kill-list on the next poll, so a survivor is retried automatically.

use std::time::Duration;
use std::time::Instant;

use tracing::debug;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What happened to one pid from the kill-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Exited after SIGTERM or SIGKILL
    Killed,
    /// No such process by the time we signalled it
    AlreadyGone,
    /// The agent lacks permission to signal this process
    PermissionDenied,
    /// Survived SIGKILL (e.g. stuck in uninterruptible sleep)
    StillRunning,
}

enum SignalResult {
    Delivered,
    NoSuchProcess,
    NotPermitted,
}

fn send_signal(pid: u32, signal: libc::c_int) -> SignalResult {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        return SignalResult::Delivered;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => SignalResult::NoSuchProcess,
        Some(libc::EPERM) => SignalResult::NotPermitted,
        _ => SignalResult::NoSuchProcess,
    }
}

/// Signal 0 probes existence without delivering anything.
fn is_alive(pid: u32) -> bool {
    !matches!(send_signal(pid, 0), SignalResult::NoSuchProcess)
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
    !is_alive(pid)
}

/// Terminate `pid`, giving it `grace` to exit cleanly before SIGKILL.
pub fn terminate(pid: u32, grace: Duration) -> TerminateOutcome {
    match send_signal(pid, libc::SIGTERM) {
        SignalResult::NoSuchProcess => return TerminateOutcome::AlreadyGone,
        SignalResult::NotPermitted => return TerminateOutcome::PermissionDenied,
        SignalResult::Delivered => {}
    }

    if wait_for_exit(pid, grace) {
        return TerminateOutcome::Killed;
    }

    debug!(pid, "grace period expired, escalating to SIGKILL");
    match send_signal(pid, libc::SIGKILL) {
        SignalResult::NoSuchProcess => return TerminateOutcome::Killed,
        SignalResult::NotPermitted => return TerminateOutcome::PermissionDenied,
        SignalResult::Delivered => {}
    }

    if wait_for_exit(pid, EXIT_POLL_INTERVAL * 10) {
        TerminateOutcome::Killed
    } else {
        TerminateOutcome::StillRunning
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    // A child stays a zombie (and so "alive" to kill(2)) until reaped,
    // so the reaping has to run concurrently with terminate().
    fn reap_in_background(mut child: std::process::Child) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let _ = child.wait();
        })
    }

    #[test]
    fn sigterm_kills_a_cooperative_process() {
        let child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("should spawn sleep");
        let pid = child.id();
        let reaper = reap_in_background(child);

        let outcome = terminate(pid, Duration::from_secs(5));

        assert_eq!(outcome, TerminateOutcome::Killed);
        reaper.join().expect("reaper should finish");
    }

    #[test]
    fn reaped_process_is_already_gone() {
        let mut child = Command::new("true").spawn().expect("should spawn true");
        let pid = child.id();
        child.wait().expect("child should exit");

        assert_eq!(
            terminate(pid, Duration::from_secs(1)),
            TerminateOutcome::AlreadyGone
        );
    }

    #[test]
    fn sigkill_follows_an_ignored_sigterm() {
        // sh traps and ignores TERM, so only the KILL escalation ends it
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
            .spawn()
            .expect("should spawn sh");
        let pid = child.id();
        let reaper = reap_in_background(child);

        let outcome = terminate(pid, Duration::from_millis(300));

        assert_eq!(outcome, TerminateOutcome::Killed);
        reaper.join().expect("reaper should finish");
    }
}
