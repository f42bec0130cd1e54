//! Process lifecycle management for external storage tools.
//!
//! The pipeline shells out to destructive tools (`sgdisk`, `cryptsetup`,
//! `zpool`). If the installer dies while one of those is running, an
//! orphaned child must not keep rewriting the partition table. Children are
//! therefore spawned in their own process group, tracked in a global
//! registry, and signalled as a group on parent exit: SIGTERM first, then
//! SIGKILL after a grace period.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry tracking all spawned external tool processes.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Prevents double-cleanup when Drop and a signal handler race.
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Register a new child process.
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered child process PID {}", pid);
    }

    /// Unregister a child process after it exits normally.
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered child process PID {}", pid);
    }

    /// Number of tracked children.
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate all tracked children: SIGTERM to each process group, wait
    /// up to `grace_period`, then SIGKILL whatever is left.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        info!("Terminating {} child process(es)...", self.pids.len());

        let pids_to_kill: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids_to_kill {
            // Group signal catches the tool's own children too
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                let _ = send_signal(pid, Signal::SIGTERM);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids_to_kill.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids_to_kill {
            if is_process_alive(pid) {
                warn!("Process group {} did not terminate, sending SIGKILL", pid);
                if send_signal_to_group(pid, Signal::SIGKILL).is_err() {
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID signals the whole process group.
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (zombies count as dead).
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Field 3 of /proc/pid/stat is the state; Z = zombie, X = dead
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Initialize global signal handlers for SIGINT, SIGTERM and SIGHUP.
///
/// Operator interrupt is the only cancellation mechanism the pipeline has:
/// on signal, running tools are terminated and the process exits, leaving
/// storage in whatever partially-provisioned state it was in.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            info!(
                "Received {}, terminating running tools; storage is left as-is",
                signal_name
            );

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups.
pub trait CommandProcessGroup {
    /// Run the command in its own process group so the whole tree can be
    /// killed with a single group signal.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // Child dies with the parent: an orphaned `sgdisk --zap-all`
                // must not outlive a crashed installer
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        assert_eq!(registry.count(), 1);

        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        registry.unregister(5678);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_kills_real_process() {
        use std::process::Command;

        let mut child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .spawn()
            .expect("failed to spawn sleep process");

        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);

        assert!(is_process_alive(pid));
        registry.terminate_all(Duration::from_millis(500));

        // Reap so the zombie does not count as alive forever
        let start = Instant::now();
        let mut died = false;
        while start.elapsed() < Duration::from_secs(2) {
            if let Ok(Some(_)) = child.try_wait() {
                died = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(died, "process should be dead after terminate_all");
    }

    #[test]
    fn test_terminate_all_handles_already_dead_process() {
        use std::process::Command;

        let mut child = Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .expect("failed to spawn sh");

        let pid = child.id();
        let _ = child.wait();

        let mut registry = ChildRegistry::default();
        registry.register(pid);

        // No panic on an already-reaped PID
        registry.terminate_all(Duration::from_millis(100));
    }

    #[test]
    fn test_cleanup_initiated_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();
        registry.register(12345); // fake PID

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
    }

    #[test]
    fn test_send_signal_to_nonexistent_pid() {
        assert!(send_signal(999999, Signal::SIGTERM).is_err());
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999999));
    }
}
