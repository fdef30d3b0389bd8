//! Process lifecycle management for external tools
//!
//! Every partitioning, formatting and chroot command runs in its own process
//! group so that the whole tree (e.g. `arch-chroot` → `pacman` → hooks) can be
//! signalled at once. Running children are tracked in a global registry; on
//! SIGINT/SIGTERM/SIGHUP the installation's cancellation token is tripped and
//! every registered group receives SIGTERM, then SIGKILL after a grace period.
//!
//! A child is also spawned with `PR_SET_PDEATHSIG`, so a crashed installer
//! never leaves an orphaned `sgdisk` or `ntfsresize` running.

use crate::cancel::CancellationToken;
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::process::Child;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Process groups of the external tools currently running.
///
/// Each entry is the leader PID, which equals the group id because children
/// are spawned through [`CommandProcessGroup::in_new_process_group`].
#[derive(Debug, Default)]
pub struct ChildRegistry {
    groups: HashSet<u32>,
    /// Set once a shutdown has started; later shutdowns are no-ops.
    shutting_down: bool,
}

impl ChildRegistry {
    /// Process-wide registry shared by the command runner and signal thread.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.groups.insert(pid);
        debug!("Tracking process group {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        if self.groups.remove(&pid) {
            debug!("Process group {} finished", pid);
        }
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// SIGTERM every tracked group, escalating to SIGKILL for whatever is
    /// still running once `grace_period` has passed. Runs at most once.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if std::mem::replace(&mut self.shutting_down, true) {
            debug!("Child shutdown already in progress");
            return;
        }

        let groups: Vec<u32> = self.groups.drain().collect();
        if groups.is_empty() {
            return;
        }

        info!("Stopping {} running tool(s)...", groups.len());
        for &pid in &groups {
            signal_tree(pid, Signal::SIGTERM);
        }

        let exited = wait_until(grace_period, || groups.iter().all(|&pid| !still_running(pid)));
        if exited {
            info!("All tools exited after SIGTERM");
            return;
        }

        for pid in groups.into_iter().filter(|&pid| still_running(pid)) {
            warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            signal_tree(pid, Signal::SIGKILL);
        }
    }
}

pub(crate) fn register_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }
}

pub(crate) fn unregister_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }
}

/// Stop one child's process group and reap it.
pub fn terminate_child(child: &mut Child, grace_period: Duration) {
    let pid = child.id();
    signal_tree(pid, Signal::SIGTERM);

    let exited = wait_until(grace_period, || match child.try_wait() {
        Ok(status) => status.is_some(),
        Err(e) => {
            warn!("Failed to poll child {}: {}", pid, e);
            false
        }
    });
    if exited {
        return;
    }

    warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
    signal_tree(pid, Signal::SIGKILL);
    if let Err(e) = child.wait() {
        error!("Failed to reap child {}: {}", pid, e);
    }
}

/// Poll `done` until it holds or `limit` elapses.
fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if done() {
            return true;
        }
        if start.elapsed() >= limit {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Signal the group led by `pid`, or just `pid` if it has no group of its own.
fn signal_tree(pid: u32, sig: Signal) {
    let raw = pid as i32;
    if let Err(group_err) = signal::kill(Pid::from_raw(-raw), sig) {
        debug!("{} to group {} failed: {}", sig, pid, group_err);
        if let Err(e) = signal::kill(Pid::from_raw(raw), sig) {
            debug!("{} to PID {} failed: {}", sig, pid, e);
        }
    }
}

/// False for exited PIDs and for zombies awaiting a reap.
fn still_running(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // /proc/<pid>/stat: "pid (comm) state ..."; comm may contain spaces
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let after_comm = stat.rsplit_once(')')?.1;
            after_comm.split_whitespace().next().map(|state| !matches!(state, "Z" | "X"))
        })
        .unwrap_or(true)
}

/// Stops every registered tool when dropped.
///
/// `main` holds one for the whole install so an early return or error still
/// takes `pacstrap` and friends down with it.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The first signal trips `cancel` and terminates running children; the
/// pipeline then unwinds and reports `Cancelled`. A second signal exits
/// immediately with 128 + signal number.
pub fn init_signal_handlers(cancel: CancellationToken) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("archey-signals".into())
        .spawn(move || {
            for sig in signals.forever() {
                let name = Signal::try_from(sig).map(|s| s.as_str()).unwrap_or("signal");

                if cancel.is_cancelled() {
                    warn!("Received {} again, exiting now", name);
                    if let Ok(mut registry) = ChildRegistry::global().lock() {
                        registry.terminate_all(Duration::from_millis(500));
                    }
                    std::process::exit(128 + sig);
                }

                info!("Received {}, cancelling installation...", name);
                cancel.cancel();
            }
        })?;

    Ok(())
}

/// Spawn configuration for tool processes.
pub trait CommandProcessGroup {
    /// Lead a fresh process group and die with the installer.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
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
    use std::process::Command;

    fn spawn_sleeper(own_group: bool) -> Child {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 60"]);
        if own_group {
            cmd.in_new_process_group();
        }
        cmd.spawn().expect("sh should spawn")
    }

    #[test]
    fn test_registry_tracks_groups() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        registry.unregister(4242);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_stops_registered_child() {
        let mut child = spawn_sleeper(true);
        let mut registry = ChildRegistry::default();
        registry.register(child.id());

        registry.terminate_all(Duration::from_millis(500));

        assert_eq!(registry.count(), 0);
        let reaped = wait_until(Duration::from_secs(2), || {
            matches!(child.try_wait(), Ok(Some(_)))
        });
        assert!(reaped, "sleeper should have been terminated");
    }

    #[test]
    fn test_terminate_all_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::ZERO);
        assert!(registry.shutting_down);

        registry.register(999_999);
        registry.terminate_all(Duration::ZERO);
        assert_eq!(registry.count(), 1, "second shutdown must not drain");
    }

    #[test]
    fn test_terminate_child_reaps() {
        let mut child = spawn_sleeper(true);
        terminate_child(&mut child, Duration::from_millis(500));
        assert!(child.try_wait().expect("try_wait").is_some());
    }

    #[test]
    fn test_terminate_child_without_group() {
        let mut child = spawn_sleeper(false);
        terminate_child(&mut child, Duration::from_millis(500));
        assert!(child.try_wait().expect("try_wait").is_some());
    }

    #[test]
    fn test_still_running() {
        assert!(still_running(std::process::id()));
        assert!(!still_running(999_999));
    }

    #[test]
    fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(60), || false));
        assert!(wait_until(Duration::ZERO, || true));
    }
}
