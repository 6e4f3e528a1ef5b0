//! Zombie reaper: reaps exited, unsupervised children that accumulate
//! under PID 1, so the process this crate supervises never itself becomes a
//! source of zombies when run as the container entrypoint.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{getpid, Pid};

use crate::context::Context;

/// Exit status for a supervised pid that a reaper sweep collected before its
/// own spawn-adapter wait thread could. Handed back via [`take_stolen_exit`]
/// so the real exit code isn't lost to the race.
struct StolenExit {
    exit_code: i32,
    terminated_by_signal: Option<i32>,
}

fn supervised_pids() -> &'static Mutex<HashSet<i32>> {
    static PIDS: OnceLock<Mutex<HashSet<i32>>> = OnceLock::new();
    PIDS.get_or_init(|| Mutex::new(HashSet::new()))
}

fn stolen_exits() -> &'static Mutex<HashMap<i32, StolenExit>> {
    static EXITS: OnceLock<Mutex<HashMap<i32, StolenExit>>> = OnceLock::new();
    EXITS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Marks `pid` as owned by a spawn adapter's own wait thread. A concurrent
/// [`reap_once`] sweep checks this before discarding an exit status, so a
/// supervised child's real exit code survives even if the periodic reaper
/// sweep wins the race to `waitpid` against the thread that's actually
/// waiting for it.
pub fn register_supervised(pid: i32) {
    supervised_pids().lock().unwrap().insert(pid);
}

/// Releases `pid` once its owning wait thread is done with it, whether it
/// collected the exit status itself or recovered it via
/// [`take_stolen_exit`].
pub fn unregister_supervised(pid: i32) {
    supervised_pids().lock().unwrap().remove(&pid);
    stolen_exits().lock().unwrap().remove(&pid);
}

/// Takes back the exit status for `pid` if a reaper sweep collected it
/// first, as `(exit_code, terminated_by_signal)`.
pub fn take_stolen_exit(pid: i32) -> Option<(i32, Option<i32>)> {
    stolen_exits().lock().unwrap().remove(&pid).map(|exit| (exit.exit_code, exit.terminated_by_signal))
}

/// True only on Linux where this process's pid is 1: the signal that this
/// crate is running as a container entrypoint and therefore inherits PID 1's
/// reaping responsibilities. A no-op everywhere else rather than guessing.
#[cfg(target_os = "linux")]
pub fn is_pid1() -> bool {
    getpid() == Pid::from_raw(1)
}

#[cfg(not(target_os = "linux"))]
pub fn is_pid1() -> bool {
    false
}

/// Reaps every exited child currently waitable with `WNOHANG`, without
/// blocking. Returns how many were reaped. Safe to call even when none of
/// the exited children belong to us: `waitpid(-1, ..)` only ever returns
/// our own children, by kernel definition.
///
/// A reaped pid that's registered via [`register_supervised`] has its exit
/// status stashed rather than discarded, so the spawn adapter's own wait
/// thread can still recover it through [`take_stolen_exit`] instead of
/// reporting a sentinel failure for what was actually a clean exit.
pub fn reap_once() -> usize {
    let mut count = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
            Ok(status) => {
                count += 1;
                stash_if_supervised(status);
            }
            Err(_) => break,
        }
    }
    count
}

fn stash_if_supervised(status: WaitStatus) {
    let (pid, exit_code, terminated_by_signal) = match status {
        WaitStatus::Exited(pid, code) => (pid, code, None),
        WaitStatus::Signaled(pid, signal, _) => (pid, -1, Some(signal as i32)),
        _ => return,
    };
    let pid = pid.as_raw();
    if !supervised_pids().lock().unwrap().contains(&pid) {
        return;
    }
    stolen_exits().lock().unwrap().insert(pid, StolenExit { exit_code, terminated_by_signal });
}

pub struct Reaper {
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn new(interval: Duration) -> Self {
        Self { interval, handle: None }
    }

    /// Spawns the reaping loop. A no-op on non-PID-1 hosts, since reaping
    /// another process's orphans there would be surprising rather than
    /// helpful.
    pub fn start(&mut self, cancel: Context) {
        if !is_pid1() {
            return;
        }
        let interval = self.interval;
        self.handle = Some(thread::spawn(move || loop {
            reap_once();
            if !cancel.sleep(interval) {
                return;
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
