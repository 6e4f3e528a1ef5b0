use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;

use crate::event::channel::{pub_sub, EventConsumer};

use super::signal::StopSignal;

/// One process to launch, the spawn-adapter port's input.
#[derive(Clone, Debug, Default)]
pub struct Spec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

/// What the spawn adapter reports once the process has exited. Exactly one
/// is produced per spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitResult {
    pub exit_code: i32,
    pub terminated_by_signal: Option<i32>,
}

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process {0} not found")]
    NotFound(u32),
    #[error("signal error: {0}")]
    Signal(#[source] nix::Error),
}

/// Spawn adapter port: start/stop/signal, abstracted so the core never
/// branches on the concrete OS mechanism.
pub trait SpawnAdapter: Send + Sync {
    /// Starts `spec` and returns its pid plus a stream that yields exactly
    /// one [`ExitResult`] when the process exits.
    fn start(&self, spec: &Spec) -> Result<(u32, EventConsumer<ExitResult>), SpawnError>;

    /// Sends `stop_signal`, waits up to `timeout`, escalates to a force kill
    /// if the process is still alive afterwards.
    fn stop(&self, pid: u32, stop_signal: StopSignal, timeout: Duration) -> Result<(), SpawnError>;

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), SpawnError>;
}

/// Default adapter: `std::process::Command` for spawning, `nix` for
/// signalling, one thread per child to observe its exit.
#[derive(Debug, Default)]
pub struct StdSpawnAdapter;

impl StdSpawnAdapter {
    pub fn new() -> Self {
        Self
    }

    fn process_exists(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

impl SpawnAdapter for StdSpawnAdapter {
    fn start(&self, spec: &Spec) -> Result<(u32, EventConsumer<ExitResult>), SpawnError> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &spec.working_directory {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Spawn {
            command: spec.command.clone(),
            source,
        })?;
        let pid = child.id();

        // A zombie reaper running as pid 1 can win the race to `waitpid`
        // against this thread's own `child.wait()`. Registering the pid
        // lets the reaper hand the exit status back instead of swallowing
        // it; see `reaper::take_stolen_exit`.
        crate::reaper::register_supervised(pid as i32);

        let (tx, rx) = pub_sub::<ExitResult>();
        thread::spawn(move || {
            let result = match child.wait() {
                Ok(status) => exit_result_from_status(status),
                Err(_) => match crate::reaper::take_stolen_exit(pid as i32) {
                    Some((exit_code, terminated_by_signal)) => ExitResult { exit_code, terminated_by_signal },
                    None => ExitResult {
                        exit_code: -1,
                        terminated_by_signal: None,
                    },
                },
            };
            crate::reaper::unregister_supervised(pid as i32);
            tx.publish(result);
        });

        Ok((pid, rx))
    }

    fn stop(&self, pid: u32, stop_signal: StopSignal, timeout: Duration) -> Result<(), SpawnError> {
        if !Self::process_exists(pid) {
            return Ok(());
        }
        self.signal(pid, stop_signal)?;

        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if !Self::process_exists(pid) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(20));
        }

        if Self::process_exists(pid) {
            self.signal(pid, StopSignal::Kill)?;
        }
        Ok(())
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), SpawnError> {
        kill(Pid::from_raw(pid as i32), signal.as_nix_signal()).map_err(SpawnError::Signal)
    }
}

#[cfg(unix)]
fn exit_result_from_status(status: std::process::ExitStatus) -> ExitResult {
    use std::os::unix::process::ExitStatusExt;
    ExitResult {
        exit_code: status.code().unwrap_or(-1),
        terminated_by_signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_result_from_status(status: std::process::ExitStatus) -> ExitResult {
    ExitResult {
        exit_code: status.code().unwrap_or(-1),
        terminated_by_signal: None,
    }
}
