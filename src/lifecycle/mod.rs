//! Lifecycle manager: the per-service state machine that spawns a
//! process, observes its exit, consults the restart-backoff tracker, and
//! respawns. One runtime `ProcessState` enum drives the transitions rather
//! than a compile-time typestate, since the supervisor keeps a dynamic
//! `name -> manager` map and needs every manager behind one stable type.

use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::backoff::{BackoffConfig, Decision, ExitObservation, RestartBackoffTracker};
use crate::config::ServiceConfig;
use crate::context::Context;
use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use crate::event::{Event, EventKind};
use crate::process::signal::RELOAD_SIGNAL;
use crate::process::spawn::{ExitResult, Spec, SpawnAdapter, SpawnError};
use crate::process::{ProcessInfo, ProcessState};
use crate::stats::ServiceStats;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("service is already running")]
    AlreadyRunning,
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] SpawnError),
    #[error("failed to stop process: {0}")]
    StopFailed(#[source] SpawnError),
}

/// How long the control thread polls the exit stream for, between checks of
/// its own cancellation flag. Not a suspension point itself, but
/// cancellation is still observed within one tick of this.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn backoff_config_from(service: &ServiceConfig) -> BackoffConfig {
    BackoffConfig {
        policy: service.restart.policy.into(),
        oneshot: service.oneshot,
        max_restarts: service.restart.max_restarts,
        initial_delay: service.restart.initial_delay,
        max_delay: service.restart.max_delay,
        backoff_multiplier: service.restart.backoff_multiplier,
        reset_after: service.restart.reset_after,
    }
}

fn spec_from(service: &ServiceConfig) -> Spec {
    Spec {
        command: service.command.clone(),
        args: service.args.clone(),
        env: service.env.clone(),
        working_directory: service.working_directory.clone(),
    }
}

/// Per-service state machine. One instance per configured service, owned
/// exclusively by the supervisor.
pub struct LifecycleManager {
    name: String,
    config: Arc<RwLock<ServiceConfig>>,
    spawn_adapter: Arc<dyn SpawnAdapter>,
    stats: Arc<ServiceStats>,
    backoff: Arc<Mutex<RestartBackoffTracker>>,
    info: Arc<RwLock<ProcessInfo>>,
    publisher: EventPublisher<Event>,
    /// Owned internal cancellation; `stop()` cancels this directly without
    /// touching the root supervisor context, the same ownership split the
    /// probe monitor uses. Replaced with a fresh `Context` on every
    /// `start()` so a manager can be stopped and started again.
    internal_ctx: Mutex<Context>,
    control_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(config: ServiceConfig, spawn_adapter: Arc<dyn SpawnAdapter>) -> (Self, EventConsumer<Event>) {
        Self::with_stats(config, spawn_adapter, Arc::new(ServiceStats::new()))
    }

    /// Like [`Self::new`], but carries over an existing [`ServiceStats`]
    /// instead of starting one at zero. Used when a config reload replaces a
    /// service's manager in place: the service identity persists across the
    /// swap even though the process is respawned, so its counters should too.
    pub fn with_stats(config: ServiceConfig, spawn_adapter: Arc<dyn SpawnAdapter>, stats: Arc<ServiceStats>) -> (Self, EventConsumer<Event>) {
        let (publisher, consumer) = pub_sub::<Event>();
        let backoff = RestartBackoffTracker::new(backoff_config_from(&config));
        let manager = Self {
            name: config.name.clone(),
            config: Arc::new(RwLock::new(config)),
            spawn_adapter,
            stats,
            backoff: Arc::new(Mutex::new(backoff)),
            info: Arc::new(RwLock::new(ProcessInfo::default())),
            publisher,
            internal_ctx: Mutex::new(Context::new()),
            control_thread: Mutex::new(None),
        };
        (manager, consumer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> ProcessState {
        self.info.read().unwrap().state
    }

    pub fn pid(&self) -> u32 {
        self.info.read().unwrap().pid
    }

    pub fn uptime(&self) -> Option<Duration> {
        let info = self.info.read().unwrap();
        if info.state == ProcessState::Running {
            info.started_at.map(|t| t.elapsed())
        } else {
            None
        }
    }

    pub fn status(&self) -> ProcessInfo {
        self.info.read().unwrap().clone()
    }

    fn is_running(&self) -> bool {
        matches!(self.state(), ProcessState::Running | ProcessState::Starting)
    }

    /// Spawns the process and the monitoring thread that awaits its exit
    /// and drives the restart loop. A spawn failure aborts `start()` and
    /// surfaces to the caller; no event is emitted.
    pub fn start(&self) -> Result<(), LifecycleError> {
        if self.is_running() {
            return Err(LifecycleError::AlreadyRunning);
        }
        // The control thread from a previous run may have already returned
        // on its own (exhausted restarts, do-not-restart policy) without
        // anyone calling `stop()`; reap it before starting a fresh one.
        if let Some(handle) = self.control_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        let config = self.config.read().unwrap().clone();
        let (pid, exits) = self
            .spawn_adapter
            .start(&spec_from(&config))
            .map_err(LifecycleError::SpawnFailed)?;

        mark_started(&self.info, pid);
        self.stats.record_start();
        self.publisher.publish(Event::new(self.name.clone(), EventKind::Started).with_pid(pid));

        let ctx = Context::new();
        *self.internal_ctx.lock().unwrap() = ctx.clone();

        let handle = spawn_control_thread(
            self.name.clone(),
            exits,
            self.spawn_adapter.clone(),
            self.stats.clone(),
            self.publisher.clone(),
            ctx,
            self.info.clone(),
            self.backoff.clone(),
            self.config.clone(),
        );
        *self.control_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Sends the configured stop signal, waits up to `stop_timeout`,
    /// escalates to a force kill, then joins the control thread.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        let Some(handle) = self.control_thread.lock().unwrap().take() else {
            return Ok(());
        };

        let _ = self.internal_ctx.lock().unwrap().cancel();
        self.info.write().unwrap().state = ProcessState::Stopping;

        let pid = self.pid();
        if pid != 0 {
            let (stop_signal, stop_timeout): (crate::process::signal::StopSignal, Duration) = {
                let config = self.config.read().unwrap();
                (config.stop_signal.into(), config.stop_timeout)
            };
            if let Err(err) = self.spawn_adapter.stop(pid, stop_signal, stop_timeout) {
                let _ = handle.join();
                self.reset_for_next_start();
                return Err(LifecycleError::StopFailed(err));
            }
        }

        let _ = handle.join();
        self.reset_for_next_start();
        Ok(())
    }

    /// Resets backoff state so a subsequent `start()` begins a fresh
    /// consecutive-failure count rather than inheriting one from the run
    /// that was just stopped.
    fn reset_for_next_start(&self) {
        self.backoff.lock().unwrap().reset();
    }

    /// Sends the adapter's reload signal to the running PID; does not
    /// re-spawn. The new config is stashed so the *next* spawn
    /// (whether from a later `stop()`+`start()` or a crash-restart) uses it.
    pub fn reload(&self, new_config: ServiceConfig) -> Result<(), LifecycleError> {
        *self.config.write().unwrap() = new_config;
        let pid = self.pid();
        if pid != 0 {
            self.spawn_adapter
                .signal(pid, RELOAD_SIGNAL)
                .map_err(LifecycleError::StopFailed)?;
        }
        Ok(())
    }

    /// Equivalent to an internal graceful stop followed by a start. Must
    /// tolerate being called while not Running (becomes a no-op that still
    /// returns ok) and increments the restart counter exactly once.
    pub fn restart_on_health_failure(&self, reason: &str) -> Result<(), LifecycleError> {
        if !self.is_running() {
            return Ok(());
        }
        self.publisher.publish(Event::new(self.name.clone(), EventKind::Restarting).with_error(reason));
        self.stop()?;
        self.start()?;
        self.stats.record_restart();
        Ok(())
    }
}

fn mark_started(info: &RwLock<ProcessInfo>, pid: u32) {
    let mut info = info.write().unwrap();
    info.state = ProcessState::Running;
    info.pid = pid;
    info.started_at = Some(Instant::now());
    info.exit_code = None;
    info.last_error = None;
}

/// The control thread body: awaits the current exit stream, classifies the
/// exit, emits the matching event, consults the backoff tracker, and either
/// respawns in place or terminates the thread.
#[allow(clippy::too_many_arguments)]
fn spawn_control_thread(
    name: String,
    mut exits: EventConsumer<ExitResult>,
    spawn_adapter: Arc<dyn SpawnAdapter>,
    stats: Arc<ServiceStats>,
    publisher: EventPublisher<Event>,
    ctx: Context,
    info: Arc<RwLock<ProcessInfo>>,
    backoff: Arc<Mutex<RestartBackoffTracker>>,
    config: Arc<RwLock<ServiceConfig>>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let exit = loop {
            if let Some(exit) = exits.recv_timeout(EXIT_POLL_INTERVAL) {
                break exit;
            }
        };

        let being_stopped = ctx.is_cancelled();
        let clean = exit.exit_code == 0 || (being_stopped && exit.terminated_by_signal.is_some());
        let abnormal = exit.terminated_by_signal.is_some() && exit.exit_code != 0;

        {
            let mut info = info.write().unwrap();
            info.exit_code = Some(exit.exit_code);
            info.pid = 0;
        }

        if clean {
            publisher.publish(Event::new(name.clone(), EventKind::Stopped).with_exit_code(exit.exit_code));
        } else {
            stats.record_fail();
            publisher.publish(Event::new(name.clone(), EventKind::Failed).with_exit_code(exit.exit_code));
        }

        if being_stopped {
            info.write().unwrap().state = ProcessState::Stopped;
            return;
        }

        let decision = backoff
            .lock()
            .unwrap()
            .observe(ExitObservation { exit_code: exit.exit_code, abnormal }, Instant::now());

        match decision {
            Decision::Restart { delay } => {
                info.write().unwrap().state = ProcessState::Starting;
                publisher.publish(Event::new(name.clone(), EventKind::Restarting));
                if !ctx.sleep(delay) {
                    info.write().unwrap().state = ProcessState::Stopped;
                    return;
                }

                let current_config = config.read().unwrap().clone();
                match spawn_adapter.start(&spec_from(&current_config)) {
                    Ok((pid, new_exits)) => {
                        exits = new_exits;
                        mark_started(&info, pid);
                        stats.record_start();
                        stats.record_restart();
                        publisher.publish(Event::new(name.clone(), EventKind::Started).with_pid(pid));
                    }
                    Err(err) => {
                        let mut info = info.write().unwrap();
                        info.state = ProcessState::Failed;
                        info.last_error = Some(err.to_string());
                        return;
                    }
                }
            }
            Decision::Exhausted => {
                info.write().unwrap().state = ProcessState::Stopped;
                publisher.publish(Event::new(name.clone(), EventKind::Exhausted));
                return;
            }
            Decision::DoNotRestart => {
                info.write().unwrap().state = ProcessState::Stopped;
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RestartPolicyKind;
    use crate::config::{RestartConfig, RestartPolicyConfig, StopSignalConfig};
    use std::time::Duration;

    fn service(command: &str, args: Vec<&str>) -> ServiceConfig {
        ServiceConfig {
            name: "svc".into(),
            command: command.into(),
            args: args.into_iter().map(String::from).collect(),
            stop_timeout: Duration::from_secs(2),
            stop_signal: StopSignalConfig::Term,
            ..Default::default()
        }
    }

    #[test]
    fn happy_start_stop_emits_started_then_stopped() {
        let (manager, events) = LifecycleManager::new(
            {
                let mut cfg = service("/bin/echo", vec!["hello"]);
                cfg.oneshot = true;
                cfg.restart.policy = RestartPolicyConfig::Never;
                cfg
            },
            Arc::new(crate::process::spawn::StdSpawnAdapter::new()),
        );

        manager.start().unwrap();
        let started = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(started.kind, EventKind::Started);
        assert!(started.pid > 0);

        let stopped = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(stopped.kind, EventKind::Stopped);
        assert_eq!(stopped.exit_code, Some(0));

        let snap = manager.stats().snapshot();
        assert_eq!(snap.start_count, 1);
        assert_eq!(snap.stop_count, 0);
        assert_eq!(snap.fail_count, 0);

        manager.stop().unwrap();
    }

    #[test]
    fn crash_and_restart_exhausts_after_max_restarts() {
        let mut cfg = service("/bin/sh", vec!["-c", "exit 1"]);
        cfg.restart = RestartConfig {
            policy: RestartPolicyConfig::Always,
            max_restarts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            reset_after: Duration::from_secs(3600),
        };

        let (manager, events) = LifecycleManager::new(cfg, Arc::new(crate::process::spawn::StdSpawnAdapter::new()));
        manager.start().unwrap();

        let mut restarting_count = 0;
        let mut saw_exhausted = false;
        for _ in 0..40 {
            let Some(event) = events.recv_timeout(Duration::from_secs(2)) else { break };
            match event.kind {
                EventKind::Restarting => restarting_count += 1,
                EventKind::Exhausted => {
                    saw_exhausted = true;
                    break;
                }
                _ => {}
            }
        }

        assert!(saw_exhausted, "expected the service to exhaust its restart budget");
        assert_eq!(restarting_count, 3);
        assert_eq!(manager.stats().snapshot().restart_count, 3);
        assert_eq!(manager.stats().snapshot().fail_count, 4);
    }

    #[test]
    fn stop_on_a_never_started_manager_is_a_no_op() {
        let (manager, _events) =
            LifecycleManager::new(service("/bin/true", vec![]), Arc::new(crate::process::spawn::StdSpawnAdapter::new()));
        assert!(manager.stop().is_ok());
    }

    #[test]
    fn restart_on_health_failure_is_a_no_op_when_not_running() {
        let (manager, _events) =
            LifecycleManager::new(service("/bin/true", vec![]), Arc::new(crate::process::spawn::StdSpawnAdapter::new()));
        assert!(manager.restart_on_health_failure("listener down").is_ok());
        assert_eq!(manager.stats().snapshot().restart_count, 0);
    }

    #[test]
    fn restart_on_health_failure_increments_restart_count_exactly_once() {
        let mut cfg = service("/bin/sh", vec!["-c", "trap 'exit 0' TERM; while true; do sleep 1; done"]);
        cfg.restart.policy = RestartPolicyConfig::Never;
        let (manager, events) = LifecycleManager::new(cfg, Arc::new(crate::process::spawn::StdSpawnAdapter::new()));

        manager.start().unwrap();
        assert_eq!(events.recv_timeout(Duration::from_secs(2)).unwrap().kind, EventKind::Started);

        manager.restart_on_health_failure("port 18080 unreachable").unwrap();
        assert_eq!(manager.stats().snapshot().restart_count, 1);
        assert_eq!(manager.state(), ProcessState::Running);

        manager.stop().unwrap();
    }

    #[test]
    fn stop_timeout_zero_force_kills_immediately() {
        let mut cfg = service("/bin/sh", vec!["-c", "trap '' TERM; while true; do sleep 1; done"]);
        cfg.stop_timeout = Duration::ZERO;
        let (manager, events) = LifecycleManager::new(cfg, Arc::new(crate::process::spawn::StdSpawnAdapter::new()));

        manager.start().unwrap();
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        manager.stop().unwrap();
        assert_eq!(manager.state(), ProcessState::Stopped);
    }

    #[test]
    fn reload_stashes_config_without_respawning() {
        let (manager, events) = LifecycleManager::new(
            service("/bin/sh", vec!["-c", "trap 'exit 0' HUP; while true; do sleep 1; done"]),
            Arc::new(crate::process::spawn::StdSpawnAdapter::new()),
        );
        manager.start().unwrap();
        events.recv_timeout(Duration::from_secs(2)).unwrap();
        let pid_before = manager.pid();

        let mut updated = service("/bin/echo", vec!["new-command"]);
        updated.name = "svc".into();
        manager.reload(updated).unwrap();

        // HUP delivered, not a respawn: exit event should be Stopped(0),
        // observed pid does not change until the next real spawn.
        assert_eq!(pid_before, manager.pid());
        manager.stop().unwrap();
    }

    #[test]
    fn never_policy_does_not_restart_after_crash() {
        let mut cfg = service("/bin/sh", vec!["-c", "exit 1"]);
        cfg.restart.policy = RestartPolicyConfig::Never;
        let (manager, events) = LifecycleManager::new(cfg, Arc::new(crate::process::spawn::StdSpawnAdapter::new()));

        manager.start().unwrap();
        assert_eq!(events.recv_timeout(Duration::from_secs(2)).unwrap().kind, EventKind::Started);
        let failed = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(failed.kind, EventKind::Failed);
        assert!(events.recv_timeout(Duration::from_millis(200)).is_none());
        assert_eq!(manager.state(), ProcessState::Stopped);
    }

    #[test]
    fn policy_kind_conversion_is_total() {
        assert_eq!(RestartPolicyKind::from(RestartPolicyConfig::Never), RestartPolicyKind::Never);
        assert_eq!(RestartPolicyKind::from(RestartPolicyConfig::OnFailure), RestartPolicyKind::OnFailure);
        assert_eq!(RestartPolicyKind::from(RestartPolicyConfig::Always), RestartPolicyKind::Always);
    }
}
