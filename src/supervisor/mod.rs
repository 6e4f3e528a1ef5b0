//! Supervisor: the top-level object. Owns every lifecycle manager and
//! probe monitor behind one read-write lock, drives the global
//! `Stopped -> Starting -> Running -> Stopping -> Stopped` state machine, and
//! is the only thing that ever calls `handle_event`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigLoader, ListenerConfig, Protocol, RootConfig, ServiceConfig};
use crate::context::Context;
use crate::discovery::{DefaultPortDiscoverer, PortDiscoverer};
use crate::event::channel::EventConsumer;
use crate::event::{Event, EventKind};
use crate::lifecycle::{LifecycleError, LifecycleManager};
use crate::metrics::MetricsTracker;
use crate::probe::factory::ProberFactory;
use crate::probe::monitor::{HealthState, ListenerBinding, MonitorCallbacks, ProbeMonitor, ProcessStateInput};
use crate::probe::ProbeTarget;
use crate::process::ProcessState;
use crate::process::spawn::SpawnAdapter;
use crate::reaper::Reaper;
use crate::stats::StatsSnapshot;

const OP_STOP: &str = "stop";
const OP_STOP_FOR_RELOAD: &str = "stop-for-reload";
const OP_START_FOR_RELOAD: &str = "start-for-reload";
const OP_START_NEW_SERVICE: &str = "start-new-service";
const OP_STOP_REMOVED_SERVICE: &str = "stop-removed-service";
const OP_HEALTH_RESTART: &str = "health-restart";
const OP_ADD_LISTENER: &str = "add-listener";

/// How long an event-forwarding thread waits for the next event before
/// checking whether its root context was cancelled.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("supervisor is already running")]
    AlreadyRunning,
    #[error("supervisor is not running")]
    NotRunning,
    #[error("service `{0}` not found")]
    ServiceNotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to start service `{service}`: {source}")]
    SpawnFailed { service: String, #[source] source: LifecycleError },
    #[error("failed to stop service `{service}`: {source}")]
    StopFailed { service: String, #[source] source: LifecycleError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SupervisorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone, Debug)]
pub struct ServiceInfo {
    pub name: String,
    pub state: ProcessState,
    pub pid: u32,
    pub uptime: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerSnapshot {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub exposed: bool,
    pub listening: bool,
    /// 0 = OK (listening), 2 = Error (declared but not observed listening).
    pub status: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSnapshot {
    pub name: String,
    pub state: ProcessState,
    pub pid: u32,
    pub uptime_secs: u64,
    pub has_health_checks: bool,
    /// 0 = Unknown, 1 = Healthy, 2 = Unhealthy.
    pub health_status: i32,
    pub restart_count: u64,
    pub cpu_percent: f64,
    pub memory_rss: u64,
    pub listening_ports: Vec<u16>,
    pub listeners: Vec<ListenerSnapshot>,
}

type EventHandler = dyn Fn(&str, &Event, StatsSnapshot) + Send + Sync;
type ErrorHandler = dyn Fn(&str, &str, &str) + Send + Sync;

struct Inner {
    state: SupervisorState,
    config: RootConfig,
    managers: HashMap<String, Arc<LifecycleManager>>,
    health_monitors: HashMap<String, Arc<ProbeMonitor>>,
    event_handler: Option<Arc<EventHandler>>,
    error_handler: Option<Arc<ErrorHandler>>,
    prober_factory: Option<Arc<dyn ProberFactory>>,
    metrics_tracker: Option<Arc<dyn MetricsTracker>>,
}

/// Owns every manager and monitor exclusively. The health-restart path from
/// a probe monitor back into this struct is a weak call-by-name, never a
/// strong `Arc`, so a monitor outliving its supervisor (which cannot happen
/// in practice, since the supervisor owns it) could never keep it alive
/// artificially.
pub struct Supervisor<L: ConfigLoader> {
    inner: RwLock<Inner>,
    config_path: PathBuf,
    loader: Arc<L>,
    spawn_adapter: Arc<dyn SpawnAdapter>,
    port_discoverer: Arc<dyn PortDiscoverer>,
    reaper: Mutex<Option<Reaper>>,
    root_ctx: Mutex<Option<Context>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl<L: ConfigLoader + Send + Sync + 'static> Supervisor<L> {
    pub fn new(
        config: RootConfig,
        config_path: PathBuf,
        loader: Arc<L>,
        spawn_adapter: Arc<dyn SpawnAdapter>,
        reaper: Option<Reaper>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                state: SupervisorState::Stopped,
                config,
                managers: HashMap::new(),
                health_monitors: HashMap::new(),
                event_handler: None,
                error_handler: None,
                prober_factory: None,
                metrics_tracker: None,
            }),
            config_path,
            loader,
            spawn_adapter,
            port_discoverer: Arc::new(DefaultPortDiscoverer::default()),
            reaper: Mutex::new(reaper),
            root_ctx: Mutex::new(None),
            forwarders: Mutex::new(Vec::new()),
        })
    }

    pub fn set_event_handler(&self, handler: impl Fn(&str, &Event, StatsSnapshot) + Send + Sync + 'static) {
        self.inner.write().unwrap().event_handler = Some(Arc::new(handler));
    }

    pub fn set_error_handler(&self, handler: impl Fn(&str, &str, &str) + Send + Sync + 'static) {
        self.inner.write().unwrap().error_handler = Some(Arc::new(handler));
    }

    pub fn set_prober_factory(&self, factory: Arc<dyn ProberFactory>) {
        self.inner.write().unwrap().prober_factory = Some(factory);
    }

    pub fn set_metrics_tracker(&self, tracker: Arc<dyn MetricsTracker>) {
        self.inner.write().unwrap().metrics_tracker = Some(tracker);
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.read().unwrap().state
    }

    pub fn services(&self) -> HashMap<String, ServiceInfo> {
        let inner = self.inner.read().unwrap();
        inner
            .managers
            .iter()
            .map(|(name, manager)| {
                (
                    name.clone(),
                    ServiceInfo {
                        name: name.clone(),
                        state: manager.state(),
                        pid: manager.pid(),
                        uptime: manager.uptime(),
                    },
                )
            })
            .collect()
    }

    pub fn stats(&self, name: &str) -> Option<StatsSnapshot> {
        self.inner.read().unwrap().managers.get(name).map(|m| m.stats().snapshot())
    }

    pub fn all_stats(&self) -> HashMap<String, StatsSnapshot> {
        self.inner
            .read()
            .unwrap()
            .managers
            .iter()
            .map(|(name, manager)| (name.clone(), manager.stats().snapshot()))
            .collect()
    }

    fn manager(&self, name: &str) -> Result<Arc<LifecycleManager>, SupervisorError> {
        self.inner
            .read()
            .unwrap()
            .managers
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::ServiceNotFound(name.to_string()))
    }

    fn report_error(&self, operation_tag: &str, service: &str, error: &str) {
        let handler = self.inner.read().unwrap().error_handler.clone();
        if let Some(handler) = handler {
            handler(operation_tag, service, error);
        }
    }

    pub fn start_service(&self, name: &str) -> Result<(), SupervisorError> {
        let manager = self.manager(name)?;
        manager
            .start()
            .map_err(|source| SupervisorError::SpawnFailed { service: name.to_string(), source })
    }

    pub fn stop_service(&self, name: &str) -> Result<(), SupervisorError> {
        let manager = self.manager(name)?;
        manager
            .stop()
            .map_err(|source| SupervisorError::StopFailed { service: name.to_string(), source })
    }

    pub fn restart_service(&self, name: &str) -> Result<(), SupervisorError> {
        self.stop_service(name)?;
        self.start_service(name)
    }

    /// Looked up by name, delegated to the manager; the manager's own failure
    /// (if any) is a best-effort recovery error, never surfaced as a return
    /// value.
    pub fn restart_on_health_failure(&self, name: &str, reason: &str) -> Result<(), SupervisorError> {
        let manager = self.manager(name)?;
        if let Err(err) = manager.restart_on_health_failure(reason) {
            self.report_error(OP_HEALTH_RESTART, name, &err.to_string());
        }
        Ok(())
    }

    /// Stats bookkeeping is split deliberately: `start_count`, `fail_count`,
    /// and `restart_count` are written by the lifecycle manager itself at the
    /// moment they happen (so a manager driven directly, without a
    /// supervisor, keeps correct stats). `stop_count` has no such direct
    /// writer and is written here instead.
    fn handle_event(&self, name: &str, event: Event) {
        let (health_monitor, metrics_tracker) = {
            let inner = self.inner.read().unwrap();
            (inner.health_monitors.get(name).cloned(), inner.metrics_tracker.clone())
        };

        if let Some(manager) = self.inner.read().unwrap().managers.get(name).cloned() {
            if event.kind == EventKind::Stopped {
                manager.stats().record_stop();
            }
        }

        if let Some(monitor) = &health_monitor {
            match event.kind {
                EventKind::Started => monitor.set_process_state(ProcessStateInput::Running),
                EventKind::Stopped | EventKind::Failed | EventKind::Exhausted => {
                    monitor.set_process_state(ProcessStateInput::Stopped)
                }
                _ => {}
            }
        }

        if let Some(tracker) = &metrics_tracker {
            match event.kind {
                EventKind::Started if event.pid > 0 => {
                    let _ = tracker.track(name, event.pid);
                }
                EventKind::Stopped | EventKind::Failed | EventKind::Exhausted => tracker.untrack(name),
                _ => {}
            }
        }

        let (handler, snapshot) = {
            let inner = self.inner.read().unwrap();
            let snapshot = inner.managers.get(name).map(|m| m.stats().snapshot()).unwrap_or_default();
            (inner.event_handler.clone(), snapshot)
        };
        if let Some(handler) = handler {
            handler(name, &event, snapshot);
        }
    }

    fn spawn_forwarder(self: &Arc<Self>, name: String, consumer: EventConsumer<Event>, ctx: Context) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        thread::spawn(move || loop {
            if let Some(event) = consumer.recv_timeout(EVENT_POLL_INTERVAL) {
                supervisor.handle_event(&name, event);
            } else if ctx.is_cancelled() {
                return;
            }
        })
    }

    /// Builds a monitor whose callbacks call back into this supervisor by
    /// name through a weak reference, not a strong `Arc`.
    fn new_probe_monitor(self: &Arc<Self>, service_name: String) -> ProbeMonitor {
        let healthy_weak: Weak<Self> = Arc::downgrade(self);
        let healthy_name = service_name.clone();
        let unhealthy_weak: Weak<Self> = Arc::downgrade(self);
        let unhealthy_name = service_name;

        ProbeMonitor::new(MonitorCallbacks {
            on_healthy: Box::new(move |_listener| {
                if let Some(supervisor) = healthy_weak.upgrade() {
                    let event = Event::new(healthy_name.clone(), EventKind::Healthy);
                    supervisor.handle_event(&healthy_name, event);
                }
            }),
            on_unhealthy: Box::new(move |_listener, reason| {
                if let Some(supervisor) = unhealthy_weak.upgrade() {
                    let _ = supervisor.restart_on_health_failure(&unhealthy_name, reason);
                }
            }),
            on_state_change: Box::new(|_, _, _, _| {}),
        })
    }

    fn build_monitor_for_service(
        self: &Arc<Self>,
        service: &ServiceConfig,
        factory: &Arc<dyn ProberFactory>,
        ctx: &Context,
    ) -> Option<Arc<ProbeMonitor>> {
        let probed: Vec<&ListenerConfig> = service.listeners.iter().filter(|l| l.probe.is_some()).collect();
        if probed.is_empty() {
            return None;
        }

        let monitor = Arc::new(self.new_probe_monitor(service.name.clone()));
        for listener in probed {
            let probe_config = listener.probe.clone().expect("filtered for Some above");
            let prober = factory.create(probe_config.probe_type, probe_config.timeout);
            let binding = ListenerBinding {
                name: listener.name.clone(),
                target: ProbeTarget { address: listener.address.clone(), port: listener.port },
                prober,
                config: probe_config,
            };
            if let Err(err) = monitor.register_binding(binding) {
                self.report_error(OP_ADD_LISTENER, &service.name, &err.to_string());
            }
        }
        monitor.start(ctx.clone());
        Some(monitor)
    }

    /// (1) validate the transition and create a cancellable context; (2)
    /// start the reaper; (3) start every manager, rolling back on the first
    /// failure; (4) spawn one event-forwarder per manager; (5) build and
    /// start a probe monitor for every service with at least one probed
    /// listener; (6) transition to `Running`.
    pub fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let (service_configs, prober_factory) = {
            let mut inner = self.inner.write().unwrap();
            if inner.state != SupervisorState::Stopped {
                return Err(SupervisorError::AlreadyRunning);
            }
            inner.state = SupervisorState::Starting;
            (inner.config.services.clone(), inner.prober_factory.clone())
        };

        let ctx = Context::new();
        *self.root_ctx.lock().unwrap() = Some(ctx.clone());

        if let Some(reaper) = self.reaper.lock().unwrap().as_mut() {
            reaper.start(ctx.clone());
        }

        let mut started: Vec<(String, Arc<LifecycleManager>, EventConsumer<Event>)> = Vec::new();
        for service in &service_configs {
            let (manager, consumer) = LifecycleManager::new(service.clone(), self.spawn_adapter.clone());
            let manager = Arc::new(manager);
            if let Err(err) = manager.start() {
                for (_, started_manager, _) in &started {
                    let _ = started_manager.stop();
                }
                if let Some(reaper) = self.reaper.lock().unwrap().as_mut() {
                    reaper.stop();
                }
                self.inner.write().unwrap().state = SupervisorState::Stopped;
                return Err(SupervisorError::SpawnFailed { service: service.name.clone(), source: err });
            }
            started.push((service.name.clone(), manager, consumer));
        }

        let mut forwarders = Vec::new();
        let mut managers = HashMap::new();
        for (name, manager, consumer) in started {
            forwarders.push(self.spawn_forwarder(name.clone(), consumer, ctx.clone()));
            managers.insert(name, manager);
        }

        let mut health_monitors = HashMap::new();
        if let Some(factory) = &prober_factory {
            for service in &service_configs {
                if let Some(monitor) = self.build_monitor_for_service(service, factory, &ctx) {
                    health_monitors.insert(service.name.clone(), monitor);
                }
            }
        }

        {
            let mut inner = self.inner.write().unwrap();
            inner.managers = managers;
            inner.health_monitors = health_monitors;
            inner.state = SupervisorState::Running;
        }
        *self.forwarders.lock().unwrap() = forwarders;

        Ok(())
    }

    /// Transitions to `Stopping`, cancels the root context, stops every
    /// probe monitor, stops every manager concurrently, waits for the
    /// event-forwarders, stops the reaper, transitions to `Stopped`. A
    /// no-op returning ok when not `Running`.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let (managers, monitors, ctx) = {
            let mut inner = self.inner.write().unwrap();
            if inner.state != SupervisorState::Running {
                return Ok(());
            }
            inner.state = SupervisorState::Stopping;
            let managers: Vec<Arc<LifecycleManager>> = inner.managers.values().cloned().collect();
            let monitors: Vec<Arc<ProbeMonitor>> = inner.health_monitors.values().cloned().collect();
            (managers, monitors, self.root_ctx.lock().unwrap().take())
        };

        if let Some(ctx) = &ctx {
            let _ = ctx.cancel();
        }

        for monitor in &monitors {
            monitor.stop();
        }

        let error_handler = self.inner.read().unwrap().error_handler.clone();
        let handles: Vec<JoinHandle<()>> = managers
            .into_iter()
            .map(|manager| {
                let name = manager.name().to_string();
                let error_handler = error_handler.clone();
                thread::spawn(move || {
                    if let Err(err) = manager.stop() {
                        if let Some(handler) = error_handler {
                            handler(OP_STOP, &name, &err.to_string());
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }

        for handle in self.forwarders.lock().unwrap().drain(..) {
            let _ = handle.join();
        }

        if let Some(reaper) = self.reaper.lock().unwrap().as_mut() {
            reaper.stop();
        }

        let mut inner = self.inner.write().unwrap();
        inner.managers.clear();
        inner.health_monitors.clear();
        inner.state = SupervisorState::Stopped;
        Ok(())
    }

    /// Requires `Running`. Reads the config under no lock (`loader.load` is
    /// I/O), then re-checks the transition under the write-lock before
    /// diffing service names and stopping/recreating/starting as needed.
    pub fn reload(self: &Arc<Self>) -> Result<(), SupervisorError> {
        {
            let inner = self.inner.read().unwrap();
            if inner.state != SupervisorState::Running {
                return Err(SupervisorError::NotRunning);
            }
        }

        let new_config = self
            .loader
            .load(&self.config_path)
            .map_err(|err| SupervisorError::InvalidConfiguration(err.to_string()))?;

        type RemovedEntry = (String, Arc<LifecycleManager>, Option<Arc<ProbeMonitor>>);
        type UpdatedEntry = (ServiceConfig, Arc<LifecycleManager>, Option<Arc<ProbeMonitor>>);

        let (to_remove, to_update, to_add, prober_factory): (Vec<RemovedEntry>, Vec<UpdatedEntry>, Vec<ServiceConfig>, _) = {
            let inner = self.inner.write().unwrap();
            if inner.state != SupervisorState::Running {
                return Err(SupervisorError::NotRunning);
            }

            let new_names: HashSet<&str> = new_config.services.iter().map(|s| s.name.as_str()).collect();
            let old_names: HashSet<&str> = inner.config.services.iter().map(|s| s.name.as_str()).collect();

            let to_remove = inner
                .managers
                .iter()
                .filter(|(name, _)| !new_names.contains(name.as_str()))
                .map(|(name, manager)| (name.clone(), manager.clone(), inner.health_monitors.get(name).cloned()))
                .collect();

            let to_update = new_config
                .services
                .iter()
                .filter(|s| old_names.contains(s.name.as_str()))
                .filter_map(|s| {
                    inner
                        .managers
                        .get(&s.name)
                        .map(|m| (s.clone(), m.clone(), inner.health_monitors.get(&s.name).cloned()))
                })
                .collect();

            let to_add = new_config
                .services
                .iter()
                .filter(|s| !old_names.contains(s.name.as_str()))
                .cloned()
                .collect();

            (to_remove, to_update, to_add, inner.prober_factory.clone())
        };

        for (name, manager, monitor) in &to_remove {
            if let Some(monitor) = monitor {
                monitor.stop();
            }
            if let Err(err) = manager.stop() {
                self.report_error(OP_STOP_REMOVED_SERVICE, name, &err.to_string());
            }
        }

        let ctx = self.root_ctx.lock().unwrap().clone().unwrap_or_default();
        let mut fresh: Vec<(String, Arc<LifecycleManager>, EventConsumer<Event>)> = Vec::new();

        for (config, old_manager, monitor) in to_update {
            if let Some(monitor) = &monitor {
                monitor.stop();
            }
            if let Err(err) = old_manager.stop() {
                self.report_error(OP_STOP_FOR_RELOAD, &config.name, &err.to_string());
            }
            let (manager, consumer) = LifecycleManager::with_stats(config.clone(), self.spawn_adapter.clone(), old_manager.stats());
            let manager = Arc::new(manager);
            if let Err(err) = manager.start() {
                self.report_error(OP_START_FOR_RELOAD, &config.name, &err.to_string());
            }
            fresh.push((config.name.clone(), manager, consumer));
        }

        for config in &to_add {
            let (manager, consumer) = LifecycleManager::new(config.clone(), self.spawn_adapter.clone());
            let manager = Arc::new(manager);
            if let Err(err) = manager.start() {
                self.report_error(OP_START_NEW_SERVICE, &config.name, &err.to_string());
            }
            fresh.push((config.name.clone(), manager, consumer));
        }

        let mut new_forwarders = Vec::new();
        let mut new_managers = HashMap::new();
        let mut new_monitors = HashMap::new();
        for (name, manager, consumer) in fresh {
            new_forwarders.push(self.spawn_forwarder(name.clone(), consumer, ctx.clone()));
            if let Some(factory) = &prober_factory {
                if let Some(service) = new_config.services.iter().find(|s| s.name == name) {
                    if let Some(monitor) = self.build_monitor_for_service(service, factory, &ctx) {
                        new_monitors.insert(name.clone(), monitor);
                    }
                }
            }
            new_managers.insert(name, manager);
        }

        {
            let mut inner = self.inner.write().unwrap();
            for (name, _, _) in &to_remove {
                inner.managers.remove(name);
                inner.health_monitors.remove(name);
            }
            for (name, manager) in new_managers {
                inner.managers.insert(name, manager);
            }
            for (name, monitor) in new_monitors {
                inner.health_monitors.insert(name, monitor);
            }
            inner.config = new_config;
        }
        self.forwarders.lock().unwrap().extend(new_forwarders);

        Ok(())
    }

    fn health_status_code(state: HealthState) -> i32 {
        match state {
            HealthState::Unknown => 0,
            HealthState::Healthy => 1,
            HealthState::Unhealthy => 2,
        }
    }

    /// One snapshot per service, sorted by name, with no references into
    /// internal state.
    pub fn service_snapshots_for_tui(&self) -> Vec<ServiceSnapshot> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<&String> = inner.managers.keys().collect();
        names.sort();

        let mut snapshots = Vec::with_capacity(names.len());
        for name in names {
            let manager = &inner.managers[name];
            let info = manager.status();
            let stats = manager.stats().snapshot();
            let health_monitor = inner.health_monitors.get(name);
            let health_status = health_monitor.map(|m| m.status()).unwrap_or(HealthState::Unknown);

            let listening_ports = if info.pid > 0 {
                self.port_discoverer.listening_ports(info.pid as i32).unwrap_or_default()
            } else {
                Vec::new()
            };

            let listeners = inner
                .config
                .services
                .iter()
                .find(|s| &s.name == name)
                .map(|service| {
                    service
                        .listeners
                        .iter()
                        .map(|listener| {
                            let listening = listening_ports.contains(&listener.port);
                            ListenerSnapshot {
                                name: listener.name.clone(),
                                port: listener.port,
                                protocol: listener.protocol,
                                exposed: listener.exposed,
                                listening,
                                status: if listening { 0 } else { 2 },
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();

            let metrics = inner.metrics_tracker.as_ref().and_then(|t| t.get(name));

            snapshots.push(ServiceSnapshot {
                name: name.clone(),
                state: info.state,
                pid: info.pid,
                uptime_secs: manager.uptime().map(|d| d.as_secs()).unwrap_or(0),
                has_health_checks: health_monitor.is_some(),
                health_status: Self::health_status_code(health_status),
                restart_count: stats.restart_count,
                cpu_percent: metrics.map(|m| m.cpu_percent).unwrap_or(0.0),
                memory_rss: metrics.map(|m| m.memory_rss).unwrap_or(0),
                listening_ports,
                listeners,
            });
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RestartConfig, RestartPolicyConfig, StopSignalConfig};
    use crate::process::spawn::StdSpawnAdapter;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    #[derive(Debug, Error)]
    #[error("stub loader error")]
    struct StubLoaderError;

    struct StubLoader(StdMutex<RootConfig>);

    impl ConfigLoader for StubLoader {
        type Error = StubLoaderError;
        fn load(&self, _path: &Path) -> Result<RootConfig, Self::Error> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn service(name: &str, command: &str, args: Vec<&str>) -> ServiceConfig {
        ServiceConfig {
            name: name.into(),
            command: command.into(),
            args: args.into_iter().map(String::from).collect(),
            stop_timeout: Duration::from_secs(2),
            stop_signal: StopSignalConfig::Term,
            ..Default::default()
        }
    }

    fn long_lived(name: &str) -> ServiceConfig {
        let mut cfg = service(name, "/bin/sh", vec!["-c", "trap 'exit 0' TERM; while true; do sleep 1; done"]);
        cfg.restart.policy = RestartPolicyConfig::Never;
        cfg
    }

    fn supervisor_with(services: Vec<ServiceConfig>) -> Arc<Supervisor<StubLoader>> {
        let config = RootConfig { version: "1".into(), config_path: None, services };
        Supervisor::new(
            config.clone(),
            PathBuf::from("unused.yaml"),
            Arc::new(StubLoader(StdMutex::new(config))),
            Arc::new(StdSpawnAdapter::new()),
            None,
        )
    }

    fn poll_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        predicate()
    }

    #[test]
    fn happy_start_then_stop_runs_full_lifecycle() {
        let mut cfg = service("echo", "/bin/echo", vec!["hello"]);
        cfg.oneshot = true;
        cfg.restart.policy = RestartPolicyConfig::Never;
        let supervisor = supervisor_with(vec![cfg]);

        supervisor.start().unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);

        assert!(poll_until(
            || supervisor.stats("echo").map(|s| s.stop_count == 1).unwrap_or(false),
            Duration::from_secs(2)
        ));
        let snap = supervisor.stats("echo").unwrap();
        assert_eq!(snap.start_count, 1);
        assert_eq!(snap.stop_count, 1);
        assert_eq!(snap.fail_count, 0);

        supervisor.stop().unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[test]
    fn start_on_a_running_supervisor_is_already_running() {
        let supervisor = supervisor_with(vec![long_lived("web")]);
        supervisor.start().unwrap();
        assert!(matches!(supervisor.start(), Err(SupervisorError::AlreadyRunning)));
        supervisor.stop().unwrap();
    }

    #[test]
    fn stop_on_a_stopped_supervisor_is_a_no_op() {
        let supervisor = supervisor_with(vec![]);
        assert!(supervisor.stop().is_ok());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[test]
    fn reload_on_a_stopped_supervisor_is_not_running() {
        let supervisor = supervisor_with(vec![]);
        assert!(matches!(supervisor.reload(), Err(SupervisorError::NotRunning)));
    }

    #[test]
    fn unknown_service_name_is_rejected_for_manual_operations() {
        let supervisor = supervisor_with(vec![long_lived("web")]);
        supervisor.start().unwrap();
        assert!(matches!(supervisor.start_service("ghost"), Err(SupervisorError::ServiceNotFound(_))));
        assert!(matches!(supervisor.stop_service("ghost"), Err(SupervisorError::ServiceNotFound(_))));
        assert!(matches!(supervisor.restart_on_health_failure("ghost", "down"), Err(SupervisorError::ServiceNotFound(_))));
        supervisor.stop().unwrap();
    }

    #[test]
    fn reload_adds_updates_and_removes_services() {
        let initial = vec![long_lived("a"), long_lived("b")];
        let config = RootConfig { version: "1".into(), config_path: None, services: initial };
        let loader = Arc::new(StubLoader(StdMutex::new(config.clone())));
        let supervisor = Supervisor::new(config, PathBuf::from("unused.yaml"), loader.clone(), Arc::new(StdSpawnAdapter::new()), None);

        supervisor.start().unwrap();
        assert_eq!(supervisor.services().len(), 2);

        let mut updated_a = long_lived("a");
        updated_a.command = "/bin/echo".into();
        let new_config = RootConfig {
            version: "1".into(),
            config_path: None,
            services: vec![updated_a, long_lived("c")],
        };
        *loader.0.lock().unwrap() = new_config;

        supervisor.reload().unwrap();

        let services = supervisor.services();
        assert_eq!(services.len(), 2);
        assert!(services.contains_key("a"));
        assert!(services.contains_key("c"));
        assert!(!services.contains_key("b"));
        assert_eq!(supervisor.stats("a").unwrap().start_count, 2);

        supervisor.stop().unwrap();
    }

    #[test]
    fn snapshots_are_sorted_by_name() {
        let supervisor = supervisor_with(vec![long_lived("zeta"), long_lived("alpha"), long_lived("mid")]);
        supervisor.start().unwrap();

        let names: Vec<String> = supervisor.service_snapshots_for_tui().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        supervisor.stop().unwrap();
    }

    #[test]
    fn event_handler_observes_started_then_stopped_in_order() {
        let mut cfg = service("echo", "/bin/echo", vec!["hi"]);
        cfg.oneshot = true;
        cfg.restart.policy = RestartPolicyConfig::Never;
        let supervisor = supervisor_with(vec![cfg]);

        let seen: Arc<StdMutex<Vec<EventKind>>> = Arc::new(StdMutex::new(Vec::new()));
        let recorder = seen.clone();
        supervisor.set_event_handler(move |_name, event, _stats| {
            recorder.lock().unwrap().push(event.kind.clone());
        });

        supervisor.start().unwrap();
        assert!(poll_until(|| seen.lock().unwrap().len() >= 2, Duration::from_secs(2)));
        supervisor.stop().unwrap();

        let kinds = seen.lock().unwrap();
        assert_eq!(kinds[0], EventKind::Started);
        assert_eq!(kinds[1], EventKind::Stopped);
    }

    #[test]
    fn health_triggered_restart_increments_restart_count() {
        let mut web = long_lived("web");
        web.listeners = vec![ListenerConfig {
            name: "http".into(),
            protocol: Protocol::Tcp,
            address: "127.0.0.1".into(),
            port: 18199,
            exposed: false,
            probe: Some(crate::config::ProbeConfig {
                probe_type: crate::config::ProbeType::Tcp,
                timeout: Duration::from_millis(50),
                interval: Duration::from_millis(20),
                success_threshold: 1,
                failure_threshold: 2,
                ..Default::default()
            }),
        }];
        let supervisor = supervisor_with(vec![web]);
        supervisor.set_prober_factory(Arc::new(crate::probe::factory::DefaultProberFactory));

        supervisor.start().unwrap();
        assert!(poll_until(
            || supervisor.stats("web").map(|s| s.restart_count >= 1).unwrap_or(false),
            Duration::from_secs(3)
        ));

        supervisor.stop().unwrap();
    }

    #[test]
    fn spawn_failure_during_start_rolls_back_to_stopped() {
        let mut bad = long_lived("bad");
        bad.command = "/no/such/binary".into();
        let supervisor = supervisor_with(vec![long_lived("good"), bad]);

        let result = supervisor.start();
        assert!(result.is_err());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.services().is_empty());
    }

    #[test]
    fn error_handler_is_invoked_for_best_effort_stop_failures() {
        // Using a well-behaved service, stop() should never invoke the error
        // handler; this asserts the absence path rather than forcing a
        // genuine adapter failure, which the std adapter makes hard to
        // trigger deterministically in a unit test.
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let supervisor = supervisor_with(vec![long_lived("web")]);
        supervisor.set_error_handler(move |_tag, _service, _err| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        supervisor.start().unwrap();
        supervisor.stop().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
