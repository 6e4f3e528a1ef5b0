//! Probe monitor: drives probers on interval, computes liveness from
//! success/failure thresholds, and fires the `OnHealthy`/`OnUnhealthy`/
//! `OnStateChange` callbacks the supervisor wires back into lifecycle
//! management.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use super::{Prober, ProbeResult, ProbeTarget};
use crate::config::ProbeConfig;
use crate::context::Context;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStateInput {
    Running,
    Stopped,
}

struct BindingState {
    current: HealthState,
    consecutive_successes: u32,
    consecutive_failures: u32,
    last_result: Option<ProbeResult>,
    /// Set when the process transitions away from `Running`; cleared (with a
    /// counter reset) on the next probe taken while `Running` again.
    pending_reset: bool,
}

impl Default for BindingState {
    fn default() -> Self {
        Self {
            current: HealthState::Unknown,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_result: None,
            pending_reset: false,
        }
    }
}

pub struct ListenerBinding {
    pub name: String,
    pub target: ProbeTarget,
    pub prober: Arc<dyn Prober>,
    pub config: ProbeConfig,
}

struct BindingEntry {
    binding: ListenerBinding,
    state: Mutex<BindingState>,
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("listener `{0}` is already registered")]
    DuplicateListener(String),
}

/// Callbacks the supervisor installs to learn about health transitions.
pub struct MonitorCallbacks {
    pub on_healthy: Box<dyn Fn(&str) + Send + Sync>,
    pub on_unhealthy: Box<dyn Fn(&str, &str) + Send + Sync>,
    pub on_state_change: Box<dyn Fn(&str, HealthState, HealthState, &ProbeResult) + Send + Sync>,
}

pub struct ProbeMonitor {
    bindings: RwLock<HashMap<String, Arc<BindingEntry>>>,
    process_state: Arc<RwLock<ProcessStateInput>>,
    callbacks: Arc<MonitorCallbacks>,
    internal_ctx: Context,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ProbeMonitor {
    pub fn new(callbacks: MonitorCallbacks) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            process_state: Arc::new(RwLock::new(ProcessStateInput::Stopped)),
            callbacks: Arc::new(callbacks),
            internal_ctx: Context::new(),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn register_binding(&self, binding: ListenerBinding) -> Result<(), MonitorError> {
        let mut bindings = self.bindings.write().unwrap();
        if bindings.contains_key(&binding.name) {
            return Err(MonitorError::DuplicateListener(binding.name));
        }
        bindings.insert(
            binding.name.clone(),
            Arc::new(BindingEntry {
                binding,
                state: Mutex::new(BindingState::default()),
            }),
        );
        Ok(())
    }

    pub fn set_process_state(&self, state: ProcessStateInput) {
        let mut current = self.process_state.write().unwrap();
        if *current != state && state == ProcessStateInput::Stopped {
            for entry in self.bindings.read().unwrap().values() {
                entry.state.lock().unwrap().pending_reset = true;
            }
        }
        *current = state;
    }

    /// Starts one scheduling thread per binding. `cancel` is the root
    /// cancellation context; an internal context owned by this monitor is
    /// what the scheduling threads actually watch, so `stop()` can tear this
    /// monitor down without cancelling the shared root context.
    pub fn start(&self, cancel: Context) {
        let internal_ctx = self.internal_ctx.clone();
        thread::spawn(move || {
            cancel.wait();
            let _ = internal_ctx.cancel();
        });

        let bindings: Vec<Arc<BindingEntry>> = self.bindings.read().unwrap().values().cloned().collect();
        let mut threads = self.threads.lock().unwrap();
        for entry in bindings {
            let process_state = self.process_state.clone();
            let callbacks = self.callbacks.clone();
            let ctx = self.internal_ctx.clone();
            threads.push(thread::spawn(move || schedule_binding(entry, process_state, callbacks, ctx)));
        }
    }

    /// Must cause every in-flight probe to observe cancellation within
    /// `max(config.timeout)` and join every scheduling thread before
    /// returning.
    pub fn stop(&self) {
        let _ = self.internal_ctx.cancel();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// `Healthy` if all bindings `Healthy`, `Unhealthy` if any `Unhealthy`,
    /// `Unknown` otherwise.
    pub fn status(&self) -> HealthState {
        let bindings = self.bindings.read().unwrap();
        if bindings.is_empty() {
            return HealthState::Unknown;
        }
        let mut any_unknown = false;
        for entry in bindings.values() {
            match entry.state.lock().unwrap().current {
                HealthState::Unhealthy => return HealthState::Unhealthy,
                HealthState::Unknown => any_unknown = true,
                HealthState::Healthy => {}
            }
        }
        if any_unknown {
            HealthState::Unknown
        } else {
            HealthState::Healthy
        }
    }

    pub fn binding_status(&self, name: &str) -> Option<HealthState> {
        self.bindings
            .read()
            .unwrap()
            .get(name)
            .map(|entry| entry.state.lock().unwrap().current)
    }
}

fn schedule_binding(
    entry: Arc<BindingEntry>,
    process_state: Arc<RwLock<ProcessStateInput>>,
    callbacks: Arc<MonitorCallbacks>,
    ctx: Context,
) {
    let config = entry.binding.config.clone();
    loop {
        if ctx.is_cancelled() {
            return;
        }

        if *process_state.read().unwrap() == ProcessStateInput::Running {
            run_one_probe(&entry, &callbacks, &ctx);
        }

        if !ctx.sleep(config.interval) {
            return;
        }
    }
}

fn run_one_probe(entry: &Arc<BindingEntry>, callbacks: &Arc<MonitorCallbacks>, ctx: &Context) {
    let result = entry.binding.prober.probe(&entry.binding.target, &entry.binding.config, ctx);
    let config = &entry.binding.config;

    let mut state = entry.state.lock().unwrap();
    if state.pending_reset {
        state.consecutive_successes = 0;
        state.consecutive_failures = 0;
        state.pending_reset = false;
    }

    let prev = state.current;
    if result.success {
        state.consecutive_failures = 0;
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        if state.consecutive_successes >= config.success_threshold && state.current != HealthState::Healthy {
            state.current = HealthState::Healthy;
            state.consecutive_successes = config.success_threshold;
        }
    } else {
        state.consecutive_successes = 0;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= config.failure_threshold && state.current != HealthState::Unhealthy {
            state.current = HealthState::Unhealthy;
        }
    }
    state.last_result = Some(result.clone());
    let new = state.current;
    drop(state);

    if new != prev {
        (callbacks.on_state_change)(&entry.binding.name, prev, new, &result);
        match new {
            HealthState::Healthy => (callbacks.on_healthy)(&entry.binding.name),
            HealthState::Unhealthy => {
                let reason = result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "probe failed".to_string());
                (callbacks.on_unhealthy)(&entry.binding.name, &reason);
            }
            HealthState::Unknown => {}
        }
    }
}
