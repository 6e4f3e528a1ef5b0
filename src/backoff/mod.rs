//! Restart-backoff tracker.
//!
//! Turns a stream of process exits into `(should_restart, delay)`
//! decisions: multiplicative backoff clamped to a max delay, with a reset
//! window that forgives old failures once a service has stayed up long
//! enough.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicyKind {
    Never,
    OnFailure,
    Always,
}

#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub policy: RestartPolicyKind,
    pub oneshot: bool,
    /// `-1` means no cap.
    pub max_restarts: i64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub reset_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicyKind::Never,
            oneshot: false,
            max_restarts: -1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            reset_after: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ExitObservation {
    pub exit_code: i32,
    /// Killed by a signal the spawn adapter does not consider a graceful
    /// termination (e.g. SIGSEGV), treated as abnormal regardless of the
    /// numeric exit code the platform reports.
    pub abnormal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    Restart { delay: Duration },
    Exhausted,
    DoNotRestart,
}

/// Mutable per-service backoff state: `consecutive_failures`,
/// `last_failure_at`, `current_delay`.
#[derive(Debug)]
pub struct RestartBackoffTracker {
    config: BackoffConfig,
    consecutive_failures: u64,
    last_failure_at: Option<Instant>,
    current_delay: Duration,
}

impl RestartBackoffTracker {
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            consecutive_failures: 0,
            last_failure_at: None,
            current_delay,
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    /// Resets the tracker as if no failures had ever been observed, without
    /// changing the configured policy. Used when a service is restarted
    /// cleanly from outside the failure path (e.g. a config reload).
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure_at = None;
        self.current_delay = self.config.initial_delay;
    }

    fn policy_allows_restart(&self, exit: &ExitObservation) -> bool {
        if self.config.oneshot {
            return false;
        }
        match self.config.policy {
            RestartPolicyKind::Never => false,
            RestartPolicyKind::OnFailure => exit.exit_code != 0 || exit.abnormal,
            RestartPolicyKind::Always => true,
        }
    }

    /// Records one exit observation and decides whether to restart and after
    /// how long. Must be called exactly once per exit.
    pub fn observe(&mut self, exit: ExitObservation, now: Instant) -> Decision {
        if !self.policy_allows_restart(&exit) {
            return Decision::DoNotRestart;
        }

        if let Some(last_failure) = self.last_failure_at {
            if now.duration_since(last_failure) >= self.config.reset_after {
                self.consecutive_failures = 0;
                self.current_delay = self.config.initial_delay;
            }
        }

        self.consecutive_failures += 1;
        self.last_failure_at = Some(now);

        if self.config.max_restarts >= 0
            && self.consecutive_failures as i64 > self.config.max_restarts
        {
            return Decision::Exhausted;
        }

        let delay = self.current_delay;
        let next = self.current_delay.mul_f64(self.config.backoff_multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Decision::Restart { delay }
    }
}
