//! The event types a lifecycle manager emits and the channel the supervisor
//! consumes them on.

pub mod channel;

use std::time::SystemTime;

/// One lifecycle transition for a single service.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub service_name: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub timestamp: SystemTime,
    pub error: Option<String>,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Stopped,
    Failed,
    Restarting,
    Exhausted,
    Healthy,
    Unhealthy,
}

impl Event {
    pub fn new(service_name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            service_name: service_name.into(),
            pid: 0,
            exit_code: None,
            timestamp: SystemTime::now(),
            error: None,
            kind,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// A terminal event is one that ends a single run of a service: it is
    /// not followed by another `Started` without an intervening `start()`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Stopped | EventKind::Failed | EventKind::Exhausted
        )
    }
}
