//! Prober adapters and the prober factory port.

pub mod exec;
pub mod factory;
pub mod grpc;
pub mod http;
pub mod icmp;
pub mod monitor;
pub mod tcp;
pub mod udp;

use std::time::Duration;
use thiserror::Error;

use crate::config::ProbeConfig;
use crate::context::Context;

/// What a prober probes against: a listener's bound address and port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    pub address: String,
    pub port: u16,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out")]
    ProbeTimeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("exec probe has no command configured")]
    EmptyCommand,
    #[error("{0}")]
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProbeResult {
    pub success: bool,
    pub latency: Duration,
    pub output: String,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn ok(latency: Duration, output: impl Into<String>) -> Self {
        Self {
            success: true,
            latency,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(latency: Duration, error: ProbeError) -> Self {
        Self {
            success: false,
            latency,
            output: String::new(),
            error: Some(error),
        }
    }
}

/// A probe adapter: execute one probe against `target` within
/// `config.timeout`, a hard wall-clock bound on the whole attempt.
pub trait Prober: Send + Sync {
    fn probe(&self, target: &ProbeTarget, config: &ProbeConfig, cancel: &Context) -> ProbeResult;
}

/// Runs `attempt` in a helper thread and enforces `timeout` as a hard
/// wall-clock bound, the way every concrete prober in this module does.
/// Used by probers whose underlying client has no native timeout (exec) or
/// whose native timeout isn't trustworthy enough to rely on alone.
pub(crate) fn with_hard_timeout<F>(timeout: Duration, attempt: F) -> ProbeResult
where
    F: FnOnce() -> ProbeResult + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(attempt());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => ProbeResult::failed(timeout, ProbeError::ProbeTimeout),
    }
}
