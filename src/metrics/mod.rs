//! Optional metrics tracker port. The core never requires an
//! implementation; omitting one simply disables CPU/memory enrichment in
//! TUI snapshots.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("failed to track pid {0}: {1}")]
    Track(u32, String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProcessMetrics {
    pub cpu_percent: f64,
    pub memory_rss: u64,
}

pub trait MetricsTracker: Send + Sync {
    fn track(&self, name: &str, pid: u32) -> Result<(), MetricsError>;
    fn untrack(&self, name: &str);
    fn get(&self, name: &str) -> Option<ProcessMetrics>;
    fn get_all(&self) -> Vec<(String, ProcessMetrics)>;
}
