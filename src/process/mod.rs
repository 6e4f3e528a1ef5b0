//! Process state and the spawn adapter port plus its default
//! implementation.

pub mod signal;
pub mod spawn;

use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

#[derive(Clone, Debug, Default)]
pub struct ProcessInfo {
    pub state: ProcessState,
    pub pid: u32,
    pub started_at: Option<Instant>,
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,
}
