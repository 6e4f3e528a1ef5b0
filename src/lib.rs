//! Multi-service process supervisor: spawn, monitor, restart, and
//! health-check a configured set of child processes. See each module for
//! its piece of the design.

pub mod backoff;
pub mod cli;
pub mod config;
pub mod context;
pub mod discovery;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod process;
pub mod reaper;
pub mod stats;
pub mod supervisor;
