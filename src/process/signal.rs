use nix::sys::signal::Signal;

use crate::config::StopSignalConfig;

/// Signals the lifecycle manager can send. `Graceful` is a platform-specific
/// value resolved at the spawn adapter: on unix it is `SIGTERM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopSignal {
    Graceful,
    Term,
    Int,
    Hup,
    Quit,
    Kill,
}

impl From<StopSignalConfig> for StopSignal {
    fn from(value: StopSignalConfig) -> Self {
        match value {
            StopSignalConfig::Graceful => StopSignal::Graceful,
            StopSignalConfig::Term => StopSignal::Term,
            StopSignalConfig::Int => StopSignal::Int,
            StopSignalConfig::Hup => StopSignal::Hup,
            StopSignalConfig::Quit => StopSignal::Quit,
        }
    }
}

impl StopSignal {
    pub(crate) fn as_nix_signal(self) -> Signal {
        match self {
            StopSignal::Graceful | StopSignal::Term => Signal::SIGTERM,
            StopSignal::Int => Signal::SIGINT,
            StopSignal::Hup => Signal::SIGHUP,
            StopSignal::Quit => Signal::SIGQUIT,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// The reload signal: commonly a hang-up signal.
pub const RELOAD_SIGNAL: StopSignal = StopSignal::Hup;
