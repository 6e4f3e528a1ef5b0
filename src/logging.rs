//! Global logging init: one `tracing-subscriber` fmt layer, set once.

use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInit(String),
}

pub struct Logging;

impl Logging {
    pub fn try_init() -> Result<(), LoggingError> {
        Self::try_init_at(Level::INFO)
    }

    /// Like [`Self::try_init`], but with a caller-chosen default level
    /// (e.g. `Level::DEBUG` for `--verbose`). `RUST_LOG` still overrides it.
    pub fn try_init_at(default_level: Level) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_max_level(default_level)
            .with_env_filter(EnvFilter::builder().with_default_directive(LevelFilter::from_level(default_level).into()).from_env_lossy())
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|_| LoggingError::TryInit("unable to set the global logging subscriber".to_string()))
    }
}
