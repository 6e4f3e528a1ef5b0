use std::path::Path;
use thiserror::Error;

use super::{ConfigLoader, RootConfig};

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("could not read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in `{path}`: {source}")]
    InvalidConfiguration {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Default `Loader` adapter: reads a YAML file and rejects unknown keys.
#[derive(Debug, Default)]
pub struct YamlConfigLoader;

impl YamlConfigLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigLoader for YamlConfigLoader {
    type Error = ConfigLoadError;

    fn load(&self, path: &Path) -> Result<RootConfig, Self::Error> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: RootConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigLoadError::InvalidConfiguration {
            path: path.display().to_string(),
            source,
        })?;
        if config.config_path.is_none() {
            config.config_path = Some(path.to_path_buf());
        }
        Ok(config)
    }
}
