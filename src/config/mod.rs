//! Configuration schema and the default YAML loader adapter.
//!
//! This is the one adapter the core ships a concrete implementation of by
//! default, alongside the abstract `ConfigLoader` trait it implements.

pub mod loader;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::RestartPolicyKind;

fn duration_field<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    duration_str::deserialize_duration(deserializer)
}

fn opt_duration_field<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "duration_field")] Duration);
    Option::<Wrapper>::deserialize(deserializer).map(|w| w.map(|w| w.0))
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_reset_after() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_restarts() -> i64 {
    -1
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    pub version: String,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    pub services: Vec<ServiceConfig>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicyConfig {
    #[default]
    Never,
    OnFailure,
    Always,
}

impl From<RestartPolicyConfig> for RestartPolicyKind {
    fn from(value: RestartPolicyConfig) -> Self {
        match value {
            RestartPolicyConfig::Never => RestartPolicyKind::Never,
            RestartPolicyConfig::OnFailure => RestartPolicyKind::OnFailure,
            RestartPolicyConfig::Always => RestartPolicyKind::Always,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct RestartConfig {
    pub policy: RestartPolicyConfig,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: i64,
    #[serde(default = "default_initial_delay", deserialize_with = "duration_field")]
    pub initial_delay: Duration,
    #[serde(default = "default_max_delay", deserialize_with = "duration_field")]
    pub max_delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_reset_after", deserialize_with = "duration_field")]
    pub reset_after: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicyConfig::default(),
            max_restarts: default_max_restarts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            reset_after: default_reset_after(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopSignalConfig {
    #[default]
    Graceful,
    Term,
    Int,
    Hup,
    Quit,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default = "default_stop_timeout", deserialize_with = "duration_field")]
    pub stop_timeout: Duration,
    #[serde(default)]
    pub stop_signal: StopSignalConfig,
    #[serde(default)]
    pub oneshot: bool,
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ListenerConfig {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default = "default_address")]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    #[default]
    Tcp,
    Udp,
    Http,
    Grpc,
    Exec,
    Icmp,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_threshold() -> u32 {
    1
}

fn default_status_code() -> u16 {
    200
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct ProbeConfig {
    #[serde(rename = "type")]
    pub probe_type: ProbeType,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default = "default_probe_timeout", deserialize_with = "duration_field")]
    pub timeout: Duration,
    #[serde(default = "default_probe_interval", deserialize_with = "duration_field")]
    pub interval: Duration,
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
}

/// `Loader` port: `load(path) -> Config | error`.
pub trait ConfigLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load(&self, path: &std::path::Path) -> Result<RootConfig, Self::Error>;
}
