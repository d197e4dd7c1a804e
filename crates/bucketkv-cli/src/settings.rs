//! Connection settings: optional TOML file overlaid by command-line flags.
//!
//! Credentials, bucket and root path never come from here; they are read
//! from the environment by [`BackendConfig::from_env_with_prefix`].

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use bucketkv_backend::BackendConfig;
use serde::Deserialize;

use crate::cli::Cli;

/// Contents of the `--config` file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub endpoints: Vec<String>,
    pub secure: bool,
    pub region: Option<String>,
    pub env_prefix: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Effective settings after merging file and flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub endpoints: Vec<String>,
    pub secure: bool,
    pub region: Option<String>,
    pub env_prefix: String,
    pub poll_interval: Option<Duration>,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => CliConfig::load(path)?,
            None => CliConfig::default(),
        };
        Ok(Self::merge(file, cli))
    }

    /// Flags win over the file. `--secure` can only turn TLS on.
    pub fn merge(file: CliConfig, cli: &Cli) -> Self {
        let endpoints = if cli.endpoints.is_empty() {
            file.endpoints
        } else {
            cli.endpoints.clone()
        };
        Self {
            endpoints,
            secure: cli.secure || file.secure,
            region: cli.region.clone().or(file.region),
            env_prefix: cli.env_prefix.clone().or(file.env_prefix).unwrap_or_default(),
            poll_interval: file.poll_interval_ms.map(Duration::from_millis),
        }
    }

    /// Environment-backed backend configuration with these settings applied.
    pub fn backend_config(&self) -> BackendConfig {
        self.apply(BackendConfig::from_env_with_prefix(&self.env_prefix))
    }

    fn apply(&self, mut config: BackendConfig) -> BackendConfig {
        config.secure = self.secure;
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
        }
        config
    }
}
