use crate::idle::IdleSettings;
use crate::runner::LocationOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    /// Threshold handed to the idle probe. `0` disables idle checking.
    #[serde(default)]
    pub idle_threshold: u8,
    #[serde(default = "default_idle_delay_secs")]
    pub idle_delay_secs: u64,
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,
    #[serde(default = "default_launch_retries")]
    pub launch_retries: u32,
    #[serde(default)]
    pub coverage: bool,
}

pub fn default_idle_delay_secs() -> u64 {
    60
}
pub fn default_idle_poll_secs() -> u64 {
    1
}
pub fn default_launch_retries() -> u32 {
    1
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            idle_threshold: 0,
            idle_delay_secs: default_idle_delay_secs(),
            idle_poll_secs: default_idle_poll_secs(),
            launch_retries: default_launch_retries(),
            coverage: false,
        }
    }
}

impl RunnerSettings {
    pub fn idle_settings(&self) -> Option<IdleSettings> {
        if self.idle_threshold == 0 {
            return None;
        }
        Some(IdleSettings {
            threshold: self.idle_threshold,
            init_delay: Duration::from_secs(self.idle_delay_secs),
            poll_delay: Duration::from_secs(self.idle_poll_secs),
        })
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LocationSettings {
    pub close_after: Option<u32>,
    pub forced_close: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl LocationSettings {
    pub fn options(&self) -> LocationOptions {
        LocationOptions {
            close_after: self.close_after,
            forced_close: self.forced_close,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct AdapterSettings {
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProwlConfig {
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub location: LocationSettings,
    #[serde(default)]
    pub adapters: AdapterSettings,
}

impl ProwlConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: ProwlConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}
