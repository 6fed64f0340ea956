use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use serde::Deserialize;

use crate::error::{LibError, Result};

pub const CONFIG_PATH_ENV: &str = "GRAPHAPP_CONFIG";

/// Process-wide settings, built once at startup and handed to each component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub blob_root: Option<PathBuf>,
    pub key_prefix: String,
    pub generation: GenerationSettings,
    pub analysis: AnalysisSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub default_vertices: usize,
    pub max_vertices: usize,
    pub max_weight: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub max_concurrent_jobs: usize,
    pub max_run_secs: u64,
    pub max_queue_wait_secs: u64,
    pub status_write_attempts: u32,
    pub watchdog_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub layout_iterations: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 4010)),
            database_url: None,
            database_max_connections: 5,
            blob_root: None,
            key_prefix: "graphapp".to_string(),
            generation: GenerationSettings::default(),
            analysis: AnalysisSettings::default(),
            render: RenderSettings::default(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            default_vertices: 10,
            max_vertices: 2000,
            max_weight: 100,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_run_secs: 300,
            max_queue_wait_secs: 3600,
            status_write_attempts: 3,
            watchdog_interval_secs: 30,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            layout_iterations: 200,
        }
    }
}

impl AnalysisSettings {
    pub fn max_run_duration(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }

    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_secs(self.max_queue_wait_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

impl AppConfig {
    /// Defaults, then the TOML file named by `GRAPHAPP_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|err| {
                    LibError::invalid(
                        "Configuration file could not be read",
                        anyhow!("{}: {}", path, err),
                    )
                })?;
                Self::from_toml(&raw)?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| {
            LibError::invalid("Configuration file is malformed", anyhow!(err))
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GRAPHAPP_BIND") {
            self.bind = parse_value("GRAPHAPP_BIND", &value)?;
        }
        if let Some(value) = lookup("DATABASE_URL").filter(|value| !value.trim().is_empty()) {
            self.database_url = Some(value);
        }
        if let Some(value) = lookup("GRAPHAPP_DB_MAX_CONNECTIONS") {
            self.database_max_connections = parse_value("GRAPHAPP_DB_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_BLOB_ROOT").filter(|value| !value.trim().is_empty()) {
            self.blob_root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("GRAPHAPP_KEY_PREFIX") {
            self.key_prefix = value.trim().trim_matches('/').to_string();
        }
        if let Some(value) = lookup("GRAPHAPP_DEFAULT_VERTICES") {
            self.generation.default_vertices = parse_value("GRAPHAPP_DEFAULT_VERTICES", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_MAX_VERTICES") {
            self.generation.max_vertices = parse_value("GRAPHAPP_MAX_VERTICES", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_MAX_WEIGHT") {
            self.generation.max_weight = parse_value("GRAPHAPP_MAX_WEIGHT", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_MAX_CONCURRENT_JOBS") {
            self.analysis.max_concurrent_jobs =
                parse_value("GRAPHAPP_MAX_CONCURRENT_JOBS", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_MAX_RUN_SECS") {
            self.analysis.max_run_secs = parse_value("GRAPHAPP_MAX_RUN_SECS", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_MAX_QUEUE_WAIT_SECS") {
            self.analysis.max_queue_wait_secs = parse_value("GRAPHAPP_MAX_QUEUE_WAIT_SECS", &value)?;
        }
        if let Some(value) = lookup("GRAPHAPP_WATCHDOG_INTERVAL_SECS") {
            self.analysis.watchdog_interval_secs =
                parse_value("GRAPHAPP_WATCHDOG_INTERVAL_SECS", &value)?;
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(LibError::invalid(
                "Blob key prefix must not be empty",
                anyhow!("key_prefix is empty"),
            ));
        }
        if self.generation.default_vertices == 0
            || self.generation.default_vertices > self.generation.max_vertices
        {
            return Err(LibError::invalid(
                "Default vertex count must be between 1 and the vertex maximum",
                anyhow!(
                    "default_vertices={} max_vertices={}",
                    self.generation.default_vertices,
                    self.generation.max_vertices
                ),
            ));
        }
        if self.generation.max_weight == 0 {
            return Err(LibError::invalid(
                "Maximum edge weight must be positive",
                anyhow!("max_weight is 0"),
            ));
        }
        if self.analysis.max_concurrent_jobs == 0 || self.analysis.status_write_attempts == 0 {
            return Err(LibError::invalid(
                "Analysis concurrency and write attempts must be positive",
                anyhow!("{:?}", self.analysis),
            ));
        }
        if self.analysis.max_run_secs == 0 || self.analysis.max_queue_wait_secs == 0 {
            return Err(LibError::invalid(
                "Analysis run and queue-wait limits must be positive",
                anyhow!(
                    "max_run_secs={} max_queue_wait_secs={}",
                    self.analysis.max_run_secs,
                    self.analysis.max_queue_wait_secs
                ),
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| {
        LibError::invalid(
            "Configuration value is malformed",
            anyhow!("invalid {} '{}': {}", name, value, err),
        )
    })
}
