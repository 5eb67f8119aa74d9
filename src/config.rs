use crate::core::ScopeInfo;
use crate::services::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingConfig {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

/// A top-level container (community) and the scopes it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: u64,
    #[serde(default)]
    pub groupings: Vec<GroupingConfig>,
    /// Scopes that sit directly under the container.
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub archive_root: PathBuf,
    pub data_dir: PathBuf,
    pub supported_formats: Vec<String>,
    pub ledger_key: String,
    pub admission_key: String,
    pub notify_channel: String,
    pub worker_idle_ms: u64,
    pub dispatch_poll_ms: u64,
    pub dispatch_cooldown_ms: u64,
    pub link_base: String,
    pub containers: Vec<ContainerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();
        Self {
            archive_root: PathBuf::from("Backup"),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dupewatch"),
            supported_formats: pipeline.supported_formats,
            ledger_key: pipeline.ledger_key,
            admission_key: pipeline.admission_key,
            notify_channel: pipeline.notify_channel,
            worker_idle_ms: pipeline.worker_idle.as_millis() as u64,
            dispatch_poll_ms: pipeline.dispatch_poll.as_millis() as u64,
            dispatch_cooldown_ms: pipeline.dispatch_cooldown.as_millis() as u64,
            link_base: "https://discord.com/channels".to_string(),
            containers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            supported_formats: self.supported_formats.clone(),
            ledger_key: self.ledger_key.clone(),
            admission_key: self.admission_key.clone(),
            notify_channel: self.notify_channel.clone(),
            worker_idle: Duration::from_millis(self.worker_idle_ms),
            dispatch_poll: Duration::from_millis(self.dispatch_poll_ms),
            dispatch_cooldown: Duration::from_millis(self.dispatch_cooldown_ms),
        }
    }

    /// Flatten the configured containers into the gateway's scope layout.
    pub fn scope_layout(&self) -> Vec<ScopeInfo> {
        let mut layout = Vec::new();
        for container in &self.containers {
            for scope in &container.scopes {
                layout.push(ScopeInfo {
                    scope_id: scope.id,
                    parent_id: None,
                    container_id: container.id,
                    name: scope.name.clone(),
                });
            }
            for grouping in &container.groupings {
                for scope in &grouping.scopes {
                    layout.push(ScopeInfo {
                        scope_id: scope.id,
                        parent_id: Some(grouping.id),
                        container_id: container.id,
                        name: scope.name.clone(),
                    });
                }
            }
        }
        layout
    }
}
