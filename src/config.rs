//! Engine configuration file.
//!
//! ```json
//! {
//!   "global": { "port": 18000 },
//!   "models": {
//!     "qwen": [
//!       { "weight": 3, "gpu_ids": [0], "engine": { "kind": "echo" } },
//!       { "weight": 1, "gpu_ids": [1], "engine": { "kind": "echo", "chunk_chars": 2 } }
//!     ]
//!   }
//! }
//! ```

use crate::engine::echo::{EchoConfig, EchoEngine};
use crate::engine::EngineHandle;
use crate::scheduler::Scheduler;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18000
}

fn default_owned_by() -> String {
    "owner".to_string()
}

fn default_keep_alive_ms() -> u64 {
    100
}

fn default_gpu_ids() -> Vec<usize> {
    vec![0]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_owned_by")]
    pub owned_by: String,
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
}

impl GlobalConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

/// Construction parameters of one replica, tagged by engine kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineSpec {
    Echo(EchoConfig),
}

impl EngineSpec {
    pub fn build(&self, name: String) -> Arc<dyn EngineHandle> {
        match self {
            EngineSpec::Echo(cfg) => Arc::new(EchoEngine::new(name, cfg.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineEntry {
    pub weight: f64,
    #[serde(default = "default_gpu_ids")]
    pub gpu_ids: Vec<usize>,
    pub engine: EngineSpec,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub models: BTreeMap<String, Vec<EngineEntry>>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.models.is_empty() {
            errors.push("no models configured".to_string());
        }
        for (model, entries) in &self.models {
            if model.trim().is_empty() {
                errors.push("model name must not be empty".to_string());
            }
            if entries.is_empty() {
                errors.push(format!("model '{}' has no engines", model));
            }
            for (i, entry) in entries.iter().enumerate() {
                if !entry.weight.is_finite() || entry.weight <= 0.0 {
                    errors.push(format!(
                        "model '{}' engine #{} weight must be > 0, got {}",
                        model, i, entry.weight
                    ));
                }
                if let EngineSpec::Echo(cfg) = &entry.engine {
                    if cfg.chunk_chars == 0 {
                        errors.push(format!(
                            "model '{}' engine #{} chunk_chars must be > 0",
                            model, i
                        ));
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn build_scheduler(&self) -> Result<Scheduler, ConfigError> {
        let mut builder = Scheduler::builder();
        for (model, entries) in &self.models {
            for (i, entry) in entries.iter().enumerate() {
                let name = format!("{}#{}", model, i);
                info!(
                    "\n=== > Init engine: {} < ===\n\tDevices: {:?}\n\tWeight: {}",
                    name, entry.gpu_ids, entry.weight
                );
                builder = builder.add_engine(model.clone(), entry.weight, entry.engine.build(name));
            }
        }
        builder.build()
    }
}
