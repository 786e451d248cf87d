//! Gateway configuration
//!
//! TOML-backed configuration with full defaults so the binary runs with
//! no file at all. Aggregator entries carry the per-aggregator config
//! map (gateway URLs, API keys) consumed by the adapters.

use crate::aggregator::{AggregatorInfo, AggregatorKind};
use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub aggregators: Vec<AggregatorEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Upstream aggregators expect a bounded response; keep this below
    /// their own callback timeout.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 10,
        }
    }
}

/// One registered aggregator as configured.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatorEntry {
    pub identity: String,
    pub kind: AggregatorKind,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_active() -> bool {
    true
}

impl AggregatorEntry {
    pub fn into_info(self) -> AggregatorInfo {
        AggregatorInfo {
            id: Uuid::new_v4(),
            identity: self.identity,
            kind: self.kind,
            config: self.config,
            active: self.active,
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file, falling back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::Validation(format!("failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str(&content).map_err(|e| {
                    EngineError::Validation(format!("failed to parse {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.server.request_timeout_secs == 0 {
            return Err(EngineError::Validation(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.aggregators {
            if entry.identity.is_empty() {
                return Err(EngineError::Validation(
                    "aggregator identity must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.identity.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate aggregator identity '{}'",
                    entry.identity
                )));
            }
        }
        Ok(())
    }
}
