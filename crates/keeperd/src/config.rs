//! TOML configuration for the Keeper daemon.
//!
//! Every section is optional; missing sections and keys fall back to the
//! defaults of [`MasterConfig`].

use std::path::Path;

use anyhow::Context;
use keeper_types::{CapacityConfig, CheckerConfig, LivenessConfig, MasterConfig, PlacementConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Cluster identity.
    pub cluster: ClusterSection,
    /// Logging configuration.
    pub log: LogSection,
    /// Consistency checker tuning.
    pub checker: CheckerConfig,
    /// Node liveness tuning.
    pub liveness: LivenessConfig,
    /// Writability limits.
    pub capacity: CapacityConfig,
    /// Scheduler tuning.
    pub placement: PlacementConfig,
}

/// `[cluster]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Cluster identifier stamped on every integrity warning.
    pub id: String,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            id: "keeper".to_string(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("invalid config in {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The master-core configuration carried by this file.
    pub fn master_config(&self) -> MasterConfig {
        MasterConfig {
            checker: self.checker,
            liveness: self.liveness,
            capacity: self.capacity,
            placement: self.placement,
        }
    }
}
