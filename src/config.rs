//! Simulation configuration
//!
//! Loaded from JSON; every field has a default so partial files work.

use crate::overlay::DEFAULT_MAX_LINK_DRAWS;
use crate::placement::Placement;
use crate::refinement::RefinementConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown selection scheme: {0}")]
    UnknownScheme(String),

    #[error("Unknown distance metric: {0}")]
    UnknownMetric(String),

    #[error("Unknown visit order: {0}")]
    UnknownOrder(String),

    #[error("Unknown placement: {0}")]
    UnknownPlacement(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Write daily-rotated log files here instead of stderr
    pub directory: Option<PathBuf>,
    /// Rotated files to keep when `directory` is set
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
            max_files: 7,
        }
    }
}

/// Full description of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Overlay peer count `N`
    pub peers: usize,
    /// Long links per peer `k`; `floor(ln N)` when unset
    pub links_per_peer: Option<usize>,
    pub seed: u64,
    pub placement: Placement,
    /// Friend list length for the smart scheme; `k` when unset
    pub friends_per_node: Option<usize>,
    pub max_link_draws: usize,
    pub refinement: RefinementConfig,
    pub log: LogConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            peers: 10_000,
            links_per_peer: None,
            seed: 42,
            placement: Placement::Random,
            friends_per_node: None,
            max_link_draws: DEFAULT_MAX_LINK_DRAWS,
            refinement: RefinementConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective `k`.
    pub fn links_per_peer(&self) -> usize {
        self.links_per_peer
            .unwrap_or_else(|| default_links_per_peer(self.peers))
    }

    /// Effective friend list length.
    pub fn friends_per_node(&self) -> usize {
        self.friends_per_node.unwrap_or_else(|| self.links_per_peer())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers < 2 {
            return Err(ConfigError::Invalid(format!(
                "peers must be at least 2, got {}",
                self.peers
            )));
        }
        let k = self.links_per_peer();
        if k == 0 || k > self.peers - 1 {
            return Err(ConfigError::Invalid(format!(
                "links_per_peer must be in 1..={}, got {}",
                self.peers - 1,
                k
            )));
        }
        if self.max_link_draws == 0 {
            return Err(ConfigError::Invalid("max_link_draws must be positive".into()));
        }
        if self.refinement.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "refinement.max_attempts must be positive".into(),
            ));
        }
        if self.refinement.scheme.needs_friend_index() && self.friends_per_node() == 0 {
            return Err(ConfigError::Invalid(
                "friends_per_node must be positive for the smart scheme".into(),
            ));
        }
        Ok(())
    }
}

/// `floor(ln N)`, at least 1.
pub fn default_links_per_peer(peers: usize) -> usize {
    if peers < 2 {
        return 1;
    }
    ((peers as f64).ln().floor() as usize).max(1)
}
