use crate::artifact::UnitSyntax;
use crate::healing::{ActualPosition, DEFAULT_AUTO_APPLY_THRESHOLD};
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where snapshots and artifacts are kept
    #[serde(default)]
    pub storage: StorageConfig,

    /// Contract loading settings
    #[serde(default)]
    pub contract: ContractConfig,

    /// Artifact merge settings
    #[serde(default)]
    pub merge: MergeConfig,

    /// Failure classification settings
    #[serde(default)]
    pub healing: HealingConfig,

    /// Data directory (default parent of the snapshot and artifact stores)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshot directory, defaults to `<data_dir>/snapshots`
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,

    /// Artifact directory, defaults to `<data_dir>/artifacts`
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Glob patterns over path templates; matching operations are ignored
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Test unit syntax used in artifacts
    #[serde(default)]
    pub syntax: UnitSyntax,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Minimum confidence for applying a fix without review (0.0 - 1.0)
    #[serde(default = "default_auto_apply_threshold")]
    pub auto_apply_threshold: f64,

    /// Which side of a bare `a == b` assertion is the produced value
    #[serde(default)]
    pub actual_position: ActualPosition,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_auto_apply_threshold() -> f64 {
    DEFAULT_AUTO_APPLY_THRESHOLD
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: default_auto_apply_threshold(),
            actual_position: ActualPosition::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(Self::default_config_path);

        let config: Config = if let Some(ref path) = config_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config from {:?}", path))?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.healing.auto_apply_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!(
                "healing.auto_apply_threshold must be between 0 and 1, got {}",
                threshold
            );
        }
        for pattern in &self.contract.exclude_paths {
            if pattern.trim().is_empty() {
                bail!("contract.exclude_paths contains an empty pattern");
            }
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(Self::default_config_path)
            .context("No config path available")?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "contract-sync", "contract-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "contract-sync", "contract-sync")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".contract-sync"))
        })
    }

    /// Get the snapshot directory path
    pub fn snapshot_dir(&self) -> PathBuf {
        self.storage
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("snapshots"))
    }

    /// Get the artifact directory path
    pub fn artifact_dir(&self) -> PathBuf {
        self.storage
            .artifact_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("artifacts"))
    }
}
