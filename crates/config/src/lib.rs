//! Configuration loading, validation, and management for patchvol.
//!
//! Loads configuration from `~/.patchvol/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use patchvol_core::{AssemblerConfig, PatchLayout, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.patchvol/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine policies
    #[serde(default)]
    pub assembler: AssemblerConfig,

    /// Streaming driver settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Synthetic workload used by `patchvol simulate`
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_subjects")]
    pub subjects: usize,

    /// Shape of every ground-truth volume.
    #[serde(default = "default_volume_shape")]
    pub volume_shape: Vec<usize>,

    /// Tile shape; edge tiles are truncated to the volume.
    #[serde(default = "default_patch_shape")]
    pub patch_shape: Vec<usize>,

    /// Patches per prediction batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_subjects() -> usize {
    3
}
fn default_volume_shape() -> Vec<usize> {
    vec![32, 32, 16]
}
fn default_patch_shape() -> Vec<usize> {
    vec![16, 16, 8]
}
fn default_batch_size() -> usize {
    4
}
fn default_seed() -> u64 {
    42
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            subjects: default_subjects(),
            volume_shape: default_volume_shape(),
            patch_shape: default_patch_shape(),
            batch_size: default_batch_size(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `patchvol_assembler=debug`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.patchvol/config.toml).
    ///
    /// Environment variables override the file:
    /// - `PATCHVOL_READINESS` (`subject_change` | `coverage`)
    /// - `PATCHVOL_BOUNDS` (`strict` | `clip`)
    /// - `PATCHVOL_LOG` (filter directive)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(None)
    }

    /// Like [`load`](Self::load), reading `path` instead of the default file
    /// when one is given.
    pub fn load_at(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `PATCHVOL_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("PATCHVOL_READINESS") {
            self.assembler.readiness = value
                .parse()
                .map_err(|e| ConfigError::ValidationError(format!("PATCHVOL_READINESS: {e}")))?;
        }

        if let Some(value) = lookup("PATCHVOL_BOUNDS") {
            self.assembler.bounds = value
                .parse()
                .map_err(|e| ConfigError::ValidationError(format!("PATCHVOL_BOUNDS: {e}")))?;
        }

        if let Some(level) = lookup("PATCHVOL_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".patchvol")
    }

    /// Path of the default config file.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.channel_capacity must be > 0".into(),
            ));
        }

        let sim = &self.simulation;
        if sim.volume_shape.is_empty() || sim.volume_shape.contains(&0) {
            return Err(ConfigError::ValidationError(
                "simulation.volume_shape must be non-empty with non-zero extents".into(),
            ));
        }
        if sim.patch_shape.is_empty() || sim.patch_shape.contains(&0) {
            return Err(ConfigError::ValidationError(
                "simulation.patch_shape must be non-empty with non-zero extents".into(),
            ));
        }
        if sim.patch_shape.len() != sim.volume_shape.len() {
            return Err(ConfigError::ValidationError(format!(
                "simulation.patch_shape has {} axes but volume_shape has {}",
                sim.patch_shape.len(),
                sim.volume_shape.len()
            )));
        }
        if sim.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.batch_size must be > 0".into(),
            ));
        }
        if self.assembler.layout == PatchLayout::Local
            && sim
                .volume_shape
                .iter()
                .zip(&sim.patch_shape)
                .any(|(v, p)| v % p != 0)
        {
            return Err(ConfigError::ValidationError(
                "local patch layout requires volume_shape divisible by patch_shape".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config show --defaults`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for patchvol_core::Error {
    fn from(err: ConfigError) -> Self {
        patchvol_core::Error::Config {
            message: err.to_string(),
        }
    }
}
