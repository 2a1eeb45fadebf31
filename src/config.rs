//! Engine configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_SETUP_SEED: u64 = 0x5eed_1d;
const DEFAULT_CLOCK_SKEW_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Directory holding `<proof type>.pk` / `.vk` files.
    #[serde(default = "default_keys_dir")]
    pub dir: PathBuf,
    /// Seed for the deterministic setup used when `dir` has no keys.
    #[serde(default = "default_setup_seed")]
    pub setup_seed: u64,
    /// Write generated keys to `dir`.
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Tolerance applied to both ends of a challenge's validity window.
    #[serde(default = "default_clock_skew_ms")]
    pub clock_skew_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: default_keys_dir(),
            setup_seed: DEFAULT_SETUP_SEED,
            persist: false,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            path: default_registry_path(),
        }
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            clock_skew_ms: DEFAULT_CLOCK_SKEW_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from(".zkid/keys")
}

fn default_setup_seed() -> u64 {
    DEFAULT_SETUP_SEED
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(".zkid/nullifiers")
}

fn default_clock_skew_ms() -> u64 {
    DEFAULT_CLOCK_SKEW_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
