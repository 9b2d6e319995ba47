//! Bridge configuration (`.tether.toml`)

use crate::error::{BridgeError, Result};
use crate::logging::{parse_level, LogConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = ".tether.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub lifetimes: LifetimeConfig,

    #[serde(default)]
    pub invoke: InvokeConfig,

    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifetimeConfig {
    /// Panic on lifetime violations instead of logging and refusing
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Require a strong count of exactly one before an explicit dispose
    #[serde(default = "default_strict")]
    pub check_dispose_count: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeConfig {
    #[serde(default = "default_binding_cache_capacity")]
    pub binding_cache_capacity: usize,

    /// Refuse a result whose kind differs from the declared return kind
    #[serde(default = "default_false")]
    pub strict_kinds: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default = "default_marker_file")]
    pub marker_file: String,

    #[serde(default = "default_binary_stem")]
    pub binary_stem: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_source_globs")]
    pub source_globs: Vec<String>,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            check_dispose_count: default_strict(),
        }
    }
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            binding_cache_capacity: default_binding_cache_capacity(),
            strict_kinds: false,
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            marker_file: default_marker_file(),
            binary_stem: default_binary_stem(),
            output_dir: default_output_dir(),
            source_globs: default_source_globs(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_level(&self.level),
            log_path: self.file.clone(),
            json_format: self.json,
            ..LogConfig::default()
        }
    }
}

fn default_strict() -> bool { cfg!(debug_assertions) }
fn default_false() -> bool { false }
fn default_binding_cache_capacity() -> usize { 1024 }
fn default_marker_file() -> String { "tether.module".to_string() }
fn default_binary_stem() -> String { "module".to_string() }
fn default_output_dir() -> String { "bin".to_string() }
fn default_source_globs() -> Vec<String> { vec!["src/**/*.rs".to_string()] }
fn default_drain_timeout_ms() -> u64 { 5000 }
fn default_level() -> String { "info".to_string() }

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(format!("failed to parse config: {}", e)))
    }

    /// Find and load `.tether.toml` from the current directory or its parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(format!("failed to serialize config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Default configuration as TOML
    pub fn generate_default() -> String {
        Self::default().to_toml().unwrap_or_default()
    }

    pub fn drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.modules.drain_timeout_ms)
    }

    /// Strict lifetimes with dispose checks, whatever the build profile
    pub fn strict() -> Self {
        let mut config = Self::default();
        config.lifetimes.strict = true;
        config.lifetimes.check_dispose_count = true;
        config
    }

    /// Contained lifetime violations: logged and refused, never fatal
    pub fn lenient() -> Self {
        let mut config = Self::default();
        config.lifetimes.strict = false;
        config
    }
}
