use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

/// Builder configuration, usually loaded from `~/.a3s/build.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Log level used when `RUST_LOG` is not set
    pub log_level: LogLevel,

    /// Default build arguments; `--build-arg` values override these
    pub build_args: HashMap<String, String>,

    /// Directory that receives built OCI layouts when `--output` is not given
    pub output_dir: PathBuf,

    /// Escape character used when the Dockerfile has no `# escape=` directive
    pub escape: char,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warn,
            build_args: HashMap::new(),
            output_dir: Self::default_home().join("builds"),
            escape: '\\',
        }
    }
}

impl BuilderConfig {
    /// Base directory for builder state (~/.a3s).
    pub fn default_home() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".a3s"))
            .unwrap_or_else(|| PathBuf::from(".a3s"))
    }

    /// Default config file location (~/.a3s/build.yaml).
    pub fn default_path() -> PathBuf {
        Self::default_home().join("build.yaml")
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: BuilderConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or from the default location if it exists.
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.escape != '\\' && self.escape != '`' {
            return Err(BuildError::ConfigError(format!(
                "escape must be '\\' or '`', got '{}'",
                self.escape
            )));
        }
        Ok(())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
