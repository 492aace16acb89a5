//! Configuration loading and config file resolution
//!
//! **Purpose:** Load `equitag.toml` into [`TomlConfig`], locating the file by
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. `EQUITAG_CONFIG` environment variable
//! 3. `./equitag.toml` in the working directory
//! 4. `<user config dir>/equitag/equitag.toml`
//! 5. Compiled defaults (no file)
//!
//! A file named explicitly (CLI or environment) must exist. The implicit
//! locations are optional.

use crate::params::AuditParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "EQUITAG_CONFIG";

/// File name searched in the working and user config directories
pub const CONFIG_FILE_NAME: &str = "equitag.toml";

/// Complete configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Input and output locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Audit parameters and run label
    #[serde(default)]
    pub audit: AuditConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Artifact locations
///
/// Every input is optional at this level; each subcommand checks for the
/// artifacts it needs and reports `MissingInput` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Prediction source CSV (`video_id,true_labels,pred_topk,pred_topk_probs`)
    #[serde(default)]
    pub predictions: Option<PathBuf>,

    /// Class vocabulary CSV (`category` column)
    #[serde(default)]
    pub classes: Option<PathBuf>,

    /// Protected-term lexicon JSON
    #[serde(default)]
    pub lexicon: Option<PathBuf>,

    /// Video texts CSV (`video_id,title,tags`) matched with the lexicon
    #[serde(default)]
    pub texts: Option<PathBuf>,

    /// Precomputed membership JSON (used instead of lexicon + texts)
    #[serde(default)]
    pub membership: Option<PathBuf>,

    /// Engagement metadata CSV (`video_id,views,rating`)
    #[serde(default)]
    pub metadata: Option<PathBuf>,

    /// Directory receiving every output table
    ///
    /// Default: `results`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            predictions: None,
            classes: None,
            lexicon: None,
            texts: None,
            membership: None,
            metadata: None,
            output_dir: default_output_dir(),
        }
    }
}

/// `[audit]` table: run label plus the flattened [`AuditParams`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Label embedded in output file names (`details_{model}_{namespace}.csv`)
    ///
    /// Default: `model`
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(flatten)]
    pub params: AuditParams,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            params: AuditParams::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    ///
    /// Overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_model() -> String {
    "model".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    WorkingDirectory(PathBuf),
    UserConfigDir(PathBuf),
    CompiledDefaults,
}

impl ConfigSource {
    /// Path of the file backing this source, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::WorkingDirectory(p)
            | ConfigSource::UserConfigDir(p) => Some(p),
            ConfigSource::CompiledDefaults => None,
        }
    }
}

/// Locate the configuration file by priority order
///
/// # Arguments
/// * `cli_arg` - Path passed with `--config`, if any
///
/// # Returns
/// The winning [`ConfigSource`]. Explicit sources are returned without an
/// existence check; [`load_config`] reports them missing.
pub fn resolve_config_source(cli_arg: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    // Priority 3: Working directory
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return ConfigSource::WorkingDirectory(local);
    }

    // Priority 4: User config directory
    if let Some(user) = dirs::config_dir().map(|d| d.join("equitag").join(CONFIG_FILE_NAME)) {
        if user.is_file() {
            return ConfigSource::UserConfigDir(user);
        }
    }

    // Priority 5: Compiled defaults
    ConfigSource::CompiledDefaults
}

/// Parse one TOML configuration file
///
/// # Errors
/// * `MissingInput` when the file does not exist
/// * `Config` when the TOML is invalid or parameters fail validation
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.is_file() {
        return Err(Error::missing("config file", path));
    }
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    config.audit.params.validate()?;
    debug!(path = %path.display(), "Parsed config file");
    Ok(config)
}

/// Resolve and load the effective configuration
///
/// # Returns
/// The parsed config together with the source it was read from
pub fn load_config(cli_arg: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
    let source = resolve_config_source(cli_arg);
    let config = match source.path() {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };
    match source.path() {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No config file found, using compiled defaults"),
    }
    Ok((config, source))
}
