//! Configuration loading for opp-core.
//!
//! This module handles:
//! - Locating policy.json and rules.json (CLI > env > XDG > /etc > builtin)
//! - Applying a named scoring preset in place of a policy file
//! - Parse + semantic validation of both files
//! - The config snapshot attached to run reports

pub use opp_config::preset::{get_preset, list_presets, PresetError, PresetInfo, PresetName};
pub use opp_config::validate::ValidationError;
pub use opp_config::{ConfigPaths, ConfigSnapshot, ConfigSource, RuleCatalog, ScoringPolicy};

use std::path::{Path, PathBuf};

use opp_config::resolve_config;
use opp_config::validate::{validate_catalog, validate_policy};
use thiserror::Error;

/// Which configuration file an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFile {
    Policy,
    Rules,
}

impl std::fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigFile::Policy => write!(f, "policy"),
            ConfigFile::Rules => write!(f, "rules"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{file} file not found: {path}")]
    NotFound { file: ConfigFile, path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {file} ({origin}): {source}")]
    Invalid {
        file: ConfigFile,
        origin: String,
        #[source]
        source: ValidationError,
    },

    #[error("--preset cannot be combined with --policy")]
    PresetConflict,
}

impl ConfigError {
    /// Errors caused by the command line rather than file contents.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, ConfigError::PresetConflict)
    }
}

impl From<ConfigError> for opp_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid {
                source: ValidationError::VersionMismatch { expected, actual },
                ..
            } => opp_common::Error::VersionMismatch { expected, actual },
            ConfigError::Invalid {
                file: ConfigFile::Policy,
                ..
            } => opp_common::Error::InvalidPolicy(err.to_string()),
            ConfigError::Invalid {
                file: ConfigFile::Rules,
                ..
            } => opp_common::Error::InvalidRules(err.to_string()),
            other => opp_common::Error::Config(other.to_string()),
        }
    }
}

/// Configuration resolution options.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub policy_path: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
    /// Replaces any discovered policy file. Conflicts with `policy_path`.
    pub preset: Option<PresetName>,
}

/// Loaded, validated configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub policy: ScoringPolicy,
    pub catalog: RuleCatalog,
    pub paths: ConfigPaths,
    pub preset: Option<PresetName>,
    pub snapshot: ConfigSnapshot,
}

/// Load configuration with the standard resolution order.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    if options.preset.is_some() && options.policy_path.is_some() {
        return Err(ConfigError::PresetConflict);
    }

    let mut paths = resolve_config(options.policy_path.as_deref(), options.rules_path.as_deref());

    let (policy, policy_json) = match (options.preset, &paths.policy) {
        (Some(preset), _) => {
            paths.policy = None;
            paths.policy_source = ConfigSource::BuiltinDefault;
            (get_preset(preset), None)
        }
        (None, Some(path)) => {
            let content = read(ConfigFile::Policy, path)?;
            let policy = ScoringPolicy::parse_json(&content)
                .map_err(|e| invalid(ConfigFile::Policy, Some(path), e))?;
            (policy, Some(content))
        }
        (None, None) => (ScoringPolicy::default(), None),
    };
    validate_policy(&policy).map_err(|e| invalid(ConfigFile::Policy, paths.policy.as_deref(), e))?;

    let (catalog, rules_json) = match &paths.rules {
        Some(path) => {
            let content = read(ConfigFile::Rules, path)?;
            let catalog = RuleCatalog::parse_json(&content)
                .map_err(|e| invalid(ConfigFile::Rules, Some(path), e))?;
            (catalog, Some(content))
        }
        None => (RuleCatalog::builtin(), None),
    };
    validate_catalog(&catalog).map_err(|e| invalid(ConfigFile::Rules, paths.rules.as_deref(), e))?;

    let snapshot = ConfigSnapshot::new(
        &policy,
        &catalog,
        &paths,
        policy_json.as_deref(),
        rules_json.as_deref(),
    );

    Ok(ResolvedConfig {
        policy,
        catalog,
        paths,
        preset: options.preset,
        snapshot,
    })
}

fn read(file: ConfigFile, path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            file,
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(file: ConfigFile, path: Option<&Path>, source: ValidationError) -> ConfigError {
    ConfigError::Invalid {
        file,
        origin: path.map_or_else(|| "builtin".to_string(), |p| p.display().to_string()),
        source,
    }
}
