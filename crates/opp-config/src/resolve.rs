//! Configuration path discovery.
//!
//! Each file is looked up independently: CLI argument, direct-path
//! environment variable, `OPPORTUNITY_SCAN_CONFIG_DIR`, the XDG config
//! directory, `/etc/opportunity-scan/`, and finally the builtin default.

use std::path::{Path, PathBuf};

pub const ENV_POLICY_PATH: &str = "OPPORTUNITY_SCAN_POLICY";
pub const ENV_RULES_PATH: &str = "OPPORTUNITY_SCAN_RULES";
pub const ENV_CONFIG_DIR: &str = "OPPORTUNITY_SCAN_CONFIG_DIR";

pub const POLICY_FILENAME: &str = "policy.json";
pub const RULES_FILENAME: &str = "rules.json";

const APP_NAME: &str = "opportunity-scan";

/// Where a configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    CliArgument,
    /// A direct-path variable or `OPPORTUNITY_SCAN_CONFIG_DIR`.
    Environment,
    XdgConfig,
    SystemConfig,
    #[default]
    BuiltinDefault,
}

impl ConfigSource {
    pub fn label(&self) -> &'static str {
        match self {
            ConfigSource::CliArgument => "CLI argument",
            ConfigSource::Environment => "environment variable",
            ConfigSource::XdgConfig => "XDG config",
            ConfigSource::SystemConfig => "system config",
            ConfigSource::BuiltinDefault => "builtin default",
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved locations of `policy.json` and `rules.json`.
///
/// A `None` path means the builtin default applies.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub policy: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub policy_source: ConfigSource,
    pub rules_source: ConfigSource,
}

/// Locate both configuration files.
///
/// An explicit CLI path is returned even when it does not exist, so the
/// loader reports it instead of silently using a different file.
pub fn resolve_config(cli_policy: Option<&Path>, cli_rules: Option<&Path>) -> ConfigPaths {
    let lookup = |key: &str| std::env::var(key).ok();
    let (policy, policy_source) = locate(cli_policy, ENV_POLICY_PATH, POLICY_FILENAME, &lookup);
    let (rules, rules_source) = locate(cli_rules, ENV_RULES_PATH, RULES_FILENAME, &lookup);
    ConfigPaths {
        policy,
        rules,
        policy_source,
        rules_source,
    }
}

fn locate(
    cli_path: Option<&Path>,
    path_var: &str,
    filename: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    candidates(path_var, filename, lookup)
        .into_iter()
        .find(|(path, _)| path.is_file())
        .map_or((None, ConfigSource::BuiltinDefault), |(path, source)| {
            (Some(path), source)
        })
}

/// Search locations for one file, highest precedence first.
fn candidates(
    path_var: &str,
    filename: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Vec<(PathBuf, ConfigSource)> {
    let mut out = Vec::with_capacity(4);
    if let Some(direct) = lookup(path_var) {
        out.push((PathBuf::from(direct), ConfigSource::Environment));
    }
    if let Some(dir) = lookup(ENV_CONFIG_DIR) {
        out.push((Path::new(&dir).join(filename), ConfigSource::Environment));
    }
    if let Some(dir) = xdg_config_dir() {
        out.push((dir.join(filename), ConfigSource::XdgConfig));
    }
    out.push((system_config_dir().join(filename), ConfigSource::SystemConfig));
    out
}

/// `~/.config/opportunity-scan`, honouring `XDG_CONFIG_HOME`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

pub fn system_config_dir() -> PathBuf {
    Path::new("/etc").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_display() {
        assert_eq!(ConfigSource::CliArgument.to_string(), "CLI argument");
        assert_eq!(ConfigSource::Environment.to_string(), "environment variable");
        assert_eq!(ConfigSource::default().label(), "builtin default");
    }

    #[test]
    fn cli_path_wins_even_if_missing() {
        let missing = Path::new("/nonexistent/opportunity-scan/policy.json");
        let paths = resolve_config(Some(missing), None);
        assert_eq!(paths.policy.as_deref(), Some(missing));
        assert_eq!(paths.policy_source, ConfigSource::CliArgument);
    }

    #[test]
    fn candidates_follow_precedence() {
        let lookup = |key: &str| match key {
            ENV_RULES_PATH => Some("/tmp/direct/rules.json".to_string()),
            ENV_CONFIG_DIR => Some("/tmp/confdir".to_string()),
            _ => None,
        };
        let found = candidates(ENV_RULES_PATH, RULES_FILENAME, &lookup);
        assert_eq!(found[0].0, PathBuf::from("/tmp/direct/rules.json"));
        assert_eq!(found[1].0, PathBuf::from("/tmp/confdir/rules.json"));
        assert!(found[..2].iter().all(|(_, s)| *s == ConfigSource::Environment));
        let last = found.last().unwrap();
        assert_eq!(last.0, PathBuf::from("/etc/opportunity-scan/rules.json"));
        assert_eq!(last.1, ConfigSource::SystemConfig);
    }

    #[test]
    fn nothing_found_is_builtin_default() {
        let lookup = |_: &str| None;
        let (path, source) = locate(None, ENV_POLICY_PATH, "no-such-file-7f3a.json", &lookup);
        assert_eq!(path, None);
        assert_eq!(source, ConfigSource::BuiltinDefault);
    }
}
