//! Configuration snapshots for run reports and reproducibility.
//!
//! A snapshot records exactly which policy and rule catalog a run used, so
//! two reports can be compared by hash before comparing their opportunities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::policy::ScoringPolicy;
use crate::resolve::ConfigPaths;
use crate::rules::RuleCatalog;

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub hostname: Option<String>,

    pub schema_version: String,

    /// SHA-256 of the policy file content; None when builtin.
    #[serde(default)]
    pub policy_hash: Option<String>,

    #[serde(default)]
    pub policy_path: Option<String>,

    pub policy_source: String,

    /// SHA-256 of the rules file content; None when builtin.
    #[serde(default)]
    pub rules_hash: Option<String>,

    #[serde(default)]
    pub rules_path: Option<String>,

    pub rules_source: String,

    /// Hash over both inputs, including preset and builtin identity.
    pub combined_hash: String,

    pub summary: ConfigSummary,
}

/// Key configuration values for quick reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub policy_id: Option<String>,
    pub deviation_weight: f64,
    pub traffic_weight: f64,
    pub high_urgency: f64,
    pub medium_urgency: f64,
    pub lookback: usize,
    pub max_workers: usize,
    pub batch_size: usize,
    pub rule_count: usize,
    pub enabled_rule_count: usize,
}

impl ConfigSummary {
    pub fn from_config(policy: &ScoringPolicy, catalog: &RuleCatalog) -> Self {
        ConfigSummary {
            policy_id: policy.policy_id.clone(),
            deviation_weight: policy.impact.deviation_weight,
            traffic_weight: policy.impact.traffic_weight,
            high_urgency: policy.priority.high_urgency,
            medium_urgency: policy.priority.medium_urgency,
            lookback: policy.engine.lookback,
            max_workers: policy.engine.max_workers,
            batch_size: policy.engine.batch_size,
            rule_count: catalog.rules.len(),
            enabled_rule_count: catalog.enabled().count(),
        }
    }
}

impl ConfigSnapshot {
    /// Create a snapshot from loaded configuration.
    ///
    /// `policy_json` / `rules_json` are the raw file contents, when loaded
    /// from disk. Builtin inputs are hashed by their serialized form so the
    /// combined hash still changes when a preset or the builtin catalog does.
    pub fn new(
        policy: &ScoringPolicy,
        catalog: &RuleCatalog,
        paths: &ConfigPaths,
        policy_json: Option<&str>,
        rules_json: Option<&str>,
    ) -> Self {
        let policy_hash = policy_json.map(hash_content);
        let rules_hash = rules_json.map(hash_content);

        let policy_identity = policy_hash
            .clone()
            .unwrap_or_else(|| hash_serialized(policy));
        let rules_identity = rules_hash
            .clone()
            .unwrap_or_else(|| hash_serialized(catalog));
        let combined_hash = hash_content(&format!("{}:{}", policy_identity, rules_identity));

        ConfigSnapshot {
            timestamp: Utc::now(),
            hostname: hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string()),
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            policy_hash,
            policy_path: paths.policy.as_ref().map(|p| p.display().to_string()),
            policy_source: paths.policy_source.to_string(),
            rules_hash,
            rules_path: paths.rules.as_ref().map(|p| p.display().to_string()),
            rules_source: paths.rules_source.to_string(),
            combined_hash,
            summary: ConfigSummary::from_config(policy, catalog),
        }
    }

    /// Snapshot of the builtin policy and catalog.
    pub fn defaults_only() -> Self {
        Self::new(
            &ScoringPolicy::default(),
            &RuleCatalog::builtin(),
            &ConfigPaths::default(),
            None,
            None,
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Same configuration as `other`.
    pub fn matches(&self, other: &ConfigSnapshot) -> bool {
        self.combined_hash == other.combined_hash
    }

    /// First 12 chars of the combined hash.
    pub fn short_id(&self) -> &str {
        &self.combined_hash[..12.min(self.combined_hash.len())]
    }
}

fn hash_serialized<T: Serialize>(value: &T) -> String {
    // Serialization of these plain structs cannot fail; fall back to an
    // empty identity rather than panic.
    let content = serde_json::to_string(value).unwrap_or_default();
    hash_content(&content)
}

/// SHA-256 hex digest.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
