//! Declarative policy: match intercepted methods, tag risk, decide stall.
//!
//! Policies load from a YAML document (`vouch-policy.yaml`) into an ordered
//! rule list evaluated top to bottom; the first rule whose method pattern
//! and conditions both match wins. A `stall` action is observational in the
//! async pipeline: it tags the event as a Proof-of-Refusal rather than
//! holding the request.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Risk tag applied to unmatched methods.
pub const DEFAULT_RISK_LEVEL: &str = "low";

/// Errors loading a policy document. Both are fatal at startup.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("reading policy file: {0}")]
    Io(#[from] std::io::Error),

    /// The policy file is not valid YAML of the expected shape.
    #[error("parsing policy YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Document-level defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyDefaults {
    /// Days of ledger retention the operator intends.
    #[serde(default)]
    pub retention_days: u32,
    /// Whether events are signed (informational; the daemon always signs).
    #[serde(default)]
    pub signing_enabled: bool,
    /// Suggested log level.
    #[serde(default)]
    pub log_level: String,
}

/// One policy rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRule {
    /// Stable identifier recorded on matched events.
    pub id: String,
    /// Method patterns: exact, or prefix with a trailing `*`.
    pub match_methods: Vec<String>,
    /// Risk tag: `low`, `medium`, `high`, or `critical`.
    #[serde(default = "default_risk")]
    pub risk_level: String,
    /// `allow` or `stall`.
    #[serde(default = "default_action")]
    pub action: String,
    /// Whether a stall should be recorded as a Proof-of-Refusal event.
    #[serde(default)]
    pub proof_of_refusal: bool,
    /// Conjunction of predicates over request params. Unknown keys are
    /// vacuously true so newer documents keep loading on older builds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, serde_yaml::Value>,
}

fn default_risk() -> String {
    DEFAULT_RISK_LEVEL.to_string()
}

fn default_action() -> String {
    "allow".to_string()
}

impl PolicyRule {
    /// Returns `true` when this rule's action is `stall`.
    #[must_use]
    pub fn is_stall(&self) -> bool {
        self.action == "stall"
    }
}

/// The parsed policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyDocument {
    /// Document schema version, e.g. `"2026.1"`.
    #[serde(default)]
    pub version: String,
    /// Document-level defaults.
    #[serde(default)]
    pub defaults: PolicyDefaults,
    /// Ordered rule list.
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// The classification of one intercepted call.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification<'a> {
    /// The winning rule, if any.
    pub matched_rule: Option<&'a PolicyRule>,
    /// Risk tag for the event (rule's, or [`DEFAULT_RISK_LEVEL`]).
    pub risk_level: &'a str,
    /// True when the winning rule's action is `stall`.
    pub should_stall: bool,
}

/// Loads rules and classifies intercepted methods against them.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    document: PolicyDocument,
}

impl PolicyEngine {
    /// Wraps an already-parsed document.
    #[must_use]
    pub fn new(document: PolicyDocument) -> Self {
        Self { document }
    }

    /// Loads and parses a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on missing file or malformed YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_str(&data)
    }

    /// Parses a policy document from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Yaml`] on malformed input.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(input: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = serde_yaml::from_str(input)?;
        Ok(Self::new(document))
    }

    /// Returns the loaded document.
    #[must_use]
    pub const fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Returns the document version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.document.version
    }

    /// Returns the number of loaded rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.document.policies.len()
    }

    /// Classifies a method and its params: first rule whose method pattern
    /// and conditions both match wins.
    #[must_use]
    pub fn classify(&self, method: &str, params: &Value) -> Classification<'_> {
        for rule in &self.document.policies {
            let pattern_hit = rule
                .match_methods
                .iter()
                .any(|pattern| matches_pattern(pattern, method));
            if !pattern_hit {
                continue;
            }
            if !conditions_match(&rule.conditions, params) {
                continue;
            }
            return Classification {
                matched_rule: Some(rule),
                risk_level: &rule.risk_level,
                should_stall: rule.is_stall(),
            };
        }

        Classification {
            matched_rule: None,
            risk_level: DEFAULT_RISK_LEVEL,
            should_stall: false,
        }
    }
}

/// Exact match, or prefix match for patterns ending in `*`.
fn matches_pattern(pattern: &str, method: &str) -> bool {
    if pattern == method {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return method.starts_with(prefix);
    }
    false
}

/// Evaluates a condition map as a conjunction. The only recognized
/// predicate is `amount_gt`; unknown keys are vacuously true.
fn conditions_match(conditions: &BTreeMap<String, serde_yaml::Value>, params: &Value) -> bool {
    for (key, threshold) in conditions {
        if key == "amount_gt" {
            let Some(threshold) = threshold.as_f64() else {
                return false;
            };
            let Some(amount) = params.get("amount").and_then(Value::as_f64) else {
                return false;
            };
            if amount <= threshold {
                return false;
            }
        }
    }
    true
}
