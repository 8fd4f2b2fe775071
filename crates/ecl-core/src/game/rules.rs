//! Platform/feature conditions attached to libraries and arguments.

use crate::game::installer::types::Platform;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Feature flags supplied by the caller (`is_demo_user`, `has_custom_resolution`, ...).
/// Flags missing from the set read as `false`.
pub type FeatureSet = HashMap<String, bool>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: Option<OsRule>,
    #[serde(default)]
    pub features: Option<HashMap<String, bool>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OsRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

#[derive(Debug, Error)]
pub enum RuleEvaluationError {
    #[error("invalid os.version expression {expression:?}: {source}")]
    InvalidVersionPattern {
        expression: String,
        #[source]
        source: regex::Error,
    },
}

/// Decide whether a conditioned element applies.
///
/// Rules are folded start to end and every matching rule overwrites the
/// verdict with its action, so the last match wins. An empty list allows.
pub fn evaluate(
    rules: &[Rule],
    platform: &Platform,
    features: &FeatureSet,
) -> Result<bool, RuleEvaluationError> {
    if rules.is_empty() {
        return Ok(true);
    }

    let mut allowed = false;
    for rule in rules {
        if rule_matches(rule, platform, features)? {
            allowed = rule.action == RuleAction::Allow;
        }
    }
    Ok(allowed)
}

/// Convenience for optional rule lists as they appear in descriptors.
pub fn evaluate_opt(
    rules: Option<&[Rule]>,
    platform: &Platform,
    features: &FeatureSet,
) -> Result<bool, RuleEvaluationError> {
    match rules {
        Some(rules) => evaluate(rules, platform, features),
        None => Ok(true),
    }
}

fn rule_matches(
    rule: &Rule,
    platform: &Platform,
    features: &FeatureSet,
) -> Result<bool, RuleEvaluationError> {
    if let Some(os_rule) = &rule.os {
        if let Some(name) = &os_rule.name {
            if name != platform.os.as_str() {
                return Ok(false);
            }
        }

        if let Some(arch) = &os_rule.arch {
            if !platform.arch.matches_rule(arch) {
                return Ok(false);
            }
        }

        if let Some(expression) = &os_rule.version {
            let re = Regex::new(expression).map_err(|source| {
                RuleEvaluationError::InvalidVersionPattern {
                    expression: expression.clone(),
                    source,
                }
            })?;
            let host_version = platform.os_version.as_deref().unwrap_or("");
            if !re.is_match(host_version) {
                return Ok(false);
            }
        }
    }

    if let Some(required) = &rule.features {
        for (name, expected) in required {
            let actual = features.get(name).copied().unwrap_or(false);
            if actual != *expected {
                return Ok(false);
            }
        }
    }

    Ok(true)
}
