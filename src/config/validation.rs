//! Config linting: unknown-key detection with "did you mean?" suggestions,
//! plus warnings for values that are legal but unlikely to be intended.
//!
//! The raw TOML is parsed into a `toml::Value` first so typos can be reported
//! before serde silently ignores them. Nothing here fails a load.

use std::collections::HashSet;

use super::SwarmConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path for `SwarmConfig`.
///
/// Kept in step with the section structs in swarm_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    [
        // [swarm]
        "swarm",
        "swarm.name",
        // [dispatch]
        "dispatch",
        "dispatch.unit_timeout_ms",
        "dispatch.batch_timeout_ms",
        // [consensus]
        "consensus",
        "consensus.high_max_std_dev",
        "consensus.medium_max_std_dev",
        "consensus.low_max_std_dev",
        "consensus.conflict_delta",
        "consensus.confidence_threshold",
        // [trust]
        "trust",
        "trust.initial_weight",
        "trust.initial_accuracy",
        "trust.min_weight",
        "trust.max_weight",
        "trust.outcome_history_factor",
        "trust.manual_history_factor",
        "trust.max_update_attempts",
        "trust.retry_backoff_ms",
        // [store]
        "store",
        "store.history_retention",
        "store.lease_secs",
    ]
    .into_iter()
    .collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Collect every dotted key path in a TOML tree.
///
/// `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let Some(table) = value.as_table() else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    for (k, v) in table {
        let path = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        if v.is_table() {
            let nested = walk_toml_keys(v, &path);
            keys.push(path);
            keys.extend(nested);
        } else {
            keys.push(path);
        }
    }
    keys
}

// ============================================================================
// Suggestions
// ============================================================================

/// Edit distance between two keys, counted in chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }

    row[b.len()]
}

/// Closest known key within edit distance 3; ties resolve alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

/// Warnings for every key the swarm does not understand.
///
/// Unparseable TOML yields no warnings; serde reports the parse error.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Suspicious Values
// ============================================================================

fn suspicious(field: &str, message: String) -> ValidationWarning {
    ValidationWarning {
        field: field.to_string(),
        message,
        suggestion: None,
    }
}

/// Values that pass `SwarmConfig::validate` but usually indicate a mistake.
pub fn operational_warnings(config: &SwarmConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let c = &config.consensus;

    if c.confidence_threshold < 0.3 {
        warnings.push(suspicious(
            "consensus.confidence_threshold",
            format!(
                "confidence_threshold = {:.2} lets almost every decision bypass manual review",
                c.confidence_threshold
            ),
        ));
    }

    // A conflict below the HIGH band means HIGH-consensus decisions can carry conflicts.
    if c.conflict_delta < c.high_max_std_dev {
        warnings.push(suspicious(
            "consensus.conflict_delta",
            format!(
                "conflict_delta = {:.1} is below high_max_std_dev = {:.1}",
                c.conflict_delta, c.high_max_std_dev
            ),
        ));
    }

    let t = &config.trust;
    if t.outcome_history_factor > 0.99 {
        warnings.push(suspicious(
            "trust.outcome_history_factor",
            format!(
                "outcome_history_factor = {:.3} makes trust effectively frozen",
                t.outcome_history_factor
            ),
        ));
    }

    let batch_secs = config.dispatch.batch_timeout_ms / 1000;
    if config.store.lease_secs <= batch_secs {
        warnings.push(suspicious(
            "store.lease_secs",
            format!(
                "lease_secs = {} does not outlast a full dispatch ({} ms); live runs may be taken over",
                config.store.lease_secs, config.dispatch.batch_timeout_ms
            ),
        ));
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================
