//! Swarm Configuration - every consensus constant as an operator-tunable TOML value
//!
//! Each struct implements `Default` with the values in `defaults.rs`, so a
//! missing file or a partial file behaves exactly like the built-in tuning.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SWARM_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "swarm_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one swarm deployment.
///
/// Load with `SwarmConfig::load()` which searches:
/// 1. `$SWARM_CONFIG` env var
/// 2. `./swarm_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Swarm identification
    #[serde(default)]
    pub swarm: SwarmInfo,

    /// Fan-out timing
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Consensus thresholds
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Trust ledger smoothing and bounds
    #[serde(default)]
    pub trust: TrustConfig,

    /// Decision store retention and leases
    #[serde(default)]
    pub store: StoreConfig,
}

impl SwarmConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SWARM_CONFIG` environment variable
    /// 2. `./swarm_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), swarm = %config.swarm.name, "Loaded swarm config from SWARM_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from SWARM_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "SWARM_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(swarm = %config.swarm.name, "Loaded swarm config from ./swarm_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./swarm_config.toml, using defaults");
                }
            }
        }

        info!("No swarm_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    ///
    /// Unknown keys only produce warnings; invalid values fail the load.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section for internal consistency.
    ///
    /// All problems are collected so an operator sees them in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        self.dispatch.collect_errors(&mut errors);
        self.consensus.collect_errors(&mut errors);
        self.trust.collect_errors(&mut errors);
        self.store.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn check_finite(value: f64, name: &str, errors: &mut Vec<String>) -> bool {
    if value.is_finite() {
        true
    } else {
        errors.push(format!("{name} must be a finite number (got {value})"));
        false
    }
}

fn check_unit_interval(value: f64, name: &str, errors: &mut Vec<String>) {
    if check_finite(value, name, errors) && !(0.0..=1.0).contains(&value) {
        errors.push(format!("{name} ({value:.3}) must be within [0, 1]"));
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Swarm Info
// ============================================================================

/// Identification metadata; appears in logs and status reports only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmInfo {
    #[serde(default = "default_swarm_name")]
    pub name: String,
}

fn default_swarm_name() -> String {
    "lead-intelligence".to_string()
}

impl Default for SwarmInfo {
    fn default() -> Self {
        Self {
            name: default_swarm_name(),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Timing envelope for one fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-unit timeout (ms). A unit exceeding it is excluded from the batch.
    #[serde(default = "default_unit_timeout_ms")]
    pub unit_timeout_ms: u64,

    /// Whole-batch timeout (ms). Units still running when it fires are dropped.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

fn default_unit_timeout_ms() -> u64 { defaults::UNIT_TIMEOUT_MS }
fn default_batch_timeout_ms() -> u64 { defaults::BATCH_TIMEOUT_MS }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            unit_timeout_ms: default_unit_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub const fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }

    pub const fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.unit_timeout_ms == 0 {
            errors.push("dispatch.unit_timeout_ms must be > 0".to_string());
        }
        if self.batch_timeout_ms < self.unit_timeout_ms {
            errors.push(format!(
                "dispatch.batch_timeout_ms ({}) must be >= unit_timeout_ms ({})",
                self.batch_timeout_ms, self.unit_timeout_ms
            ));
        }
    }
}

// ============================================================================
// Consensus
// ============================================================================

/// Thresholds the consensus builder reduces recommendations with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Score σ at or below which consensus is HIGH.
    #[serde(default = "default_high_max_std_dev")]
    pub high_max_std_dev: f64,

    /// Score σ at or below which consensus is MEDIUM.
    #[serde(default = "default_medium_max_std_dev")]
    pub medium_max_std_dev: f64,

    /// Score σ at or below which consensus is LOW; above is CONFLICT.
    #[serde(default = "default_low_max_std_dev")]
    pub low_max_std_dev: f64,

    /// Pairwise score delta above which a conflict is reported.
    #[serde(default = "default_conflict_delta")]
    pub conflict_delta: f64,

    /// Mean confidence below which the fallback decision is substituted.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_high_max_std_dev() -> f64 { defaults::HIGH_MAX_STD_DEV }
fn default_medium_max_std_dev() -> f64 { defaults::MEDIUM_MAX_STD_DEV }
fn default_low_max_std_dev() -> f64 { defaults::LOW_MAX_STD_DEV }
fn default_conflict_delta() -> f64 { defaults::CONFLICT_DELTA }
fn default_confidence_threshold() -> f64 { defaults::CONFIDENCE_THRESHOLD }

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            high_max_std_dev: default_high_max_std_dev(),
            medium_max_std_dev: default_medium_max_std_dev(),
            low_max_std_dev: default_low_max_std_dev(),
            conflict_delta: default_conflict_delta(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl ConsensusConfig {
    /// Standalone validation, used when thresholds are swapped at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        let bands = [
            ("consensus.high_max_std_dev", self.high_max_std_dev),
            ("consensus.medium_max_std_dev", self.medium_max_std_dev),
            ("consensus.low_max_std_dev", self.low_max_std_dev),
        ];
        let finite = bands
            .iter()
            .fold(true, |ok, (name, v)| check_finite(*v, name, errors) & ok);
        if finite {
            if self.high_max_std_dev < 0.0 {
                errors.push("consensus.high_max_std_dev must be >= 0".to_string());
            }
            if !(self.high_max_std_dev <= self.medium_max_std_dev
                && self.medium_max_std_dev <= self.low_max_std_dev)
            {
                errors.push(format!(
                    "consensus std-dev bands must ascend: high ({:.1}) <= medium ({:.1}) <= low ({:.1})",
                    self.high_max_std_dev, self.medium_max_std_dev, self.low_max_std_dev
                ));
            }
        }

        if check_finite(self.conflict_delta, "consensus.conflict_delta", errors)
            && !(0.0..=100.0).contains(&self.conflict_delta)
        {
            errors.push(format!(
                "consensus.conflict_delta ({:.1}) must be within [0, 100]",
                self.conflict_delta
            ));
        }

        check_unit_interval(self.confidence_threshold, "consensus.confidence_threshold", errors);
    }
}

// ============================================================================
// Trust Ledger
// ============================================================================

/// Bounds and smoothing for per-specialist trust records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Weight for a specialist with no history.
    #[serde(default = "default_initial_weight")]
    pub initial_weight: f64,

    /// Running accuracy for a specialist with no outcomes.
    #[serde(default = "default_initial_accuracy")]
    pub initial_accuracy: f64,

    #[serde(default = "default_min_weight")]
    pub min_weight: f64,

    #[serde(default = "default_max_weight")]
    pub max_weight: f64,

    /// Historical share kept per outcome sample (0.9 = 90% old / 10% new).
    #[serde(default = "default_outcome_history_factor")]
    pub outcome_history_factor: f64,

    /// Previous-weight share kept per human rating (0.7 = 70% old / 30% new).
    #[serde(default = "default_manual_history_factor")]
    pub manual_history_factor: f64,

    /// Attempts at a contended update before giving up.
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,

    /// Base backoff between contended attempts (ms), doubled per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_initial_weight() -> f64 { defaults::INITIAL_WEIGHT }
fn default_initial_accuracy() -> f64 { defaults::INITIAL_ACCURACY }
fn default_min_weight() -> f64 { defaults::MIN_WEIGHT }
fn default_max_weight() -> f64 { defaults::MAX_WEIGHT }
fn default_outcome_history_factor() -> f64 { defaults::OUTCOME_HISTORY_FACTOR }
fn default_manual_history_factor() -> f64 { defaults::MANUAL_HISTORY_FACTOR }
fn default_max_update_attempts() -> u32 { defaults::MAX_UPDATE_ATTEMPTS }
fn default_retry_backoff_ms() -> u64 { defaults::RETRY_BACKOFF_MS }

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            initial_weight: default_initial_weight(),
            initial_accuracy: default_initial_accuracy(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
            outcome_history_factor: default_outcome_history_factor(),
            manual_history_factor: default_manual_history_factor(),
            max_update_attempts: default_max_update_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl TrustConfig {
    /// Standalone validation, used when a ledger is built without a full `SwarmConfig`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        let finite = check_finite(self.min_weight, "trust.min_weight", errors)
            & check_finite(self.max_weight, "trust.max_weight", errors)
            & check_finite(self.initial_weight, "trust.initial_weight", errors);
        if finite {
            if !(self.min_weight > 0.0 && self.min_weight <= self.max_weight && self.max_weight <= 1.0) {
                errors.push(format!(
                    "trust weight bounds must satisfy 0 < min_weight ({:.2}) <= max_weight ({:.2}) <= 1",
                    self.min_weight, self.max_weight
                ));
            }
            if !(self.min_weight..=self.max_weight).contains(&self.initial_weight) {
                errors.push(format!(
                    "trust.initial_weight ({:.2}) must lie within [min_weight, max_weight]",
                    self.initial_weight
                ));
            }
        }

        check_unit_interval(self.initial_accuracy, "trust.initial_accuracy", errors);
        check_unit_interval(self.outcome_history_factor, "trust.outcome_history_factor", errors);
        check_unit_interval(self.manual_history_factor, "trust.manual_history_factor", errors);

        if self.max_update_attempts == 0 {
            errors.push("trust.max_update_attempts must be > 0".to_string());
        }
    }
}

// ============================================================================
// Decision Store
// ============================================================================

/// Retention and in-flight lease settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Decisions kept in history; oldest are evicted past this count.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,

    /// Seconds before an unfinished in-flight marker expires.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_history_retention() -> usize { defaults::HISTORY_RETENTION }
fn default_lease_secs() -> u64 { defaults::LEASE_SECS }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_retention: default_history_retention(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl StoreConfig {
    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.history_retention == 0 {
            errors.push("store.history_retention must be > 0".to_string());
        }
        if self.lease_secs == 0 {
            errors.push("store.lease_secs must be > 0".to_string());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = SwarmConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: SwarmConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config, SwarmConfig::default());
        assert_eq!(config.consensus.confidence_threshold, 0.7);
        assert_eq!(config.consensus.conflict_delta, 30.0);
        assert_eq!(config.trust.initial_weight, 0.8);
        assert_eq!(config.store.history_retention, 1000);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[swarm]
name = "content-personalization"

[consensus]
confidence_threshold = 0.6
"#;
        let config = SwarmConfig::from_toml_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.swarm.name, "content-personalization");
        assert_eq!(config.consensus.confidence_threshold, 0.6);
        // Non-overridden values retain defaults
        assert_eq!(config.consensus.high_max_std_dev, 10.0);
        assert_eq!(config.dispatch.unit_timeout_ms, 2000);
    }

    #[test]
    fn test_validation_catches_inverted_bands() {
        let mut config = SwarmConfig::default();
        config.consensus.high_max_std_dev = 25.0;
        config.consensus.medium_max_std_dev = 15.0;
        let result = config.validate();
        assert!(result.is_err(), "Inverted bands should fail validation");
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("must ascend")));
        }
    }

    #[test]
    fn test_validation_catches_bad_weight_bounds() {
        let mut config = SwarmConfig::default();
        config.trust.min_weight = 0.9;
        config.trust.max_weight = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = SwarmConfig::default();
        config.dispatch.unit_timeout_ms = 0;
        config.consensus.confidence_threshold = 1.5;
        config.store.history_retention = 0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3, "{errors:?}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_nan() {
        let mut config = SwarmConfig::default();
        config.trust.outcome_history_factor = f64::NAN;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn test_every_non_finite_band_is_reported() {
        let consensus = ConsensusConfig {
            high_max_std_dev: f64::NAN,
            low_max_std_dev: f64::INFINITY,
            ..ConsensusConfig::default()
        };
        match consensus.validate().unwrap_err() {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 2, "{errors:?}");
                assert!(errors.iter().any(|e| e.starts_with("consensus.high_max_std_dev")));
                assert!(errors.iter().any(|e| e.starts_with("consensus.low_max_std_dev")));
            }
            other => panic!("expected validation failure, got {other}"),
        }
    }

    #[test]
    fn test_trust_section_validates_alone() {
        assert!(TrustConfig::default().validate().is_ok());
        let inverted = TrustConfig {
            min_weight: 0.9,
            max_weight: 0.5,
            ..TrustConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_batch_shorter_than_unit_rejected() {
        let mut config = SwarmConfig::default();
        config.dispatch.batch_timeout_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let original = SwarmConfig::default();
        let toml_str = original.to_toml().expect("serialization should work");
        assert!(toml_str.contains("[consensus]"), "Missing consensus section");
        let roundtripped: SwarmConfig = toml::from_str(&toml_str).expect("deserialization should work");
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn test_load_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[consensus\nconflict_delta = ").unwrap();
        let err = SwarmConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref p, _) if p == &path));
    }
}
