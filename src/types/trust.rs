//! Per-specialist trust records and the read-only snapshot handed to consensus

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SpecialistId;

/// Historical reliability of one specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    /// Consensus multiplier, bounded by the ledger's [min_weight, max_weight]
    pub weight: f64,
    /// Outcome samples folded into `running_accuracy`
    pub sample_count: u64,
    /// Exponential moving average of outcome accuracy (0-1)
    pub running_accuracy: f64,
    /// Recommendations this specialist has contributed to decisions
    #[serde(default)]
    pub recommendations_seen: u64,
    /// Mean confidence across contributed recommendations
    #[serde(default)]
    pub average_confidence: f64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrustRecord {
    /// Neutral starting record.
    pub const fn neutral(weight: f64, accuracy: f64) -> Self {
        Self {
            weight,
            sample_count: 0,
            running_accuracy: accuracy,
            recommendations_seen: 0,
            average_confidence: 0.0,
            updated_at: None,
        }
    }
}

/// Consistent, read-only view of the ledger for one consensus invocation.
///
/// Specialists without a record resolve to `default_weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    records: BTreeMap<SpecialistId, TrustRecord>,
    default_weight: f64,
}

impl TrustSnapshot {
    pub const fn new(records: BTreeMap<SpecialistId, TrustRecord>, default_weight: f64) -> Self {
        Self {
            records,
            default_weight,
        }
    }

    /// Snapshot where every specialist carries the same weight.
    pub const fn uniform(weight: f64) -> Self {
        Self::new(BTreeMap::new(), weight)
    }

    pub fn weight_of(&self, specialist: SpecialistId) -> f64 {
        self.records
            .get(&specialist)
            .map_or(self.default_weight, |r| r.weight)
    }

    pub fn get(&self, specialist: SpecialistId) -> Option<&TrustRecord> {
        self.records.get(&specialist)
    }

    pub const fn records(&self) -> &BTreeMap<SpecialistId, TrustRecord> {
        &self.records
    }

    pub const fn default_weight(&self) -> f64 {
        self.default_weight
    }
}
