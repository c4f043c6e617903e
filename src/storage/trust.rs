//! Trust Ledger - per-specialist reliability learned from outcomes and ratings
//!
//! Every mutation is a read-modify-write through `TrustBackend::try_update`.
//! Contended attempts are retried with exponential backoff and never reach
//! the caller unless every attempt fails. All values are clamped on the way
//! in, so no input can push a record outside its bounds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use super::trust_backend::{InMemoryTrustBackend, TrustBackend};
use crate::config::{ConfigError, TrustConfig};
use crate::types::{SpecialistId, TrustRecord, TrustSnapshot};

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("concurrent update to the trust record of {0}")]
    Contention(SpecialistId),

    #[error("trust store database error: {0}")]
    Database(#[from] sled::Error),

    #[error("trust record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("gave up updating {specialist} after {attempts} contended attempts")]
    RetriesExhausted { specialist: SpecialistId, attempts: u32 },

    #[error("{0} is reserved and carries no trust record")]
    ReservedSpecialist(SpecialistId),

    #[error("{field} must be a finite number (got {value})")]
    InvalidInput { field: &'static str, value: f64 },

    #[error("invalid trust config: {0}")]
    Config(#[from] ConfigError),
}

/// Process-wide trust state, shared by every orchestration run.
pub struct TrustLedger {
    backend: Arc<dyn TrustBackend>,
    config: TrustConfig,
}

impl TrustLedger {
    /// Fails if `config` does not validate; every blend clamps to its weight bounds.
    pub fn new(backend: Arc<dyn TrustBackend>, config: TrustConfig) -> Result<Self, TrustError> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn in_memory(config: TrustConfig) -> Result<Self, TrustError> {
        Self::new(Arc::new(InMemoryTrustBackend::new()), config)
    }

    pub const fn config(&self) -> &TrustConfig {
        &self.config
    }

    fn neutral(&self) -> TrustRecord {
        TrustRecord::neutral(self.config.initial_weight, self.config.initial_accuracy)
    }

    /// Read-only view for one consensus invocation.
    ///
    /// Specialists with no history resolve to `initial_weight`.
    pub fn get_snapshot(&self) -> Result<TrustSnapshot, TrustError> {
        Ok(TrustSnapshot::new(
            self.backend.load_all()?,
            self.config.initial_weight,
        ))
    }

    /// Current record, or the neutral one if the specialist has no history.
    pub fn record(&self, specialist: SpecialistId) -> Result<TrustRecord, TrustError> {
        Ok(self.backend.load(specialist)?.unwrap_or_else(|| self.neutral()))
    }

    /// Fold one real-world outcome into the specialist's accuracy and weight.
    ///
    /// `accuracy = 1 - |predicted - actual| / 100`, blended with
    /// `outcome_history_factor` of the stored value. Scores outside [0, 100]
    /// are clamped; NaN or infinite input is rejected.
    pub async fn record_outcome(
        &self,
        specialist: SpecialistId,
        predicted_score: f64,
        actual_outcome_score: f64,
    ) -> Result<TrustRecord, TrustError> {
        let predicted = finite("predicted_score", predicted_score)?.clamp(0.0, 100.0);
        let actual = finite("actual_outcome_score", actual_outcome_score)?.clamp(0.0, 100.0);
        let accuracy = 1.0 - (predicted - actual).abs() / 100.0;

        let keep = self.config.outcome_history_factor;
        let (min_weight, max_weight) = (self.config.min_weight, self.config.max_weight);

        let record = self
            .update(specialist, move |mut r| {
                r.running_accuracy = (r.running_accuracy * keep + accuracy * (1.0 - keep)).clamp(0.0, 1.0);
                r.weight = (r.weight * keep + accuracy * (1.0 - keep)).clamp(min_weight, max_weight);
                r.sample_count = r.sample_count.saturating_add(1);
                r
            })
            .await?;

        info!(
            specialist = %specialist,
            accuracy,
            running_accuracy = record.running_accuracy,
            weight = record.weight,
            samples = record.sample_count,
            "Outcome recorded"
        );
        Ok(record)
    }

    /// Blend a human rating in [0, 1] into the specialist's weight.
    ///
    /// Ratings outside the range are clamped.
    pub async fn apply_manual_adjustment(
        &self,
        specialist: SpecialistId,
        human_rating: f64,
    ) -> Result<TrustRecord, TrustError> {
        let rating = finite("human_rating", human_rating)?.clamp(0.0, 1.0);
        let keep = self.config.manual_history_factor;
        let (min_weight, max_weight) = (self.config.min_weight, self.config.max_weight);

        let record = self
            .update(specialist, move |mut r| {
                r.weight = (r.weight * keep + rating * (1.0 - keep)).clamp(min_weight, max_weight);
                r
            })
            .await?;

        info!(specialist = %specialist, rating, weight = record.weight, "Manual trust adjustment applied");
        Ok(record)
    }

    /// Count one contributed recommendation and fold in its confidence.
    pub async fn observe(
        &self,
        specialist: SpecialistId,
        confidence: f64,
    ) -> Result<TrustRecord, TrustError> {
        let confidence = finite("confidence", confidence)?.clamp(0.0, 1.0);
        self.update(specialist, move |mut r| {
            r.recommendations_seen = r.recommendations_seen.saturating_add(1);
            let n = r.recommendations_seen as f64;
            r.average_confidence =
                (r.average_confidence + (confidence - r.average_confidence) / n).clamp(0.0, 1.0);
            r
        })
        .await
    }

    /// Administrative reset back to neutral defaults.
    pub async fn reset(&self, specialist: SpecialistId) -> Result<(), TrustError> {
        self.backend.remove(specialist)?;
        warn!(specialist = %specialist, "Trust record reset to defaults");
        Ok(())
    }

    /// Serialized read-modify-write with bounded retries.
    async fn update<F>(&self, specialist: SpecialistId, apply: F) -> Result<TrustRecord, TrustError>
    where
        F: Fn(TrustRecord) -> TrustRecord + Send + Sync,
    {
        if specialist.is_reserved() {
            return Err(TrustError::ReservedSpecialist(specialist));
        }

        let neutral = self.neutral();
        let stamped = |current: Option<TrustRecord>| {
            let mut next = apply(current.unwrap_or_else(|| neutral.clone()));
            next.updated_at = Some(Utc::now());
            next
        };

        let attempts = self.config.max_update_attempts.max(1);
        for attempt in 1..=attempts {
            let result = self.backend.try_update(specialist, &stamped);
            match result {
                Err(TrustError::Contention(_)) if attempt < attempts => {
                    let backoff = Duration::from_millis(
                        self.config.retry_backoff_ms.saturating_mul(1 << (attempt - 1).min(10)),
                    );
                    warn!(
                        specialist = %specialist,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Trust update contended, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(TrustError::Contention(_)) => break,
                other => return other,
            }
        }

        Err(TrustError::RetriesExhausted { specialist, attempts })
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, TrustError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TrustError::InvalidInput { field, value })
    }
}

// ============================================================================
// Tests
// ============================================================================
