//! Specialist trait and the default lead-intelligence units
//!
//! Each specialist analyzes the shared subject payload from one perspective
//! and returns a scored Recommendation, or an error the dispatcher records
//! as a failure.
//!
//! ## Specialists
//!
//! 1. **BehavioralProfiler** - site visits, email engagement, recency
//! 2. **IntentDetector** - buying and hesitation signals in messages
//! 3. **FinancialAssessor** - budget, pre-approval, down payment
//! 4. **TimingPredictor** - stated purchase timeline

pub mod behavioral;
pub mod intent;
pub mod financial;
pub mod timing;

pub use behavioral::BehavioralProfiler;
pub use intent::IntentDetector;
pub use financial::FinancialAssessor;
pub use timing::TimingPredictor;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Payload, Recommendation, RecommendationError, SpecialistId};

/// What a unit reports when it cannot produce a recommendation.
#[derive(Debug, Error)]
pub enum SpecialistError {
    #[error("payload is missing {0}")]
    MissingData(&'static str),

    #[error("collaborator call failed: {0}")]
    Collaborator(String),

    #[error(transparent)]
    InvalidRecommendation(#[from] RecommendationError),
}

/// One independent analyzer.
///
/// Units must be stateless with respect to a run: the same payload may be
/// analyzed by the same unit for many subjects concurrently.
#[async_trait]
pub trait Specialist: Send + Sync {
    /// Declared identity, unique within a swarm
    fn id(&self) -> SpecialistId;

    /// Analyze the subject payload
    async fn analyze(&self, payload: &Payload) -> Result<Recommendation, SpecialistError>;
}

/// Create the default set of 4 lead-intelligence specialists
pub fn default_specialists() -> Vec<Arc<dyn Specialist>> {
    vec![
        Arc::new(BehavioralProfiler),
        Arc::new(IntentDetector),
        Arc::new(FinancialAssessor),
        Arc::new(TimingPredictor),
    ]
}

// ============================================================================
// Payload Helpers
// ============================================================================

/// Numeric field, accepting integers and floats. Non-finite values are ignored.
pub(crate) fn number(payload: &Payload, key: &str) -> Option<f64> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .filter(|v| v.is_finite())
}

pub(crate) fn flag(payload: &Payload, key: &str) -> Option<bool> {
    payload.get(key).and_then(serde_json::Value::as_bool)
}

/// String array field, lowercased. Non-string entries are skipped.
pub(crate) fn texts(payload: &Payload, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}
