//! Specialist identities, urgency and the Recommendation produced per unit run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Specialist Identity
// ============================================================================

/// Closed set of analyzer identities a swarm can register.
///
/// Each identity appears at most once per swarm. `Consensus` is reserved for
/// recommendations synthesized by the consensus builder and can never be
/// registered as a unit.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistId {
    DemographicAnalyzer,
    BehavioralProfiler,
    IntentDetector,
    FinancialAssessor,
    EngagementScorer,
    CommunicationOptimizer,
    CompetitiveAnalyst,
    TimingPredictor,
    RiskEvaluator,
    OpportunityIdentifier,
    MarketAnalyst,
    Consensus,
}

impl SpecialistId {
    /// Identities that may be registered with a dispatcher.
    pub const REGISTRABLE: [SpecialistId; 11] = [
        SpecialistId::DemographicAnalyzer,
        SpecialistId::BehavioralProfiler,
        SpecialistId::IntentDetector,
        SpecialistId::FinancialAssessor,
        SpecialistId::EngagementScorer,
        SpecialistId::CommunicationOptimizer,
        SpecialistId::CompetitiveAnalyst,
        SpecialistId::TimingPredictor,
        SpecialistId::RiskEvaluator,
        SpecialistId::OpportunityIdentifier,
        SpecialistId::MarketAnalyst,
    ];

    /// Stable wire name (matches the serde representation).
    pub const fn as_str(self) -> &'static str {
        match self {
            SpecialistId::DemographicAnalyzer => "demographic_analyzer",
            SpecialistId::BehavioralProfiler => "behavioral_profiler",
            SpecialistId::IntentDetector => "intent_detector",
            SpecialistId::FinancialAssessor => "financial_assessor",
            SpecialistId::EngagementScorer => "engagement_scorer",
            SpecialistId::CommunicationOptimizer => "communication_optimizer",
            SpecialistId::CompetitiveAnalyst => "competitive_analyst",
            SpecialistId::TimingPredictor => "timing_predictor",
            SpecialistId::RiskEvaluator => "risk_evaluator",
            SpecialistId::OpportunityIdentifier => "opportunity_identifier",
            SpecialistId::MarketAnalyst => "market_analyst",
            SpecialistId::Consensus => "consensus",
        }
    }

    /// Parse a wire name back into an identity.
    pub fn parse(name: &str) -> Option<Self> {
        Self::REGISTRABLE
            .into_iter()
            .chain(std::iter::once(SpecialistId::Consensus))
            .find(|id| id.as_str() == name)
    }

    pub const fn is_reserved(self) -> bool {
        matches!(self, SpecialistId::Consensus)
    }
}

impl std::fmt::Display for SpecialistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Urgency
// ============================================================================

/// How soon a recommendation should be acted on. Ordered low < critical.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::High => write!(f, "high"),
            Urgency::Critical => write!(f, "critical"),
        }
    }
}

// ============================================================================
// Recommendation
// ============================================================================

/// Rejected recommendation fields.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecommendationError {
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("score {0} outside [0, 100]")]
    ScoreOutOfRange(f64),
}

/// One specialist's finding for one subject.
///
/// Fields are private so a constructed value cannot drift outside its
/// declared ranges; use the accessors to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    specialist: SpecialistId,
    confidence: f64,
    score: f64,
    urgency: Urgency,
    rationale: String,
    #[serde(default)]
    suggested_action: serde_json::Value,
    produced_at: DateTime<Utc>,
}

impl Recommendation {
    /// Create a recommendation stamped with the current time.
    ///
    /// `confidence` must lie in [0, 1] and `score` in [0, 100]; NaN is rejected.
    pub fn new(
        specialist: SpecialistId,
        confidence: f64,
        score: f64,
        urgency: Urgency,
        rationale: impl Into<String>,
    ) -> Result<Self, RecommendationError> {
        let rec = Self {
            specialist,
            confidence,
            score,
            urgency,
            rationale: rationale.into(),
            suggested_action: serde_json::Value::Null,
            produced_at: Utc::now(),
        };
        rec.validate()?;
        Ok(rec)
    }

    /// Recommendation derived from other recommendations rather than a unit.
    ///
    /// Aggregates can drift past their bounds by a rounding error, so values
    /// are clamped instead of rejected.
    pub(crate) fn synthesized(
        specialist: SpecialistId,
        confidence: f64,
        score: f64,
        rationale: String,
        suggested_action: serde_json::Value,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            specialist,
            confidence: confidence.clamp(0.0, 1.0),
            score: score.clamp(0.0, 100.0),
            urgency: Urgency::Low,
            rationale,
            suggested_action,
            produced_at,
        }
    }

    /// Attach the collaborator-defined action payload.
    #[must_use]
    pub fn with_action(mut self, action: serde_json::Value) -> Self {
        self.suggested_action = action;
        self
    }

    /// Override the production timestamp (replays, deterministic fixtures).
    #[must_use]
    pub fn produced_at_time(mut self, at: DateTime<Utc>) -> Self {
        self.produced_at = at;
        self
    }

    /// Re-check range invariants, e.g. after deserializing from a collaborator.
    pub fn validate(&self) -> Result<(), RecommendationError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(RecommendationError::ConfidenceOutOfRange(self.confidence));
        }
        if !(0.0..=100.0).contains(&self.score) {
            return Err(RecommendationError::ScoreOutOfRange(self.score));
        }
        Ok(())
    }

    pub const fn specialist(&self) -> SpecialistId {
        self.specialist
    }

    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    pub const fn score(&self) -> f64 {
        self.score
    }

    pub const fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub const fn suggested_action(&self) -> &serde_json::Value {
        &self.suggested_action
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}
