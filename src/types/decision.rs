//! Consensus output types: Decision, ConsensusLevel, Conflict, ActionPriority

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Recommendation, SpecialistId, Urgency};

/// Agreement band derived from the spread of specialist scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsensusLevel {
    High,
    Medium,
    Low,
    Conflict,
}

impl std::fmt::Display for ConsensusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusLevel::High => write!(f, "HIGH"),
            ConsensusLevel::Medium => write!(f, "MEDIUM"),
            ConsensusLevel::Low => write!(f, "LOW"),
            ConsensusLevel::Conflict => write!(f, "CONFLICT"),
        }
    }
}

/// How quickly downstream consumers should act on a decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
    Immediate,
}

impl From<Urgency> for ActionPriority {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Critical => ActionPriority::Immediate,
            Urgency::High => ActionPriority::High,
            Urgency::Medium => ActionPriority::Medium,
            Urgency::Low => ActionPriority::Low,
        }
    }
}

impl std::fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionPriority::Low => write!(f, "low"),
            ActionPriority::Medium => write!(f, "medium"),
            ActionPriority::High => write!(f, "high"),
            ActionPriority::Immediate => write!(f, "immediate"),
        }
    }
}

/// A pair of specialists whose scores differ by more than the disagreement threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub first: SpecialistId,
    pub second: SpecialistId,
    /// Absolute score difference (points)
    pub delta: f64,
}

/// The consensus builder's output for one subject.
///
/// Created once per orchestration run and never mutated; a later run for the
/// same subject supersedes it with a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Subject (lead, property, content item) this decision is about
    pub subject_id: String,
    /// Agreement band from the score standard deviation
    pub consensus_level: ConsensusLevel,
    /// Trust- and confidence-weighted mean score (0-100)
    pub aggregate_score: f64,
    /// Unweighted mean of specialist confidences (0-1)
    pub aggregate_confidence: f64,
    /// Representative recommendation; synthesized when the fallback applies
    pub primary_recommendation: Recommendation,
    /// Pairs of specialists in significant disagreement
    pub conflicts: Vec<Conflict>,
    /// True when confidence fell below the consensus threshold
    pub fallback_applied: bool,
    /// Highest contributing urgency mapped to an action priority
    pub action_priority: ActionPriority,
    /// Human-readable explanation of the consensus level
    pub rationale: String,
    /// Contributing recommendations in canonical order
    pub recommendations: Vec<Recommendation>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// Specialists that contributed to this decision.
    pub fn contributors(&self) -> impl Iterator<Item = SpecialistId> + '_ {
        self.recommendations.iter().map(Recommendation::specialist)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
