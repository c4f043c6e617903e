//! Consensus Builder - reduces surviving recommendations into one Decision
//!
//! The reduction is purely numeric over the declared recommendation fields:
//!
//! - `aggregate_score`: mean score weighted by `confidence × trust weight`
//! - `aggregate_confidence`: unweighted mean confidence
//! - `consensus_level`: banded population standard deviation of scores
//! - `conflicts`: every pair whose scores differ by more than `conflict_delta`
//!
//! Inputs are put into a canonical order first, so the output depends only on
//! the recommendation set and never on arrival order.

use std::cmp::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, ConsensusConfig};
use crate::types::{
    ActionPriority, Conflict, ConsensusLevel, Decision, Recommendation, SpecialistId,
    TrustSnapshot,
};

/// Weights below this are treated as zero total weight.
const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("no recommendations survived for subject {subject_id}")]
    InsufficientInput { subject_id: String },
}

/// Reduces recommendations with thresholds that can be swapped at runtime.
///
/// A `build` call loads the thresholds once, so a concurrent `reconfigure`
/// never mixes old and new values within one decision.
pub struct ConsensusBuilder {
    config: ArcSwap<ConsensusConfig>,
}

impl ConsensusBuilder {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Thresholds currently in effect.
    pub fn config(&self) -> Arc<ConsensusConfig> {
        self.config.load_full()
    }

    /// Validate and swap in new thresholds.
    pub fn reconfigure(&self, config: ConsensusConfig) -> Result<(), ConfigError> {
        config.validate()?;
        info!(
            high = config.high_max_std_dev,
            medium = config.medium_max_std_dev,
            low = config.low_max_std_dev,
            conflict_delta = config.conflict_delta,
            confidence_threshold = config.confidence_threshold,
            "Consensus thresholds updated"
        );
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Reduce `recommendations` into a Decision for `subject_id`.
    ///
    /// Fails only when `recommendations` is empty; a subject-level fallback
    /// for that case belongs to the caller.
    pub fn build(
        &self,
        subject_id: &str,
        recommendations: &[Recommendation],
        trust: &TrustSnapshot,
    ) -> Result<Decision, ConsensusError> {
        let mut ordered = recommendations.to_vec();
        ordered.sort_by(canonical_order);

        let Some(primary) = ordered.iter().min_by(|a, b| precedence(a, b)).cloned() else {
            return Err(ConsensusError::InsufficientInput {
                subject_id: subject_id.to_string(),
            });
        };

        let config = self.config.load();

        let aggregate_score = weighted_score(&ordered, trust);
        let aggregate_confidence = mean_of(ordered.iter().map(Recommendation::confidence));
        let consensus_level = classify(score_spread(&ordered), &config);
        let conflicts = find_conflicts(&ordered, config.conflict_delta);

        let fallback_applied = aggregate_confidence < config.confidence_threshold;
        let mut rationale = level_rationale(consensus_level, ordered.len());

        let (primary_recommendation, action_priority) = if fallback_applied {
            warn!(
                subject_id,
                aggregate_confidence,
                threshold = config.confidence_threshold,
                "Consensus confidence below threshold, applying fallback"
            );
            rationale.push_str(&format!(
                "; confidence {aggregate_confidence:.2} below threshold {:.2}, deferred to manual review",
                config.confidence_threshold
            ));
            (
                fallback_recommendation(&primary, &ordered, aggregate_score, aggregate_confidence),
                ActionPriority::Low,
            )
        } else {
            let highest = ordered
                .iter()
                .map(Recommendation::urgency)
                .max()
                .unwrap_or_default();
            (primary, ActionPriority::from(highest))
        };

        Ok(Decision {
            subject_id: subject_id.to_string(),
            consensus_level,
            aggregate_score: aggregate_score.clamp(0.0, 100.0),
            aggregate_confidence: aggregate_confidence.clamp(0.0, 1.0),
            primary_recommendation,
            conflicts,
            fallback_applied,
            action_priority,
            rationale,
            recommendations: ordered,
            created_at: Utc::now(),
        })
    }
}

impl Default for ConsensusBuilder {
    fn default() -> Self {
        Self::new(ConsensusConfig::default())
    }
}

// ============================================================================
// Reduction Steps
// ============================================================================

/// Total order over recommendations independent of arrival.
fn canonical_order(a: &Recommendation, b: &Recommendation) -> Ordering {
    a.specialist()
        .cmp(&b.specialist())
        .then_with(|| a.produced_at().cmp(&b.produced_at()))
        .then_with(|| a.score().total_cmp(&b.score()))
        .then_with(|| a.confidence().total_cmp(&b.confidence()))
        .then_with(|| a.urgency().cmp(&b.urgency()))
        .then_with(|| a.rationale().cmp(b.rationale()))
}

/// `Less` means `a` is the better primary candidate: higher confidence,
/// then higher score, then earlier, then lower specialist id.
fn precedence(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.confidence()
        .total_cmp(&a.confidence())
        .then_with(|| b.score().total_cmp(&a.score()))
        .then_with(|| a.produced_at().cmp(&b.produced_at()))
        .then_with(|| a.specialist().cmp(&b.specialist()))
}

fn weighted_score(ordered: &[Recommendation], trust: &TrustSnapshot) -> f64 {
    let (weighted_sum, total_weight) = ordered.iter().fold((0.0, 0.0), |(sum, total), rec| {
        let weight = rec.confidence() * trust.weight_of(rec.specialist());
        (sum + rec.score() * weight, total + weight)
    });

    if total_weight > WEIGHT_EPSILON {
        weighted_sum / total_weight
    } else {
        mean_of(ordered.iter().map(Recommendation::score))
    }
}

fn mean_of(values: impl IntoIterator<Item = f64>) -> f64 {
    use statrs::statistics::Statistics;
    values.into_iter().mean()
}

/// Population standard deviation of scores; zero with fewer than two.
fn score_spread(ordered: &[Recommendation]) -> f64 {
    use statrs::statistics::Statistics;
    if ordered.len() < 2 {
        return 0.0;
    }
    ordered.iter().map(Recommendation::score).population_std_dev()
}

/// Band a score standard deviation into a consensus level.
pub fn classify(std_dev: f64, config: &ConsensusConfig) -> ConsensusLevel {
    if std_dev <= config.high_max_std_dev {
        ConsensusLevel::High
    } else if std_dev <= config.medium_max_std_dev {
        ConsensusLevel::Medium
    } else if std_dev <= config.low_max_std_dev {
        ConsensusLevel::Low
    } else {
        ConsensusLevel::Conflict
    }
}

fn find_conflicts(ordered: &[Recommendation], threshold: f64) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, first) in ordered.iter().enumerate() {
        for second in &ordered[i + 1..] {
            let delta = (first.score() - second.score()).abs();
            if delta > threshold {
                conflicts.push(Conflict {
                    first: first.specialist(),
                    second: second.specialist(),
                    delta,
                });
            }
        }
    }
    conflicts
}

fn level_rationale(level: ConsensusLevel, contributors: usize) -> String {
    match level {
        ConsensusLevel::High => format!("Strong agreement across {contributors} specialist(s)"),
        ConsensusLevel::Medium => {
            format!("Moderate agreement across {contributors} specialists with minor variations")
        }
        ConsensusLevel::Low => {
            format!("Weak agreement across {contributors} specialists; weigh the differing views")
        }
        ConsensusLevel::Conflict => {
            "Significant disagreement between specialists; manual review recommended".to_string()
        }
    }
}

/// Neutral, low-urgency stand-in for a decision too uncertain to act on.
///
/// Carries the deferred action so a reviewer can still see what was proposed.
/// Stamped with the newest input time so repeated builds agree.
fn fallback_recommendation(
    deferred: &Recommendation,
    ordered: &[Recommendation],
    aggregate_score: f64,
    aggregate_confidence: f64,
) -> Recommendation {
    let produced_at = ordered
        .iter()
        .map(Recommendation::produced_at)
        .max()
        .unwrap_or_else(|| deferred.produced_at());

    Recommendation::synthesized(
        SpecialistId::Consensus,
        aggregate_confidence,
        aggregate_score,
        "Specialist confidence too low to act automatically; queue for manual review".to_string(),
        json!({
            "action": "manual_review",
            "deferred_from": deferred.specialist(),
            "deferred_action": deferred.suggested_action(),
        }),
        produced_at,
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Urgency;
    use chrono::{DateTime, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn rec(id: SpecialistId, score: f64, confidence: f64) -> Recommendation {
        Recommendation::new(id, confidence, score, Urgency::Medium, format!("{id} says {score}"))
            .unwrap()
            .produced_at_time(at(0))
    }

    fn uniform() -> TrustSnapshot {
        TrustSnapshot::uniform(0.8)
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        let err = ConsensusBuilder::default().build("lead-0", &[], &uniform()).unwrap_err();
        assert_eq!(
            err,
            ConsensusError::InsufficientInput { subject_id: "lead-0".to_string() }
        );
    }

    #[test]
    fn test_close_scores_reach_high_consensus() {
        let recs = vec![
            rec(SpecialistId::BehavioralProfiler, 80.0, 0.9),
            rec(SpecialistId::IntentDetector, 82.0, 0.85),
            rec(SpecialistId::FinancialAssessor, 78.0, 0.88),
        ];
        let decision = ConsensusBuilder::default().build("lead-1", &recs, &uniform()).unwrap();

        assert_eq!(decision.consensus_level, ConsensusLevel::High);
        assert!((decision.aggregate_score - 80.2).abs() < 0.5, "{}", decision.aggregate_score);
        assert!(decision.conflicts.is_empty());
        assert!(!decision.fallback_applied);
        assert_eq!(decision.primary_recommendation.specialist(), SpecialistId::BehavioralProfiler);
        assert_eq!(decision.action_priority, ActionPriority::Medium);
    }

    #[test]
    fn test_polar_scores_conflict_without_forcing_fallback() {
        let recs = vec![
            rec(SpecialistId::IntentDetector, 90.0, 0.9),
            rec(SpecialistId::RiskEvaluator, 20.0, 0.9),
        ];
        let decision = ConsensusBuilder::default().build("lead-2", &recs, &uniform()).unwrap();

        assert_eq!(decision.consensus_level, ConsensusLevel::Conflict);
        assert_eq!(decision.conflicts.len(), 1);
        assert_eq!(decision.conflicts[0].first, SpecialistId::IntentDetector);
        assert_eq!(decision.conflicts[0].second, SpecialistId::RiskEvaluator);
        assert_eq!(decision.conflicts[0].delta, 70.0);
        assert!(!decision.fallback_applied, "level alone must not force fallback");
        assert!(decision.rationale.contains("manual review"));
    }

    #[test]
    fn test_band_edges_are_inclusive() {
        let config = ConsensusConfig::default();
        assert_eq!(classify(10.0, &config), ConsensusLevel::High);
        assert_eq!(classify(10.01, &config), ConsensusLevel::Medium);
        assert_eq!(classify(20.0, &config), ConsensusLevel::Medium);
        assert_eq!(classify(30.0, &config), ConsensusLevel::Low);
        assert_eq!(classify(30.01, &config), ConsensusLevel::Conflict);
    }

    #[test]
    fn test_conflict_threshold_is_strict() {
        let recs = vec![
            rec(SpecialistId::IntentDetector, 70.0, 0.9),
            rec(SpecialistId::TimingPredictor, 40.0, 0.9),
        ];
        let decision = ConsensusBuilder::default().build("lead-3", &recs, &uniform()).unwrap();
        assert!(decision.conflicts.is_empty(), "delta of exactly 30 is not a conflict");
    }

    #[test]
    fn test_low_confidence_applies_fallback() {
        let recs = vec![
            rec(SpecialistId::IntentDetector, 90.0, 0.5),
            rec(SpecialistId::TimingPredictor, 85.0, 0.6),
        ]
        .into_iter()
        .map(|r| r.with_action(json!({"channel": "sms"})))
        .collect::<Vec<_>>();
        let decision = ConsensusBuilder::default().build("lead-4", &recs, &uniform()).unwrap();

        assert!(decision.fallback_applied);
        assert_eq!(decision.action_priority, ActionPriority::Low);
        let primary = &decision.primary_recommendation;
        assert_eq!(primary.specialist(), SpecialistId::Consensus);
        assert_eq!(primary.urgency(), Urgency::Low);
        assert_eq!(primary.suggested_action()["action"], "manual_review");
        assert_eq!(primary.suggested_action()["deferred_from"], "timing_predictor");
        assert_eq!(primary.suggested_action()["deferred_action"]["channel"], "sms");
        assert!((primary.confidence() - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_weight_uses_unweighted_mean() {
        let recs = vec![
            rec(SpecialistId::IntentDetector, 90.0, 0.0),
            rec(SpecialistId::TimingPredictor, 60.0, 0.0),
        ];
        let decision = ConsensusBuilder::default().build("lead-5", &recs, &uniform()).unwrap();
        assert_eq!(decision.aggregate_score, 75.0);
        assert!(decision.fallback_applied);
    }

    #[test]
    fn test_trust_weight_shifts_aggregate() {
        let recs = vec![
            rec(SpecialistId::IntentDetector, 100.0, 0.9),
            rec(SpecialistId::TimingPredictor, 0.0, 0.9),
        ];
        let mut records = std::collections::BTreeMap::new();
        records.insert(SpecialistId::IntentDetector, crate::types::TrustRecord::neutral(1.0, 0.8));
        records.insert(SpecialistId::TimingPredictor, crate::types::TrustRecord::neutral(0.25, 0.8));
        let trust = TrustSnapshot::new(records, 0.8);

        let decision = ConsensusBuilder::default().build("lead-6", &recs, &trust).unwrap();
        assert!((decision.aggregate_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_primary_tie_breaks() {
        let earlier = Recommendation::new(SpecialistId::TimingPredictor, 0.9, 70.0, Urgency::Low, "a")
            .unwrap()
            .produced_at_time(at(0));
        let later = Recommendation::new(SpecialistId::IntentDetector, 0.9, 70.0, Urgency::Low, "b")
            .unwrap()
            .produced_at_time(at(5));
        let lower_score = Recommendation::new(SpecialistId::BehavioralProfiler, 0.9, 60.0, Urgency::Low, "c")
            .unwrap()
            .produced_at_time(at(-5));

        let decision = ConsensusBuilder::default()
            .build("lead-7", &[later, lower_score, earlier], &uniform())
            .unwrap();
        assert_eq!(decision.primary_recommendation.specialist(), SpecialistId::TimingPredictor);
    }

    #[test]
    fn test_highest_urgency_sets_action_priority() {
        let recs = vec![
            rec(SpecialistId::IntentDetector, 80.0, 0.9),
            Recommendation::new(SpecialistId::TimingPredictor, 0.9, 85.0, Urgency::Critical, "now")
                .unwrap(),
        ];
        let decision = ConsensusBuilder::default().build("lead-8", &recs, &uniform()).unwrap();
        assert_eq!(decision.action_priority, ActionPriority::Immediate);
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let a = rec(SpecialistId::IntentDetector, 90.0, 0.8);
        let b = rec(SpecialistId::TimingPredictor, 40.0, 0.75);
        let c = rec(SpecialistId::FinancialAssessor, 65.0, 0.95);
        let builder = ConsensusBuilder::default();

        let first = builder.build("lead-9", &[a.clone(), b.clone(), c.clone()], &uniform()).unwrap();
        let second = builder.build("lead-9", &[c, a, b], &uniform()).unwrap();

        assert_eq!(first.aggregate_score.to_bits(), second.aggregate_score.to_bits());
        assert_eq!(first.conflicts, second.conflicts);
        assert_eq!(first.recommendations, second.recommendations);
        assert_eq!(first.primary_recommendation, second.primary_recommendation);
    }

    #[test]
    fn test_reconfigure_validates_and_applies() {
        let builder = ConsensusBuilder::default();
        let mut bad = ConsensusConfig::default();
        bad.confidence_threshold = 2.0;
        assert!(builder.reconfigure(bad).is_err());
        assert_eq!(builder.config().confidence_threshold, 0.7);

        let mut stricter = ConsensusConfig::default();
        stricter.confidence_threshold = 0.95;
        builder.reconfigure(stricter).unwrap();

        let recs = vec![rec(SpecialistId::IntentDetector, 80.0, 0.9)];
        let decision = builder.build("lead-10", &recs, &uniform()).unwrap();
        assert!(decision.fallback_applied);
    }
}
