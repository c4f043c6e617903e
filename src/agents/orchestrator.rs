//! Orchestrator - one swarm composed end to end
//!
//! A run for one subject goes:
//!
//! 1. **Guard**: `DecisionStore::try_begin` suppresses a duplicate run
//! 2. **Dispatch**: every specialist analyzes the payload concurrently
//! 3. **Trust**: one ledger snapshot is taken for the whole reduction
//! 4. **Consensus**: surviving recommendations reduce to a Decision
//! 5. **Store**: the Decision becomes the subject's latest and enters history
//!
//! Outcome feedback arrives later through `learn_from_outcome`, which routes
//! the real-world result back to every specialist that contributed.
//!
//! The orchestrator owns all swarm state. Build one at startup and share it
//! by reference; there is no global instance.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::consensus::{ConsensusBuilder, ConsensusError};
use super::dispatcher::{Dispatcher, RegistryError};
use super::specialists::{self, Specialist};
use crate::config::{ConfigError, ConsensusConfig, SwarmConfig};
use crate::storage::{
    DecisionStore, InMemoryTrustBackend, Lease, TrustBackend, TrustError, TrustLedger,
};
use crate::types::{ConsensusLevel, Decision, Payload, SpecialistId, TrustSnapshot};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("a decision for subject {0} is already in flight")]
    DuplicateInFlight(String),

    #[error("no specialist produced a usable recommendation for subject {subject_id}; needs human review")]
    InsufficientInput { subject_id: String },

    #[error("run for subject {0} was cancelled before any recommendation arrived")]
    Cancelled(String),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid swarm config: {0}")]
    Config(#[from] ConfigError),
}

impl From<ConsensusError> for OrchestrationError {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::InsufficientInput { subject_id } => {
                OrchestrationError::InsufficientInput { subject_id }
            }
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Running totals across every completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwarmMetrics {
    pub runs_completed: u64,
    /// Mean aggregate confidence of completed runs
    pub average_confidence: f64,
    /// Mean dispatch time (ms)
    pub average_processing_ms: f64,
    pub high_consensus_runs: u64,
    /// Share of runs reaching HIGH consensus (percent)
    pub agreement_rate: f64,
    pub fallbacks_applied: u64,
    pub conflicts_detected: u64,
    /// Units that contributed nothing, across all runs
    pub specialist_failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl SwarmMetrics {
    fn record_run(&mut self, decision: &Decision, elapsed: Duration) {
        self.runs_completed += 1;
        let n = self.runs_completed as f64;

        self.average_confidence += (decision.aggregate_confidence - self.average_confidence) / n;
        self.average_processing_ms +=
            (elapsed.as_secs_f64() * 1000.0 - self.average_processing_ms) / n;

        if decision.consensus_level == ConsensusLevel::High {
            self.high_consensus_runs += 1;
        }
        self.agreement_rate = self.high_consensus_runs as f64 / n * 100.0;

        if decision.fallback_applied {
            self.fallbacks_applied += 1;
        }
        self.conflicts_detected += decision.conflicts.len() as u64;
        self.last_run_at = Some(decision.created_at);
    }
}

/// Point-in-time report on a swarm.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmStatus {
    pub name: String,
    pub specialists: Vec<SpecialistId>,
    pub in_flight: usize,
    pub decisions_retained: usize,
    pub metrics: SwarmMetrics,
    pub trust: TrustSnapshot,
}

// ============================================================================
// In-Flight Guard
// ============================================================================

/// Releases the subject's marker if the run ends without a decision,
/// including when the run's future is dropped mid-flight.
struct InFlightGuard<'a> {
    store: &'a DecisionStore,
    lease: Option<Lease>,
}

impl InFlightGuard<'_> {
    fn complete(mut self, decision: Decision) -> Arc<Decision> {
        match self.lease.take() {
            Some(lease) => self.store.complete_lease(&lease, decision),
            None => self.store.complete(&decision.subject_id.clone(), decision),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.store.release(&lease);
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    name: String,
    dispatcher: Dispatcher,
    consensus: ConsensusBuilder,
    trust: TrustLedger,
    decisions: DecisionStore,
    metrics: Mutex<SwarmMetrics>,
}

impl Orchestrator {
    /// Assemble a swarm from explicit parts.
    pub fn new(
        config: &SwarmConfig,
        specialists: Vec<Arc<dyn Specialist>>,
        trust_backend: Arc<dyn TrustBackend>,
    ) -> Result<Self, OrchestrationError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(specialists, config.dispatch.clone())?;
        let trust = TrustLedger::new(trust_backend, config.trust.clone())?;

        info!(
            swarm = %config.swarm.name,
            specialists = dispatcher.len(),
            confidence_threshold = config.consensus.confidence_threshold,
            "Swarm orchestrator initialized"
        );

        Ok(Self {
            name: config.swarm.name.clone(),
            dispatcher,
            consensus: ConsensusBuilder::new(config.consensus.clone()),
            trust,
            decisions: DecisionStore::new(&config.store),
            metrics: Mutex::new(SwarmMetrics::default()),
        })
    }

    /// Default lead-intelligence specialists with an in-memory ledger.
    pub fn from_config(config: &SwarmConfig) -> Result<Self, OrchestrationError> {
        Self::new(
            config,
            specialists::default_specialists(),
            Arc::new(InMemoryTrustBackend::new()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub const fn consensus(&self) -> &ConsensusBuilder {
        &self.consensus
    }

    pub const fn trust(&self) -> &TrustLedger {
        &self.trust
    }

    pub const fn decisions(&self) -> &DecisionStore {
        &self.decisions
    }

    /// Run the full pipeline for one subject.
    pub async fn analyze(
        &self,
        subject_id: &str,
        payload: Payload,
    ) -> Result<Arc<Decision>, OrchestrationError> {
        self.analyze_with_cancel(subject_id, payload, &CancellationToken::new())
            .await
    }

    /// Run the full pipeline, stopping outstanding units when `cancel` fires.
    ///
    /// Recommendations collected before cancellation still produce a decision.
    pub async fn analyze_with_cancel(
        &self,
        subject_id: &str,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<Arc<Decision>, OrchestrationError> {
        let Some(lease) = self.decisions.try_begin(subject_id) else {
            warn!(subject_id, "Duplicate run suppressed");
            return Err(OrchestrationError::DuplicateInFlight(subject_id.to_string()));
        };
        let guard = InFlightGuard {
            store: &self.decisions,
            lease: Some(lease),
        };

        let report = self.dispatcher.run(subject_id, Arc::new(payload), cancel).await;
        self.lock_metrics().specialist_failures += report.failures.len() as u64;

        if report.recommendations.is_empty() {
            if report.cancelled {
                return Err(OrchestrationError::Cancelled(subject_id.to_string()));
            }
            warn!(subject_id, "No recommendations survived dispatch");
            return Err(OrchestrationError::InsufficientInput {
                subject_id: subject_id.to_string(),
            });
        }

        let trust = self.trust.get_snapshot().unwrap_or_else(|e| {
            warn!(subject_id, error = %e, "Trust snapshot unavailable, using neutral weights");
            TrustSnapshot::uniform(self.trust.config().initial_weight)
        });

        let decision = self.consensus.build(subject_id, &report.recommendations, &trust)?;

        for rec in &decision.recommendations {
            if let Err(e) = self.trust.observe(rec.specialist(), rec.confidence()).await {
                warn!(subject_id, specialist = %rec.specialist(), error = %e, "Failed to record participation");
            }
        }

        self.lock_metrics().record_run(&decision, report.elapsed);
        let stored = guard.complete(decision);

        info!(
            subject_id,
            consensus = %stored.consensus_level,
            score = stored.aggregate_score,
            confidence = stored.aggregate_confidence,
            priority = %stored.action_priority,
            conflicts = stored.conflicts.len(),
            fallback = stored.fallback_applied,
            "Decision complete"
        );

        Ok(stored)
    }

    /// Latest stored decision for a subject.
    pub fn latest(&self, subject_id: &str) -> Option<Arc<Decision>> {
        self.decisions.get_latest(subject_id)
    }

    /// Feed a real-world outcome back to every specialist behind the
    /// subject's latest decision.
    ///
    /// Every contributor is attempted; one failed update does not stop the
    /// rest. Returns the number of specialists updated, or `None` if the
    /// subject has no decision to learn from.
    pub async fn learn_from_outcome(&self, subject_id: &str, actual_outcome_score: f64) -> Option<usize> {
        let Some(decision) = self.decisions.get_latest(subject_id) else {
            info!(subject_id, "No decision stored for outcome, nothing to learn");
            return None;
        };

        let mut updated = 0;
        for rec in &decision.recommendations {
            match self
                .trust
                .record_outcome(rec.specialist(), rec.score(), actual_outcome_score)
                .await
            {
                Ok(_) => updated += 1,
                Err(e) => warn!(
                    subject_id,
                    specialist = %rec.specialist(),
                    error = %e,
                    "Outcome not recorded for specialist"
                ),
            }
        }

        info!(
            subject_id,
            actual_outcome_score,
            specialists = updated,
            contributors = decision.recommendations.len(),
            "Learned from outcome"
        );
        Some(updated)
    }

    /// Apply human ratings in [0, 1] per specialist; returns the resulting snapshot.
    pub async fn adjust_weights(
        &self,
        ratings: &BTreeMap<SpecialistId, f64>,
    ) -> Result<TrustSnapshot, OrchestrationError> {
        for (&specialist, &rating) in ratings {
            self.trust.apply_manual_adjustment(specialist, rating).await?;
        }
        Ok(self.trust.get_snapshot()?)
    }

    /// Swap consensus thresholds for subsequent runs.
    pub fn reconfigure_consensus(&self, config: ConsensusConfig) -> Result<(), ConfigError> {
        self.consensus.reconfigure(config)
    }

    pub fn metrics(&self) -> SwarmMetrics {
        self.lock_metrics().clone()
    }

    pub fn status(&self) -> Result<SwarmStatus, OrchestrationError> {
        Ok(SwarmStatus {
            name: self.name.clone(),
            specialists: self.dispatcher.specialist_ids(),
            in_flight: self.decisions.active_count(),
            decisions_retained: self.decisions.history_len(),
            metrics: self.metrics(),
            trust: self.trust.get_snapshot()?,
        })
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, SwarmMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::specialists::SpecialistError;
    use crate::types::{Recommendation, TrustRecord, Urgency};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use serde_json::json;

    /// Fixed-output unit with an optional delay.
    struct Fixed {
        id: SpecialistId,
        score: f64,
        confidence: f64,
        delay: Duration,
    }

    #[async_trait]
    impl Specialist for Fixed {
        fn id(&self) -> SpecialistId {
            self.id
        }

        async fn analyze(&self, _payload: &Payload) -> Result<Recommendation, SpecialistError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Recommendation::new(self.id, self.confidence, self.score, Urgency::High, "fixed")?)
        }
    }

    fn fixed(id: SpecialistId, score: f64, confidence: f64) -> Arc<dyn Specialist> {
        Arc::new(Fixed { id, score, confidence, delay: Duration::ZERO })
    }

    fn swarm(units: Vec<Arc<dyn Specialist>>) -> Orchestrator {
        Orchestrator::new(&SwarmConfig::default(), units, Arc::new(InMemoryTrustBackend::new()))
            .unwrap()
    }

    fn lead_payload() -> Payload {
        json!({
            "page_visits": 9,
            "email_opens": 5,
            "last_activity_hours": 6,
            "messages": ["We're pre-approved and want to schedule a showing"],
            "budget": 520000,
            "pre_approved": true,
            "down_payment_pct": 20,
            "timeline_months": 2
        })
    }

    #[tokio::test]
    async fn test_default_swarm_produces_decision() {
        let orchestrator = Orchestrator::from_config(&SwarmConfig::default()).unwrap();
        let decision = orchestrator.analyze("lead-42", lead_payload()).await.unwrap();

        assert_eq!(decision.subject_id, "lead-42");
        assert_eq!(decision.recommendations.len(), 4);
        assert!(!decision.fallback_applied);
        assert!(orchestrator.latest("lead-42").is_some());
        assert!(!orchestrator.decisions().is_active("lead-42"));

        let status = orchestrator.status().unwrap();
        assert_eq!(status.metrics.runs_completed, 1);
        assert_eq!(status.specialists.len(), 4);
        assert_eq!(
            status.trust.get(SpecialistId::TimingPredictor).map(|r| r.recommendations_seen),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_empty_payload_needs_human_review() {
        let orchestrator = Orchestrator::from_config(&SwarmConfig::default()).unwrap();
        let err = orchestrator.analyze("lead-0", json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InsufficientInput { .. }));
        assert!(err.to_string().contains("human review"));
        assert_eq!(orchestrator.metrics().specialist_failures, 4);
        // Failed run must not leave the subject stuck
        assert!(orchestrator.decisions().begin("lead-0"));
    }

    #[tokio::test]
    async fn test_duplicate_run_is_suppressed() {
        let orchestrator = Arc::new(swarm(vec![Arc::new(Fixed {
            id: SpecialistId::IntentDetector,
            score: 70.0,
            confidence: 0.9,
            delay: Duration::from_millis(200),
        })]));

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.analyze("lead-7", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = orchestrator.analyze("lead-7", json!({})).await;
        assert!(matches!(second, Err(OrchestrationError::DuplicateInFlight(ref s)) if s == "lead-7"));

        assert!(first.await.unwrap().is_ok());
        assert!(orchestrator.analyze("lead-7", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_run_releases_subject() {
        let orchestrator = swarm(vec![Arc::new(Fixed {
            id: SpecialistId::IntentDetector,
            score: 70.0,
            confidence: 0.9,
            delay: Duration::from_millis(500),
        })]);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), orchestrator.analyze("lead-8", json!({}))).await;
        assert!(abandoned.is_err());
        assert!(!orchestrator.decisions().is_active("lead-8"));
    }

    #[tokio::test]
    async fn test_cancel_before_any_result() {
        let orchestrator = swarm(vec![Arc::new(Fixed {
            id: SpecialistId::IntentDetector,
            score: 70.0,
            confidence: 0.9,
            delay: Duration::from_secs(10),
        })]);
        let token = CancellationToken::new();
        token.cancel();

        let err = orchestrator
            .analyze_with_cancel("lead-9", json!({}), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_learn_from_outcome_updates_contributors() {
        let orchestrator = swarm(vec![
            fixed(SpecialistId::IntentDetector, 90.0, 0.9),
            fixed(SpecialistId::FinancialAssessor, 40.0, 0.8),
        ]);

        assert_eq!(orchestrator.learn_from_outcome("lead-1", 80.0).await, None);

        orchestrator.analyze("lead-1", json!({})).await.unwrap();
        assert_eq!(orchestrator.learn_from_outcome("lead-1", 90.0).await, Some(2));

        let trust = orchestrator.trust();
        let accurate = trust.record(SpecialistId::IntentDetector).unwrap();
        let inaccurate = trust.record(SpecialistId::FinancialAssessor).unwrap();
        assert_eq!(accurate.sample_count, 1);
        assert!(accurate.weight > inaccurate.weight);
    }

    /// Reports contention for one specialist while `jammed` is set.
    struct Jammed {
        inner: InMemoryTrustBackend,
        specialist: SpecialistId,
        jammed: AtomicBool,
    }

    impl TrustBackend for Jammed {
        fn load_all(&self) -> Result<BTreeMap<SpecialistId, TrustRecord>, TrustError> {
            self.inner.load_all()
        }

        fn load(&self, specialist: SpecialistId) -> Result<Option<TrustRecord>, TrustError> {
            self.inner.load(specialist)
        }

        fn try_update(
            &self,
            specialist: SpecialistId,
            update: &(dyn Fn(Option<TrustRecord>) -> TrustRecord + Sync),
        ) -> Result<TrustRecord, TrustError> {
            if specialist == self.specialist && self.jammed.load(AtomicOrdering::SeqCst) {
                return Err(TrustError::Contention(specialist));
            }
            self.inner.try_update(specialist, update)
        }

        fn remove(&self, specialist: SpecialistId) -> Result<(), TrustError> {
            self.inner.remove(specialist)
        }
    }

    #[tokio::test]
    async fn test_failed_contributor_does_not_abort_learning() {
        let backend = Arc::new(Jammed {
            inner: InMemoryTrustBackend::new(),
            specialist: SpecialistId::FinancialAssessor,
            jammed: AtomicBool::new(false),
        });
        let mut config = SwarmConfig::default();
        config.trust.retry_backoff_ms = 1;
        let orchestrator = Orchestrator::new(
            &config,
            vec![
                fixed(SpecialistId::IntentDetector, 90.0, 0.9),
                fixed(SpecialistId::FinancialAssessor, 40.0, 0.8),
            ],
            Arc::clone(&backend) as Arc<dyn TrustBackend>,
        )
        .unwrap();
        orchestrator.analyze("lead-1", json!({})).await.unwrap();

        backend.jammed.store(true, AtomicOrdering::SeqCst);
        assert_eq!(orchestrator.learn_from_outcome("lead-1", 90.0).await, Some(1));

        let trust = orchestrator.trust();
        assert_eq!(trust.record(SpecialistId::IntentDetector).unwrap().sample_count, 1);
        assert_eq!(trust.record(SpecialistId::FinancialAssessor).unwrap().sample_count, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_assembly() {
        let mut config = SwarmConfig::default();
        config.trust.min_weight = 0.9;
        config.trust.max_weight = 0.5;
        let err = Orchestrator::new(&config, Vec::new(), Arc::new(InMemoryTrustBackend::new()))
            .err()
            .unwrap();
        assert!(matches!(err, OrchestrationError::Config(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_adjust_weights_in_bulk() {
        let orchestrator = swarm(vec![fixed(SpecialistId::IntentDetector, 90.0, 0.9)]);
        let ratings = BTreeMap::from([
            (SpecialistId::IntentDetector, 1.0),
            (SpecialistId::MarketAnalyst, 0.0),
        ]);
        let snapshot = orchestrator.adjust_weights(&ratings).await.unwrap();
        assert!((snapshot.weight_of(SpecialistId::IntentDetector) - 0.86).abs() < 1e-9);
        assert!((snapshot.weight_of(SpecialistId::MarketAnalyst) - 0.56).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_metrics_track_agreement_and_fallbacks() {
        let orchestrator = swarm(vec![
            fixed(SpecialistId::IntentDetector, 80.0, 0.5),
            fixed(SpecialistId::TimingPredictor, 82.0, 0.6),
        ]);
        orchestrator.analyze("lead-a", json!({})).await.unwrap();
        orchestrator.analyze("lead-b", json!({})).await.unwrap();

        let metrics = orchestrator.metrics();
        assert_eq!(metrics.runs_completed, 2);
        assert_eq!(metrics.fallbacks_applied, 2);
        assert_eq!(metrics.agreement_rate, 100.0);
        assert!((metrics.average_confidence - 0.55).abs() < 1e-9);
    }
}
