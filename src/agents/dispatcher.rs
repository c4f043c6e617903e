//! Dispatcher - concurrent fan-out of one payload to every registered unit
//!
//! Every unit runs as its own task under a per-unit timeout, with panics
//! caught at the task boundary. The whole batch is bounded by a deadline and
//! by the caller's cancellation token; units still running when either fires
//! are aborted and reported, while recommendations already collected are kept.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::specialists::Specialist;
use crate::config::DispatchConfig;
use crate::types::{Payload, Recommendation, SpecialistId};

// ============================================================================
// Errors
// ============================================================================

/// Why a unit contributed nothing to a batch.
///
/// Recorded in the `DispatchReport`, never raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecialistFailure {
    #[error("{specialist} failed: {reason}")]
    Failed { specialist: SpecialistId, reason: String },

    #[error("{specialist} timed out after {after:?}")]
    TimedOut { specialist: SpecialistId, after: Duration },

    #[error("{specialist} panicked")]
    Panicked { specialist: SpecialistId },

    #[error("{specialist} returned an invalid recommendation: {reason}")]
    Invalid { specialist: SpecialistId, reason: String },

    #[error("{specialist} cancelled before completion")]
    Cancelled { specialist: SpecialistId },

    #[error("{specialist} still running at the batch deadline")]
    BatchDeadline { specialist: SpecialistId },
}

impl SpecialistFailure {
    pub const fn specialist(&self) -> SpecialistId {
        match self {
            SpecialistFailure::Failed { specialist, .. }
            | SpecialistFailure::TimedOut { specialist, .. }
            | SpecialistFailure::Panicked { specialist }
            | SpecialistFailure::Invalid { specialist, .. }
            | SpecialistFailure::Cancelled { specialist }
            | SpecialistFailure::BatchDeadline { specialist } => *specialist,
        }
    }
}

/// Rejected unit registrations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("specialist {0} registered more than once")]
    Duplicate(SpecialistId),

    #[error("specialist id {0} is reserved")]
    Reserved(SpecialistId),
}

// ============================================================================
// Report
// ============================================================================

/// Everything one fan-out produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Valid recommendations, in completion order
    pub recommendations: Vec<Recommendation>,
    /// One entry per unit that contributed nothing
    pub failures: Vec<SpecialistFailure>,
    /// The caller's token fired before every unit finished
    pub cancelled: bool,
    pub elapsed: Duration,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs the registered units concurrently against one payload.
pub struct Dispatcher {
    specialists: Vec<Arc<dyn Specialist>>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Register a set of units. Ids must be unique and not reserved.
    pub fn new(
        specialists: Vec<Arc<dyn Specialist>>,
        config: DispatchConfig,
    ) -> Result<Self, RegistryError> {
        let mut seen = BTreeSet::new();
        for unit in &specialists {
            let id = unit.id();
            if id.is_reserved() {
                return Err(RegistryError::Reserved(id));
            }
            if !seen.insert(id) {
                return Err(RegistryError::Duplicate(id));
            }
        }

        info!(
            specialists = specialists.len(),
            unit_timeout_ms = config.unit_timeout_ms,
            batch_timeout_ms = config.batch_timeout_ms,
            "Dispatcher initialized"
        );

        Ok(Self { specialists, config })
    }

    /// Registered identities in registration order.
    pub fn specialist_ids(&self) -> Vec<SpecialistId> {
        self.specialists.iter().map(|u| u.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }

    /// Fan out and return only the surviving recommendations.
    ///
    /// Never fails; an empty vector means every unit failed.
    pub async fn dispatch(&self, subject_id: &str, payload: Arc<Payload>) -> Vec<Recommendation> {
        self.run(subject_id, payload, &CancellationToken::new())
            .await
            .recommendations
    }

    /// Fan out with cooperative cancellation and a full failure report.
    pub async fn run(
        &self,
        subject_id: &str,
        payload: Arc<Payload>,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let started = Instant::now();
        let unit_timeout = self.config.unit_timeout();

        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();
        for unit in &self.specialists {
            let unit = Arc::clone(unit);
            let payload = Arc::clone(&payload);
            pending.insert(unit.id());
            tasks.spawn(async move {
                let id = unit.id();
                (id, invoke(unit.as_ref(), &payload, unit_timeout).await)
            });
        }

        let mut report = DispatchReport::default();
        let deadline = tokio::time::sleep(self.config.batch_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    report.cancelled = true;
                    report.failures.extend(
                        pending.iter().map(|&specialist| SpecialistFailure::Cancelled { specialist }),
                    );
                    pending.clear();
                    break;
                }
                () = &mut deadline => {
                    report.failures.extend(
                        pending.iter().map(|&specialist| SpecialistFailure::BatchDeadline { specialist }),
                    );
                    pending.clear();
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((id, Ok(rec)))) => {
                        pending.remove(&id);
                        debug!(subject_id, specialist = %id, score = rec.score(), confidence = rec.confidence(), "Specialist completed");
                        report.recommendations.push(rec);
                    }
                    Some(Ok((id, Err(failure)))) => {
                        pending.remove(&id);
                        report.failures.push(failure);
                    }
                    Some(Err(e)) => {
                        // Panics are caught inside the task, so only an abort lands here
                        warn!(subject_id, error = %e, "Specialist task ended abnormally");
                    }
                },
            }
        }

        tasks.abort_all();

        // Units whose task vanished without reporting
        report.failures.extend(
            pending
                .into_iter()
                .map(|specialist| SpecialistFailure::Panicked { specialist }),
        );

        for failure in &report.failures {
            warn!(subject_id, specialist = %failure.specialist(), "{}", failure);
        }

        report.elapsed = started.elapsed();
        info!(
            subject_id,
            recommendations = report.recommendations.len(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Dispatch complete"
        );

        report
    }
}

/// One bounded, panic-isolated unit call.
async fn invoke(
    unit: &dyn Specialist,
    payload: &Payload,
    limit: Duration,
) -> Result<Recommendation, SpecialistFailure> {
    let specialist = unit.id();
    let call = AssertUnwindSafe(unit.analyze(payload)).catch_unwind();

    match tokio::time::timeout(limit, call).await {
        Err(_) => Err(SpecialistFailure::TimedOut { specialist, after: limit }),
        Ok(Err(_)) => Err(SpecialistFailure::Panicked { specialist }),
        Ok(Ok(Err(e))) => Err(SpecialistFailure::Failed {
            specialist,
            reason: e.to_string(),
        }),
        Ok(Ok(Ok(rec))) => {
            if rec.specialist() != specialist {
                return Err(SpecialistFailure::Invalid {
                    specialist,
                    reason: format!("recommendation attributed to {}", rec.specialist()),
                });
            }
            rec.validate().map_err(|e| SpecialistFailure::Invalid {
                specialist,
                reason: e.to_string(),
            })?;
            Ok(rec)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
