//! Decision Store - in-flight guard, latest decision per subject, bounded history
//!
//! `begin` is an atomic check-and-set on a per-subject marker. Markers carry
//! a lease: a run that crashed without calling `complete` stops blocking its
//! subject once the lease expires. Each marker also carries a token so a
//! stale run cannot clear the marker of the run that took over from it.
//!
//! The latest-decision index is bounded by history: when a subject's decision
//! ages out of history and is still that subject's latest, the subject is
//! dropped from the index as well.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::types::Decision;

#[derive(Debug, Clone, Copy)]
struct ActiveMarker {
    started: Instant,
    token: u64,
}

/// Latest decision for a subject, tagged with the token of the run that wrote it.
#[derive(Debug, Clone)]
struct LatestEntry {
    token: u64,
    decision: Arc<Decision>,
}

/// Proof of an acquired in-flight marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    subject_id: String,
    token: u64,
}

impl Lease {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }
}

pub struct DecisionStore {
    active: DashMap<String, ActiveMarker>,
    latest: DashMap<String, LatestEntry>,
    history: Mutex<VecDeque<Arc<Decision>>>,
    retention: usize,
    lease: Duration,
    next_token: AtomicU64,
}

impl DecisionStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_lease(config.history_retention, config.lease())
    }

    pub fn with_lease(retention: usize, lease: Duration) -> Self {
        Self {
            active: DashMap::new(),
            latest: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
            lease,
            next_token: AtomicU64::new(1),
        }
    }

    /// Mark `subject_id` active. False if a live computation already holds it.
    pub fn begin(&self, subject_id: &str) -> bool {
        self.try_begin(subject_id).is_some()
    }

    /// Like `begin`, returning a lease that only releases this run's marker.
    pub fn try_begin(&self, subject_id: &str) -> Option<Lease> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let marker = ActiveMarker {
            started: Instant::now(),
            token,
        };

        match self.active.entry(subject_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(marker);
            }
            Entry::Occupied(mut slot) => {
                let held_for = slot.get().started.elapsed();
                if held_for < self.lease {
                    debug!(subject_id, "Decision already in flight");
                    return None;
                }
                warn!(
                    subject_id,
                    held_for_secs = held_for.as_secs(),
                    "In-flight marker expired, taking over"
                );
                slot.insert(marker);
            }
        }

        Some(Lease {
            subject_id: subject_id.to_string(),
            token,
        })
    }

    /// Store `decision`, clear the subject's marker and append to history.
    pub fn complete(&self, subject_id: &str, decision: Decision) -> Arc<Decision> {
        self.active.remove(subject_id);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.store(subject_id, token, decision)
    }

    /// `complete` that leaves the marker alone if another run has taken it over.
    ///
    /// A run that was taken over still lands in history, but never replaces
    /// a latest decision written by a run that began after it.
    pub fn complete_lease(&self, lease: &Lease, decision: Decision) -> Arc<Decision> {
        if !self.release(lease) {
            warn!(subject_id = %lease.subject_id, "Completing a run whose marker was taken over");
        }
        self.store(&lease.subject_id, lease.token, decision)
    }

    /// Clear a marker without storing anything.
    pub fn abandon(&self, subject_id: &str) {
        if self.active.remove(subject_id).is_some() {
            debug!(subject_id, "In-flight marker abandoned");
        }
    }

    /// Clear the marker only if it still belongs to `lease`.
    pub fn release(&self, lease: &Lease) -> bool {
        self.active
            .remove_if(&lease.subject_id, |_, marker| marker.token == lease.token)
            .is_some()
    }

    pub fn get_latest(&self, subject_id: &str) -> Option<Arc<Decision>> {
        self.latest.get(subject_id).map(|e| Arc::clone(&e.decision))
    }

    pub fn is_active(&self, subject_id: &str) -> bool {
        self.active
            .get(subject_id)
            .is_some_and(|m| m.started.elapsed() < self.lease)
    }

    /// Subjects with a live marker.
    pub fn active_count(&self) -> usize {
        self.active
            .iter()
            .filter(|m| m.started.elapsed() < self.lease)
            .count()
    }

    /// Most recent decisions across all subjects, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<Decision>> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Subjects with a latest decision.
    pub fn latest_len(&self) -> usize {
        self.latest.len()
    }

    fn store(&self, subject_id: &str, token: u64, decision: Decision) -> Arc<Decision> {
        let decision = Arc::new(decision);
        let entry = LatestEntry {
            token,
            decision: Arc::clone(&decision),
        };

        match self.latest.entry(subject_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().token <= token {
                    slot.insert(entry);
                } else {
                    warn!(subject_id, "Stale run finished late, keeping newer latest decision");
                }
            }
        }

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(Arc::clone(&decision));
        while history.len() > self.retention {
            if let Some(evicted) = history.pop_front() {
                self.latest.remove_if(&evicted.subject_id, |_, e| {
                    Arc::ptr_eq(&e.decision, &evicted)
                });
            }
        }
        decision
    }
}

impl Default for DecisionStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionPriority, ConsensusLevel, Recommendation, SpecialistId, Urgency};
    use chrono::Utc;

    fn decision(subject_id: &str, score: f64) -> Decision {
        let primary =
            Recommendation::new(SpecialistId::IntentDetector, 0.9, score, Urgency::Medium, "x").unwrap();
        Decision {
            subject_id: subject_id.to_string(),
            consensus_level: ConsensusLevel::High,
            aggregate_score: score,
            aggregate_confidence: 0.9,
            primary_recommendation: primary.clone(),
            conflicts: Vec::new(),
            fallback_applied: false,
            action_priority: ActionPriority::Medium,
            rationale: String::new(),
            recommendations: vec![primary],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_begin_twice_without_complete() {
        let store = DecisionStore::default();
        assert!(store.begin("lead-1"));
        assert!(!store.begin("lead-1"));
        assert!(store.begin("lead-2"), "other subjects are unaffected");
    }

    #[test]
    fn test_complete_clears_marker_and_supersedes() {
        let store = DecisionStore::default();
        assert!(store.begin("lead-1"));
        store.complete("lead-1", decision("lead-1", 40.0));
        assert!(!store.is_active("lead-1"));

        assert!(store.begin("lead-1"));
        store.complete("lead-1", decision("lead-1", 90.0));
        assert_eq!(store.get_latest("lead-1").unwrap().aggregate_score, 90.0);
        assert_eq!(store.history_len(), 2);
        assert!(store.get_latest("lead-9").is_none());
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let store = DecisionStore::with_lease(10, Duration::ZERO);
        let stale = store.try_begin("lead-1").unwrap();
        let fresh = store.try_begin("lead-1").expect("expired marker must not block");
        assert_eq!(store.active_count(), 0, "zero lease never counts as live");

        // The crashed run waking up must not clear the new run's marker
        assert!(!store.release(&stale));
        assert!(store.release(&fresh));
    }

    #[test]
    fn test_abandon_frees_subject() {
        let store = DecisionStore::default();
        assert!(store.begin("lead-1"));
        store.abandon("lead-1");
        assert!(store.begin("lead-1"));
        assert!(store.get_latest("lead-1").is_none());
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let store = DecisionStore::with_lease(3, Duration::from_secs(60));
        for i in 0..5 {
            let id = format!("lead-{i}");
            store.complete(&id, decision(&id, f64::from(i)));
        }
        assert_eq!(store.history_len(), 3);
        let recent: Vec<_> = store.recent(2).iter().map(|d| d.subject_id.clone()).collect();
        assert_eq!(recent, vec!["lead-4", "lead-3"]);

        // Subjects whose only decision aged out are dropped from the index
        assert!(store.get_latest("lead-0").is_none());
        assert!(store.get_latest("lead-2").is_some());
        assert_eq!(store.latest_len(), 3);
    }

    #[test]
    fn test_latest_index_bounded_by_retention() {
        let store = DecisionStore::with_lease(3, Duration::from_secs(60));
        for i in 0..10_000 {
            let id = format!("lead-{i}");
            store.complete(&id, decision(&id, 50.0));
        }
        assert_eq!(store.history_len(), 3);
        assert_eq!(store.latest_len(), 3);
    }

    #[test]
    fn test_refreshed_subject_survives_eviction_of_older_decision() {
        let store = DecisionStore::with_lease(2, Duration::from_secs(60));
        store.complete("lead-1", decision("lead-1", 10.0));
        store.complete("lead-2", decision("lead-2", 20.0));
        store.complete("lead-1", decision("lead-1", 30.0));

        // lead-1's first decision aged out, but its latest is the newer one
        assert_eq!(store.get_latest("lead-1").unwrap().aggregate_score, 30.0);
        assert!(store.get_latest("lead-2").is_some());

        store.complete("lead-3", decision("lead-3", 40.0));
        assert!(store.get_latest("lead-2").is_none());
        assert_eq!(store.latest_len(), 2);
    }

    #[test]
    fn test_stale_run_does_not_replace_newer_latest() {
        let store = DecisionStore::with_lease(10, Duration::ZERO);
        let stale = store.try_begin("lead-1").unwrap();
        let fresh = store.try_begin("lead-1").unwrap();

        store.complete_lease(&fresh, decision("lead-1", 80.0));
        store.complete_lease(&stale, decision("lead-1", 20.0));

        assert_eq!(store.get_latest("lead-1").unwrap().aggregate_score, 80.0);
        assert_eq!(store.history_len(), 2, "the late run is still recorded");
    }

    #[test]
    fn test_concurrent_begin_admits_exactly_one() {
        let store = Arc::new(DecisionStore::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.begin("lead-hot"))
            })
            .collect();
        let admitted = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(admitted, 1);
    }
}
