//! System-wide default constants.
//!
//! Centralises the tuning numbers used by the `serde(default)` functions in
//! `swarm_config.rs`. Grouped by subsystem for easy discovery.

// ============================================================================
// Dispatch
// ============================================================================

/// Per-unit analysis timeout (milliseconds).
///
/// Sized for units that call a hosted language model; pure rule units finish
/// in well under a millisecond.
pub const UNIT_TIMEOUT_MS: u64 = 2_000;

/// Envelope for a whole fan-out (milliseconds).
pub const BATCH_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Consensus
// ============================================================================

/// Score standard deviation at or below which consensus is HIGH (points).
pub const HIGH_MAX_STD_DEV: f64 = 10.0;

/// Score standard deviation at or below which consensus is MEDIUM (points).
pub const MEDIUM_MAX_STD_DEV: f64 = 20.0;

/// Score standard deviation at or below which consensus is LOW (points).
///
/// Anything above is CONFLICT.
pub const LOW_MAX_STD_DEV: f64 = 30.0;

/// Pairwise score difference above which two specialists are in conflict (points).
pub const CONFLICT_DELTA: f64 = 30.0;

/// Minimum mean confidence to act on consensus directly.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

// ============================================================================
// Trust Ledger
// ============================================================================

/// Weight a specialist starts with before any feedback.
pub const INITIAL_WEIGHT: f64 = 0.8;

/// Running accuracy a specialist starts with before any outcome.
pub const INITIAL_ACCURACY: f64 = 0.8;

/// Lower weight bound; a specialist never drops out of consensus entirely.
pub const MIN_WEIGHT: f64 = 0.1;

/// Upper weight bound.
pub const MAX_WEIGHT: f64 = 1.0;

/// Share of the historical value kept when an outcome sample arrives.
///
/// `new = old * 0.9 + sample * 0.1`
pub const OUTCOME_HISTORY_FACTOR: f64 = 0.9;

/// Share of the previous weight kept when a human rating arrives.
///
/// `new = old * 0.7 + rating * 0.3`
pub const MANUAL_HISTORY_FACTOR: f64 = 0.7;

/// Attempts at a contended read-modify-write before giving up.
pub const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Base backoff between contended attempts (milliseconds), doubled per retry.
pub const RETRY_BACKOFF_MS: u64 = 5;

// ============================================================================
// Decision Store
// ============================================================================

/// Decisions kept in the bounded history ring.
pub const HISTORY_RETENTION: usize = 1_000;

/// Lease on an in-flight marker before it is considered abandoned (seconds).
pub const LEASE_SECS: u64 = 300;
