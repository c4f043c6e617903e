//! Swarm state that outlives a single run
//!
//! - `trust`: the Trust Ledger, process-wide and shared by every run
//! - `trust_backend`: where trust records live (in memory or sled)
//! - `decisions`: the Decision Store with its in-flight guard

pub mod decisions;
pub mod trust;
pub mod trust_backend;

pub use decisions::{DecisionStore, Lease};
pub use trust::{TrustError, TrustLedger};
pub use trust_backend::{InMemoryTrustBackend, SledTrustBackend, TrustBackend};
