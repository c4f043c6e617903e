//! Swarm Consensus: multi-agent decision engine for lead intelligence
//!
//! Fans one subject payload out to independent specialist analyzers, tolerates
//! their partial failure, and reduces what survives into a single Decision
//! with a calibrated confidence and a conflict report. Specialist trust is
//! learned from real-world outcomes and human ratings.
//!
//! ## Architecture
//!
//! - **Dispatcher**: concurrent, time-bounded, panic-isolated fan-out
//! - **Consensus Builder**: weighted score, agreement band, conflicts, fallback
//! - **Trust Ledger**: per-specialist weight and accuracy (in-memory or sled)
//! - **Decision Store**: duplicate-run guard, latest decision, bounded history

pub mod agents;
pub mod config;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::SwarmConfig;

// Re-export commonly used types
pub use types::{
    ActionPriority, Conflict, ConsensusLevel, Decision, Payload, Recommendation,
    RecommendationError, SpecialistId, TrustRecord, TrustSnapshot, Urgency,
};

// Re-export agents
pub use agents::{
    ConsensusBuilder, ConsensusError, DispatchReport, Dispatcher, OrchestrationError,
    Orchestrator, Specialist, SpecialistError, SpecialistFailure, SwarmStatus,
};

// Re-export storage
pub use storage::{
    DecisionStore, InMemoryTrustBackend, SledTrustBackend, TrustBackend, TrustError, TrustLedger,
};
