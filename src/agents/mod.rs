//! Multi-agent consensus engine
//!
//! ## Pipeline
//!
//! - **Specialists**: independent analyzers, one recommendation each
//! - **Dispatcher**: concurrent fan-out with per-unit and batch timeouts
//! - **Consensus**: trust-weighted reduction into one Decision
//! - **Orchestrator**: the composed swarm, with outcome learning and metrics

pub mod consensus;
pub mod dispatcher;
pub mod orchestrator;
pub mod specialists;

pub use consensus::{ConsensusBuilder, ConsensusError};
pub use dispatcher::{DispatchReport, Dispatcher, RegistryError, SpecialistFailure};
pub use orchestrator::{OrchestrationError, Orchestrator, SwarmMetrics, SwarmStatus};
pub use specialists::{Specialist, SpecialistError};
