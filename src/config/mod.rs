//! Swarm Configuration Module
//!
//! Every consensus, trust and dispatch constant is loaded from TOML so an
//! operator can retune a swarm without a rebuild.
//!
//! ## Loading Order
//!
//! 1. `SWARM_CONFIG` environment variable (path to TOML file)
//! 2. `swarm_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! There is no process-wide config. Load once and pass the value to the
//! orchestrator that owns it:
//!
//! ```ignore
//! let config = SwarmConfig::load();
//! let orchestrator = Orchestrator::from_config(&config)?;
//! ```
//!
//! Consensus thresholds can be swapped later through
//! `Orchestrator::reconfigure_consensus`.

mod swarm_config;
pub mod defaults;
pub mod validation;

pub use swarm_config::*;
