//! Shared data structures for the consensus orchestration core
//!
//! - `Recommendation`: one specialist's scored finding for one subject
//! - `Decision`: the reduction of a run's recommendations
//! - `TrustRecord` / `TrustSnapshot`: per-specialist reliability used as weights

mod recommendation;
mod decision;
mod trust;

pub use recommendation::*;
pub use decision::*;
pub use trust::*;

/// Opaque structured input shared by every specialist in a run.
pub type Payload = serde_json::Value;
