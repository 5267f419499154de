//! Ruchi-Memory Library
//!
//! Per-user, per-tenant preference memory for conversational agents.
//! Preferences are extracted from free text, carry a bounded confidence
//! score reinforced by accept/reject feedback, and are linked to the
//! situational context they were learned under so retrieval can filter by
//! relevance instead of returning everything.
//!
//! # Core pieces
//! - Confidence model with asymmetric accept/reject deltas and a 0.95 cap
//! - Conflict detection: direct sentiment flips plus LLM-assisted
//!   semantic/hierarchical conflicts within a domain
//! - Context pipeline: deterministic clock factors merged with
//!   model-extracted dynamic factors, embedded for similarity search
//! - Dual graph/vector situation store with a compensating-delete write path

pub mod agent;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod context;
pub mod embedding;
pub mod errors;
pub mod extraction;
pub mod llm;
pub mod preference;
pub mod registry;
pub mod situations;
pub mod store;
pub mod validation;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;
