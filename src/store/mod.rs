//! Storage abstractions: graph store, vector store, cache
//!
//! The core consumes store contracts, not client libraries. Each backend is
//! a trait with an in-memory implementation used for tests and single-node
//! deployments; production backends implement the same traits over their
//! client crates.

pub mod cache;
pub mod graph;
pub mod vector;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::Situation;
use crate::errors::Result;
use crate::preference::PreferenceRecord;

/// Graph-side persistence: preference nodes, situation nodes, and the
/// directed "recorded-in" links between them
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Persist a preference, assigning an id if the record has none.
    /// Returns the id the record is stored under.
    async fn upsert_preference(
        &self,
        tenant_id: &str,
        user_id: &str,
        record: &PreferenceRecord,
    ) -> Result<Uuid>;

    async fn get_preferences(&self, tenant_id: &str, user_id: &str)
        -> Result<Vec<PreferenceRecord>>;

    /// Delete one preference and its links. Returns false if absent.
    async fn delete_preference(&self, tenant_id: &str, preference_id: Uuid) -> Result<bool>;

    /// Delete every preference for a user. Returns the number removed.
    async fn delete_all_preferences(&self, tenant_id: &str, user_id: &str) -> Result<usize>;

    async fn create_situation(&self, situation: &Situation) -> Result<()>;

    /// Delete a situation node and its links. Returns false if absent.
    async fn delete_situation(&self, tenant_id: &str, situation_id: Uuid) -> Result<bool>;

    /// Create the directed preference→situation link. Both endpoints must
    /// exist and share the tenant id.
    async fn link_preference_to_situation(
        &self,
        tenant_id: &str,
        preference_id: Uuid,
        situation_id: Uuid,
    ) -> Result<()>;

    /// Situations for a user with no linked preferences
    async fn orphaned_situations(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Uuid>>;

    /// Situations linked to a preference, for context rendering
    async fn situations_for_preference(
        &self,
        tenant_id: &str,
        preference_id: Uuid,
    ) -> Result<Vec<Situation>>;

    /// Preferences linked to a situation, for retrieval
    async fn preferences_for_situation(
        &self,
        tenant_id: &str,
        situation_id: Uuid,
    ) -> Result<Vec<PreferenceRecord>>;
}

/// Vector-side persistence: situation embeddings with mirrored payloads
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert the situation's point. The payload mirrors tenant, user and
    /// factors so search results reconstruct without a graph round-trip.
    async fn upsert_point(&self, situation: &Situation) -> Result<()>;

    /// Lookup by id, cross-validating the payload tenant against the
    /// requested one. A mismatch is "not found", never an error.
    async fn get_point(&self, tenant_id: &str, situation_id: Uuid) -> Result<Option<Situation>>;

    /// Similarity search filtered by tenant AND user, ordered by descending
    /// score, bounded by top_k and min_score.
    async fn search(
        &self,
        tenant_id: &str,
        user_id: &str,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<(Situation, f32)>>;

    async fn delete_point(&self, situation_id: Uuid) -> Result<bool>;
}

/// TTL'd key-value cache, consumed not owned: values are opaque serialized
/// strings, keys follow the scheme in [`cache`]
#[async_trait]
pub trait PreferenceCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}
