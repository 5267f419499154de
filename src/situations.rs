//! Situation persistence across the graph and vector stores
//!
//! Writing a situation is a two-step sequence without a distributed
//! transaction: graph node first, vector point second. A vector-side failure
//! triggers a compensating delete of the graph node, so retrying the whole
//! operation stays safe (a fresh id is generated per attempt and nothing
//! from the failed attempt survives). Only when the compensation itself
//! fails does a consistency error surface, carrying the situation id and
//! which store holds the orphan.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::{ContextFactors, Situation};
use crate::embedding::EmbeddingService;
use crate::errors::{MemoryError, Result, StoreSide};
use crate::store::{GraphStore, VectorStore};

pub struct SituationStore {
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    embedding: EmbeddingService,
}

impl SituationStore {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vector: Arc<dyn VectorStore>,
        embedding: EmbeddingService,
    ) -> Self {
        Self {
            graph,
            vector,
            embedding,
        }
    }

    /// Embed and persist a context snapshot in both stores.
    pub async fn record(
        &self,
        tenant_id: &str,
        user_id: &str,
        factors: ContextFactors,
    ) -> Result<Situation> {
        let vector = self.embedding.embed_factors(&factors).await?;

        let mut situation = Situation::new(tenant_id, user_id, factors);
        situation.embedding = Some(vector);

        self.graph.create_situation(&situation).await?;

        if let Err(vector_err) = self.vector.upsert_point(&situation).await {
            warn!(
                id = %situation.id,
                "Vector write failed after graph write, compensating: {vector_err}"
            );
            match self.graph.delete_situation(tenant_id, situation.id).await {
                Ok(_) => return Err(vector_err),
                Err(compensation_err) => {
                    error!(
                        id = %situation.id,
                        "Compensating delete failed, graph node orphaned: {compensation_err}"
                    );
                    return Err(MemoryError::Consistency {
                        situation_id: situation.id.to_string(),
                        succeeded: StoreSide::Graph,
                        reason: vector_err.to_string(),
                    });
                }
            }
        }

        info!(id = %situation.id, user = user_id, "Situation recorded");
        Ok(situation)
    }

    /// Link a preference to the situation it was learned under.
    pub async fn link(
        &self,
        tenant_id: &str,
        preference_id: Uuid,
        situation_id: Uuid,
    ) -> Result<()> {
        self.graph
            .link_preference_to_situation(tenant_id, preference_id, situation_id)
            .await
    }

    /// Lookup by id; the vector payload's tenant must match (fail closed).
    pub async fn get(&self, tenant_id: &str, situation_id: Uuid) -> Result<Option<Situation>> {
        self.vector.get_point(tenant_id, situation_id).await
    }

    /// Similarity search for situations resembling the given context,
    /// filtered by tenant and user.
    pub async fn find_similar(
        &self,
        tenant_id: &str,
        user_id: &str,
        factors: &ContextFactors,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<(Situation, f32)>> {
        let query = self.embedding.embed_factors(factors).await?;
        self.vector
            .search(tenant_id, user_id, &query, top_k, min_score)
            .await
    }

    /// Delete situations with no linked preferences from both stores.
    /// Returns the number collected.
    pub async fn collect_orphans(&self, tenant_id: &str, user_id: &str) -> Result<usize> {
        let orphans = self.graph.orphaned_situations(tenant_id, user_id).await?;
        let mut collected = 0;

        for id in orphans {
            // Vector side first: a point without its node is invisible to
            // linking, while a node without its point would resurface as an
            // orphan on the next sweep either way.
            if let Err(e) = self.vector.delete_point(id).await {
                warn!(%id, "Orphan point delete failed, skipping: {e}");
                continue;
            }
            if self.graph.delete_situation(tenant_id, id).await? {
                collected += 1;
            }
        }

        if collected > 0 {
            info!(collected, user = user_id, "Orphaned situations collected");
        }
        Ok(collected)
    }
}
