//! In-memory vector store
//!
//! Points carry the situation payload alongside the embedding, mirroring how
//! a hosted vector database stores payloads next to vectors. Search is a
//! brute-force cosine scan, which is exact and fast enough in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::context::Situation;
use crate::embedding::rank_by_similarity;
use crate::errors::{MemoryError, Result};
use crate::store::VectorStore;

#[derive(Default)]
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<Uuid, Situation>>,
    fail_next_upsert: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next upsert fail, for exercising partial-write handling
    pub fn fail_next_upsert(&self) {
        self.fail_next_upsert.store(true, Ordering::SeqCst);
    }

    pub fn point_count(&self) -> usize {
        self.points.read().len()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert_point(&self, situation: &Situation) -> Result<()> {
        if self.fail_next_upsert.swap(false, Ordering::SeqCst) {
            return Err(MemoryError::StoreUnavailable {
                store: "vector".to_string(),
                reason: "injected failure".to_string(),
            });
        }

        if situation.embedding.is_none() {
            return Err(MemoryError::InvalidInput {
                field: "embedding".to_string(),
                reason: "situation has no embedding".to_string(),
            });
        }

        self.points.write().insert(situation.id, situation.clone());
        Ok(())
    }

    async fn get_point(&self, tenant_id: &str, situation_id: Uuid) -> Result<Option<Situation>> {
        let points = self.points.read();
        let Some(situation) = points.get(&situation_id) else {
            return Ok(None);
        };

        // Tenant mismatch fails closed: callers learn nothing about points
        // outside their tenant, not even that the id exists.
        if situation.tenant_id != tenant_id {
            warn!(
                id = %situation_id,
                requested = tenant_id,
                "Tenant mismatch on point lookup, treating as not found"
            );
            return Ok(None);
        }

        Ok(Some(situation.clone()))
    }

    async fn search(
        &self,
        tenant_id: &str,
        user_id: &str,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<(Situation, f32)>> {
        let candidates: Vec<(Situation, Vec<f32>)> = {
            let points = self.points.read();
            points
                .values()
                .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id)
                .filter_map(|s| {
                    // A point without a vector cannot participate; skip, not fatal
                    let Some(embedding) = s.embedding.clone() else {
                        warn!(id = %s.id, "Point missing embedding, skipping in search");
                        return None;
                    };
                    Some((s.clone(), embedding))
                })
                .collect()
        };

        Ok(rank_by_similarity(query, candidates, top_k, min_score))
    }

    async fn delete_point(&self, situation_id: Uuid) -> Result<bool> {
        Ok(self.points.write().remove(&situation_id).is_some())
    }
}
