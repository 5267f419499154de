//! Embedding generation and similarity for situational context

use std::sync::Arc;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::context::ContextFactors;
use crate::errors::{MemoryError, Result};
use crate::llm::LanguageModel;

/// Embeds context factor maps into the configured vector space.
///
/// Every vector leaving this service has exactly the configured dimension; a
/// model returning anything else is a hard error, because silently mixing
/// dimensions corrupts every similarity score downstream.
pub struct EmbeddingService {
    llm: Arc<dyn LanguageModel>,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(llm: Arc<dyn LanguageModel>, dimension: usize) -> Self {
        Self { llm, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a factor map. An empty map short-circuits to the zero vector
    /// without calling the service.
    pub async fn embed_factors(&self, factors: &ContextFactors) -> Result<Vec<f32>> {
        if factors.is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }
        self.embed_text(&factors.to_embedding_text()).await
    }

    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.llm.embed(text).await?;
        if vector.len() != self.dimension {
            return Err(MemoryError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        debug!(chars = text.len(), dim = vector.len(), "Text embedded");
        Ok(vector)
    }
}

/// Cosine similarity clamped to [0.0, 1.0].
///
/// Context has no meaningful notion of "opposite", so negative cosine is
/// floored to zero. A zero-magnitude vector on either side yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}

/// Rank candidates by descending similarity to the query, keeping the top k
/// at or above `min_score`.
pub fn rank_by_similarity<T>(
    query: &[f32],
    candidates: Vec<(T, Vec<f32>)>,
    top_k: usize,
    min_score: f32,
) -> Vec<(T, f32)> {
    let mut scored: Vec<(T, f32)> = candidates
        .into_iter()
        .map(|(item, vector)| {
            let score = cosine_similarity(query, &vector);
            (item, score)
        })
        .filter(|(_, score)| *score >= min_score)
        .collect();

    scored.sort_by_key(|(_, score)| std::cmp::Reverse(OrderedFloat(*score)));
    scored.truncate(top_k);
    scored
}
