//! Per-user preference agent
//!
//! One agent instance per (tenant, user) for the lifetime of the process.
//! It owns an in-memory mirror of the latest known preference records plus a
//! queue of pending writes, and orchestrates extraction, conflict detection,
//! confidence updates, situation persistence and cache invalidation.
//!
//! Concurrency note: concurrent calls for the same user are NOT serialized
//! here. The read-modify-write over the mirror is an accepted race; callers
//! needing atomicity for a single user must serialize externally. Calls for
//! different users never share an agent and are fully independent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::conflict::{ConflictCandidate, ConflictDetector};
use crate::context::merger::ContextMerger;
use crate::context::{ContextFactors, Situation};
use crate::errors::{MemoryError, Result};
use crate::extraction::PreferenceExtractor;
use crate::llm::LanguageModel;
use crate::preference::{upsert_candidate, PreferenceRecord, UpsertOutcome};
use crate::situations::SituationStore;
use crate::store::cache::{context_key, prefs_key};
use crate::store::{GraphStore, PreferenceCache};

/// Result of one learning pass over a message
#[derive(Debug, Default)]
pub struct LearnOutcome {
    /// Records written (inserted or replaced) during this pass
    pub learned: Vec<PreferenceRecord>,
    /// Contradictions requiring user confirmation; nothing was written for these
    pub conflicts: Vec<ConflictCandidate>,
    /// The situation snapshot the learned records were linked to, if any
    pub situation: Option<Situation>,
}

/// A situation hit from context retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSituation {
    pub situation: Situation,
    pub score: f32,
}

/// Result shape of a context query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextResponse {
    pub preferences: Vec<PreferenceRecord>,
    pub situations: Vec<ScoredSituation>,
    pub summary: String,
    /// Whether a background learning pass was triggered for this query
    pub learned: bool,
}

/// Options for [`PreferenceAgent::get_context`]
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub include_preferences: bool,
    pub include_situations: bool,
    pub min_confidence: f32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_preferences: true,
            include_situations: true,
            min_confidence: crate::constants::CONTEXT_MIN_CONFIDENCE,
        }
    }
}

pub struct PreferenceAgent {
    tenant_id: String,
    user_id: String,
    config: Config,
    graph: Arc<dyn GraphStore>,
    cache: Arc<dyn PreferenceCache>,
    situations: Arc<SituationStore>,
    llm: Arc<dyn LanguageModel>,
    extractor: PreferenceExtractor,
    merger: ContextMerger,
    /// Latest known records by key; see the module concurrency note
    mirror: RwLock<HashMap<String, PreferenceRecord>>,
    mirror_loaded: RwLock<bool>,
    /// Records accepted by the confidence model but not yet persisted
    pending: Mutex<VecDeque<PreferenceRecord>>,
}

impl PreferenceAgent {
    pub fn new(
        user_id: String,
        config: Config,
        llm: Arc<dyn LanguageModel>,
        graph: Arc<dyn GraphStore>,
        cache: Arc<dyn PreferenceCache>,
        situations: Arc<SituationStore>,
    ) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            user_id,
            extractor: PreferenceExtractor::new(llm.clone(), config.retry.clone()),
            merger: ContextMerger::new(llm.clone(), config.retry.clone()),
            config,
            graph,
            cache,
            situations,
            llm,
            mirror: RwLock::new(HashMap::new()),
            mirror_loaded: RwLock::new(false),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Load the mirror from the graph store on first use
    async fn ensure_mirror(&self) -> Result<()> {
        if *self.mirror_loaded.read() {
            return Ok(());
        }
        let records = self
            .graph
            .get_preferences(&self.tenant_id, &self.user_id)
            .await?;
        let mut mirror = self.mirror.write();
        for record in records {
            mirror.insert(record.key.as_str().to_string(), record);
        }
        *self.mirror_loaded.write() = true;
        Ok(())
    }

    /// Extract preferences from a message, reconcile them against the stored
    /// set, persist what was accepted and link it to the situation the
    /// message was uttered in.
    pub async fn learn(&self, message: &str) -> Result<LearnOutcome> {
        self.ensure_mirror().await?;

        let candidates = self.extractor.extract(message).await?;
        if candidates.is_empty() {
            debug!(user = %self.user_id, "No preferences in message");
            return Ok(LearnOutcome::default());
        }

        let mut outcome = LearnOutcome::default();
        let mut detector = ConflictDetector::new(self.llm.as_ref());

        for candidate in candidates {
            let existing_records: Vec<PreferenceRecord> =
                self.mirror.read().values().cloned().collect();

            let semantic = detector.scan(&candidate, &existing_records).await;
            if !semantic.is_empty() {
                info!(
                    key = candidate.key.as_str(),
                    conflicts = semantic.len(),
                    "Semantic conflict, holding candidate for confirmation"
                );
                outcome.conflicts.extend(semantic);
                continue;
            }

            let existing = self.mirror.read().get(candidate.key.as_str()).cloned();
            match upsert_candidate(existing.as_ref(), candidate) {
                UpsertOutcome::Insert(record) | UpsertOutcome::Replace(record) => {
                    self.mirror
                        .write()
                        .insert(record.key.as_str().to_string(), record.clone());
                    self.pending.lock().push_back(record);
                }
                UpsertOutcome::KeepExisting => {}
                UpsertOutcome::Conflict(conflict) => outcome.conflicts.push(conflict),
            }
        }

        outcome.learned = self.flush_pending().await?;

        if !outcome.learned.is_empty() {
            outcome.situation = self.attach_situation(message, &outcome.learned).await;
        }

        if !outcome.learned.is_empty() || !outcome.conflicts.is_empty() {
            self.invalidate_prefs_cache().await;
        }

        info!(
            user = %self.user_id,
            learned = outcome.learned.len(),
            conflicts = outcome.conflicts.len(),
            "Learning pass complete"
        );
        Ok(outcome)
    }

    /// Persist queued records, assigning storage ids. Records that fail to
    /// persist stay queued for the next pass.
    async fn flush_pending(&self) -> Result<Vec<PreferenceRecord>> {
        let mut flushed = Vec::new();
        loop {
            let Some(mut record) = self.pending.lock().pop_front() else {
                break;
            };
            match self
                .graph
                .upsert_preference(&self.tenant_id, &self.user_id, &record)
                .await
            {
                Ok(id) => {
                    record.id = Some(id);
                    self.mirror
                        .write()
                        .insert(record.key.as_str().to_string(), record.clone());
                    flushed.push(record);
                }
                Err(e) => {
                    warn!(key = record.key.as_str(), "Persist failed, requeueing: {e}");
                    self.pending.lock().push_front(record);
                    if flushed.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(flushed)
    }

    /// Record the situation for a message and link the learned records to it.
    /// Best-effort: context failures never undo a completed preference write.
    async fn attach_situation(
        &self,
        message: &str,
        learned: &[PreferenceRecord],
    ) -> Option<Situation> {
        let factors = match self.merger.snapshot(message).await {
            Ok(factors) => factors,
            Err(e) => {
                warn!(user = %self.user_id, "Context snapshot failed, skipping situation: {e}");
                return None;
            }
        };

        let situation = match self
            .situations
            .record(&self.tenant_id, &self.user_id, factors)
            .await
        {
            Ok(situation) => situation,
            Err(e) => {
                warn!(user = %self.user_id, "Situation write failed, preferences stand alone: {e}");
                return None;
            }
        };

        for record in learned {
            let Some(id) = record.id else { continue };
            if let Err(e) = self.situations.link(&self.tenant_id, id, situation.id).await {
                warn!(preference = %id, situation = %situation.id, "Link failed: {e}");
            }
        }

        Some(situation)
    }

    /// List preferences, read-through cached, filtered by optional domain and
    /// minimum confidence, ordered by descending confidence.
    pub async fn get_preferences(
        &self,
        domain: Option<&str>,
        min_confidence: f32,
    ) -> Result<Vec<PreferenceRecord>> {
        let key = prefs_key(&self.tenant_id, &self.user_id);

        let all: Vec<PreferenceRecord> = match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str(&cached) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Corrupt cache entry, falling through to store: {e}");
                    self.load_and_cache(&key).await?
                }
            },
            Ok(None) => self.load_and_cache(&key).await?,
            Err(e) => {
                // Cache down degrades to a store read
                warn!("Cache read failed, falling through to store: {e}");
                self.graph
                    .get_preferences(&self.tenant_id, &self.user_id)
                    .await?
            }
        };

        let mut filtered: Vec<PreferenceRecord> = all
            .into_iter()
            .filter(|r| r.confidence >= min_confidence)
            .filter(|r| domain.map_or(true, |d| r.key.domain() == d))
            .collect();
        filtered.sort_by_key(|r| std::cmp::Reverse(OrderedFloat(r.confidence)));
        Ok(filtered)
    }

    async fn load_and_cache(&self, key: &str) -> Result<Vec<PreferenceRecord>> {
        let records = self
            .graph
            .get_preferences(&self.tenant_id, &self.user_id)
            .await?;
        if let Ok(serialized) = serde_json::to_string(&records) {
            if let Err(e) = self
                .cache
                .set(key, serialized, self.config.preferences_ttl_secs)
                .await
            {
                warn!("Cache write failed: {e}");
            }
        }
        Ok(records)
    }

    /// Apply an accept/reject interaction to a stored preference.
    ///
    /// Returns the new confidence, or None when a rejection drove the record
    /// to zero and deleted it. The cache entry is invalidated before this
    /// returns.
    pub async fn record_interaction(
        &self,
        preference_id: Uuid,
        accepted: bool,
    ) -> Result<Option<f32>> {
        self.ensure_mirror().await?;

        let record = self
            .mirror
            .read()
            .values()
            .find(|r| r.id == Some(preference_id))
            .cloned()
            .ok_or_else(|| MemoryError::PreferenceNotFound {
                tenant_id: self.tenant_id.clone(),
                preference_id: preference_id.to_string(),
            })?;

        let key = record.key.as_str().to_string();
        let result = if accepted {
            let updated = record.apply_acceptance();
            self.graph
                .upsert_preference(&self.tenant_id, &self.user_id, &updated)
                .await?;
            let confidence = updated.confidence;
            self.mirror.write().insert(key, updated);
            Some(confidence)
        } else {
            match record.apply_rejection() {
                Some(updated) => {
                    self.graph
                        .upsert_preference(&self.tenant_id, &self.user_id, &updated)
                        .await?;
                    let confidence = updated.confidence;
                    self.mirror.write().insert(key, updated);
                    Some(confidence)
                }
                None => {
                    self.graph
                        .delete_preference(&self.tenant_id, preference_id)
                        .await?;
                    self.mirror.write().remove(&key);
                    info!(%preference_id, "Preference rejected to zero, deleted");
                    None
                }
            }
        };

        self.invalidate_prefs_cache().await;
        Ok(result)
    }

    /// Delete one preference by id. Errors with NotFound if absent.
    pub async fn delete_preference(&self, preference_id: Uuid) -> Result<()> {
        self.ensure_mirror().await?;

        if !self
            .graph
            .delete_preference(&self.tenant_id, preference_id)
            .await?
        {
            return Err(MemoryError::PreferenceNotFound {
                tenant_id: self.tenant_id.clone(),
                preference_id: preference_id.to_string(),
            });
        }

        self.mirror
            .write()
            .retain(|_, r| r.id != Some(preference_id));
        self.invalidate_prefs_cache().await;
        self.sweep_orphans().await;
        Ok(())
    }

    /// Delete every preference for this user. Returns the count removed.
    pub async fn delete_all_preferences(&self) -> Result<usize> {
        let count = self
            .graph
            .delete_all_preferences(&self.tenant_id, &self.user_id)
            .await?;
        self.mirror.write().clear();
        self.pending.lock().clear();
        self.invalidate_prefs_cache().await;
        self.sweep_orphans().await;
        info!(user = %self.user_id, count, "All preferences deleted");
        Ok(count)
    }

    /// Retrieve context relevant to a query: similar past situations and the
    /// preferences linked to them. External failures degrade to an
    /// unavailable-context response instead of blocking the caller.
    pub async fn get_context(&self, query: &str, options: &ContextOptions) -> Result<ContextResponse> {
        let factors = match self.merger.snapshot(query).await {
            Ok(factors) => factors,
            Err(e) => {
                warn!(user = %self.user_id, "Context pipeline failed, degrading: {e}");
                return Ok(Self::unavailable_response());
            }
        };

        let cache_key = context_key(&self.tenant_id, &self.user_id, &factors);
        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            if let Ok(response) = serde_json::from_str::<ContextResponse>(&cached) {
                debug!(user = %self.user_id, "Context cache hit");
                return Ok(response);
            }
        }

        let hits = match self
            .situations
            .find_similar(
                &self.tenant_id,
                &self.user_id,
                &factors,
                self.config.retrieval_top_k,
                self.config.retrieval_min_score,
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(user = %self.user_id, "Situation retrieval failed, degrading: {e}");
                return Ok(Self::unavailable_response());
            }
        };

        let mut response = ContextResponse::default();

        if options.include_preferences {
            response.preferences = match self
                .linked_preferences(&hits, options.min_confidence)
                .await
            {
                Ok(preferences) => preferences,
                Err(e) => {
                    warn!(user = %self.user_id, "Linked-preference lookup failed, degrading: {e}");
                    return Ok(Self::unavailable_response());
                }
            };
        }
        if options.include_situations {
            response.situations = hits
                .into_iter()
                .map(|(situation, score)| ScoredSituation { situation, score })
                .collect();
        }
        response.summary = Self::summarize(&factors, &response);

        if let Ok(serialized) = serde_json::to_string(&response) {
            if let Err(e) = self
                .cache
                .set(&cache_key, serialized, self.config.context_ttl_secs)
                .await
            {
                warn!("Context cache write failed: {e}");
            }
        }

        Ok(response)
    }

    /// Preferences linked to the retrieved situations, de-duplicated and
    /// confidence-filtered. Falls back to the plain preference list when no
    /// situation matched, so a user with no recorded situations still gets
    /// their high-confidence preferences.
    async fn linked_preferences(
        &self,
        hits: &[(Situation, f32)],
        min_confidence: f32,
    ) -> Result<Vec<PreferenceRecord>> {
        if hits.is_empty() {
            return self.get_preferences(None, min_confidence).await;
        }

        let mut seen = std::collections::HashSet::new();
        let mut records = Vec::new();
        for (situation, _) in hits {
            let linked = self
                .graph
                .preferences_for_situation(&self.tenant_id, situation.id)
                .await?;
            for record in linked {
                if record.confidence >= min_confidence
                    && seen.insert(record.key.as_str().to_string())
                {
                    records.push(record);
                }
            }
        }

        if records.is_empty() {
            return self.get_preferences(None, min_confidence).await;
        }

        records.sort_by_key(|r| std::cmp::Reverse(OrderedFloat(r.confidence)));
        Ok(records)
    }

    fn unavailable_response() -> ContextResponse {
        ContextResponse {
            summary: "relevant context unavailable".to_string(),
            ..ContextResponse::default()
        }
    }

    fn summarize(factors: &ContextFactors, response: &ContextResponse) -> String {
        let mut parts = Vec::new();
        if !factors.is_empty() {
            parts.push(format!("Current context: {}", factors.to_embedding_text()));
        }
        if !response.preferences.is_empty() {
            let prefs: Vec<String> = response
                .preferences
                .iter()
                .map(|r| {
                    format!(
                        "{} ({}, {:.2})",
                        r.value,
                        r.sentiment.as_str(),
                        r.confidence
                    )
                })
                .collect();
            parts.push(format!("Relevant preferences: {}", prefs.join("; ")));
        }
        if !response.situations.is_empty() {
            parts.push(format!(
                "{} similar past situation(s) found",
                response.situations.len()
            ));
        }
        if parts.is_empty() {
            "no relevant context found".to_string()
        } else {
            parts.join(". ")
        }
    }

    /// Situations a preference was learned under, for rendering
    pub async fn situations_for(&self, preference_id: Uuid) -> Result<Vec<Situation>> {
        self.graph
            .situations_for_preference(&self.tenant_id, preference_id)
            .await
    }

    /// Invalidate synchronously: a cache hit must never outlive a mutation
    async fn invalidate_prefs_cache(&self) {
        let key = prefs_key(&self.tenant_id, &self.user_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!("Cache invalidation failed for {key}: {e}");
        }
    }

    /// Best-effort orphan sweep after deletions
    async fn sweep_orphans(&self) {
        if let Err(e) = self
            .situations
            .collect_orphans(&self.tenant_id, &self.user_id)
            .await
        {
            warn!(user = %self.user_id, "Orphan sweep failed: {e}");
        }
    }
}
