//! Conflict detection between extracted candidates and stored preferences
//!
//! Two classes of conflict exist. Direct conflicts (same key, opposite
//! sentiment) are caught inline by the upsert path. Semantic conflicts span
//! different keys in the same domain, where a general preference contradicts
//! a more specific related one ("dislikes coffee" vs "likes espresso"), and
//! require an external relatedness check.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::LanguageModel;
use crate::preference::{PreferenceRecord, Sentiment};

/// How the conflicting pair was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Same key, opposite sentiment
    Direct,
    /// Different keys in one domain, judged related by the language model
    Semantic,
}

/// A detected contradiction awaiting user confirmation
///
/// Transient: created during one extraction pass, handed to the caller for
/// presentation, never persisted. `key` is the stored (general) side of the
/// pair; `candidate_key` the newly extracted one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCandidate {
    pub kind: ConflictKind,
    pub key: String,
    pub candidate_key: String,
    pub old_value: String,
    pub new_value: String,
    pub old_sentiment: Sentiment,
    pub new_sentiment: Sentiment,
    pub old_confidence: f32,
    pub new_confidence: f32,
    /// Other same-domain keys the relatedness scan tied to this general key
    pub related_keys: Vec<String>,
}

impl ConflictCandidate {
    pub fn direct(existing: &PreferenceRecord, candidate: &PreferenceRecord) -> Self {
        Self {
            kind: ConflictKind::Direct,
            key: existing.key.as_str().to_string(),
            candidate_key: candidate.key.as_str().to_string(),
            old_value: existing.value.clone(),
            new_value: candidate.value.clone(),
            old_sentiment: existing.sentiment,
            new_sentiment: candidate.sentiment,
            old_confidence: existing.confidence,
            new_confidence: candidate.confidence,
            related_keys: Vec::new(),
        }
    }

    pub fn semantic(
        general: &PreferenceRecord,
        candidate: &PreferenceRecord,
        related_keys: Vec<String>,
    ) -> Self {
        Self {
            kind: ConflictKind::Semantic,
            key: general.key.as_str().to_string(),
            candidate_key: candidate.key.as_str().to_string(),
            old_value: general.value.clone(),
            new_value: candidate.value.clone(),
            old_sentiment: general.sentiment,
            new_sentiment: candidate.sentiment,
            old_confidence: general.confidence,
            new_confidence: candidate.confidence,
            related_keys,
        }
    }
}

/// Pairwise semantic conflict scan over same-domain preferences
///
/// Relatedness answers are cached per scan instance, so one detector should
/// live for exactly one extraction pass.
pub struct ConflictDetector<'a> {
    llm: &'a dyn LanguageModel,
    /// Unordered-pair cache: (low, high) key pair -> general key if related
    relatedness: HashMap<(String, String), Option<String>>,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(llm: &'a dyn LanguageModel) -> Self {
        Self {
            llm,
            relatedness: HashMap::new(),
        }
    }

    /// Scan a candidate against existing records for semantic conflicts.
    ///
    /// Only same-domain records with opposing sentiment participate; records
    /// marked as exceptions are skipped on either side. A relatedness failure
    /// for one pair is logged and the scan continues, so partial results are
    /// always returned. At most one candidate is reported per general key.
    pub async fn scan(
        &mut self,
        candidate: &PreferenceRecord,
        existing: &[PreferenceRecord],
    ) -> Vec<ConflictCandidate> {
        let mut conflicts = Vec::new();

        if candidate.is_exception {
            return conflicts;
        }

        let mut reported_general: HashSet<String> = HashSet::new();

        for record in existing {
            if record.is_exception {
                continue;
            }
            if record.key.domain() != candidate.key.domain() {
                continue;
            }
            if record.key == candidate.key {
                // Direct conflicts are the upsert path's job
                continue;
            }
            // Identical bare keys under different nesting are direct-conflict
            // territory too, not a semantic relationship.
            if record.key.bare_key() == candidate.key.bare_key() {
                continue;
            }
            if !record.sentiment.opposes(candidate.sentiment) {
                continue;
            }

            let general = match self
                .related_general_key(candidate.key.as_str(), record.key.as_str())
                .await
            {
                Ok(general) => general,
                Err(e) => {
                    warn!(
                        candidate_key = candidate.key.as_str(),
                        existing_key = record.key.as_str(),
                        "Relatedness check failed, skipping pair: {e}"
                    );
                    continue;
                }
            };

            let Some(general_key) = general else {
                continue;
            };

            if !reported_general.insert(general_key.clone()) {
                // Already reported this general key against another specific
                if let Some(c) = conflicts
                    .iter_mut()
                    .find(|c: &&mut ConflictCandidate| c.key == general_key)
                {
                    let other = if general_key == record.key.as_str() {
                        candidate.key.as_str()
                    } else {
                        record.key.as_str()
                    };
                    if !c.related_keys.iter().any(|k| k == other) {
                        c.related_keys.push(other.to_string());
                    }
                }
                continue;
            }

            debug!(
                general = %general_key,
                specific = if general_key == record.key.as_str() {
                    candidate.key.as_str()
                } else {
                    record.key.as_str()
                },
                "Semantic conflict detected"
            );

            // The stored record is presented as the "old" side regardless of
            // which key the model judged more general.
            let related = vec![if general_key == record.key.as_str() {
                candidate.key.as_str().to_string()
            } else {
                record.key.as_str().to_string()
            }];

            let mut conflict = ConflictCandidate::semantic(record, candidate, related);
            conflict.key = general_key;
            conflicts.push(conflict);
        }

        conflicts
    }

    /// Ask the model whether two keys are related; returns the more general
    /// key if so. Answers are cached per unordered pair for the lifetime of
    /// this detector.
    async fn related_general_key(
        &mut self,
        key_a: &str,
        key_b: &str,
    ) -> crate::errors::Result<Option<String>> {
        let pair = if key_a <= key_b {
            (key_a.to_string(), key_b.to_string())
        } else {
            (key_b.to_string(), key_a.to_string())
        };

        if let Some(cached) = self.relatedness.get(&pair) {
            return Ok(cached.clone());
        }

        let prompt = format!(
            "Two user preference keys share the domain '{}':\n\
             1. {key_a}\n\
             2. {key_b}\n\
             Are these hierarchically related (one a parent category or \
             synonym of the other)? If yes, reply with the MORE GENERAL key \
             exactly as written above. If they are unrelated, reply with the \
             single word: none",
            key_a.split('.').next().unwrap_or(key_a)
        );

        let raw = self
            .llm
            .complete(
                "You judge whether preference keys are hierarchically related. \
                 Reply with exactly one key from the list, or 'none'.",
                &prompt,
            )
            .await?;

        // Accept only an answer that names one of the offered keys verbatim;
        // anything else is treated as unrelated.
        let answer = raw.trim().trim_matches(['"', '\'', '`', '.']).trim();
        let general = if answer == key_a {
            Some(key_a.to_string())
        } else if answer == key_b {
            Some(key_b.to_string())
        } else {
            None
        };

        self.relatedness.insert(pair, general.clone());
        Ok(general)
    }
}
