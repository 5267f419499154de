//! Preference records and the confidence/reinforcement model
//!
//! A preference is exclusively owned by its (tenant, domain.key) pair: at
//! most one live record per key per tenant. Confidence is clamped to
//! [0.0, 0.95] by every operation; a record whose confidence reaches zero is
//! deleted, never stored at zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::ConflictCandidate;
use crate::constants::{ACCEPT_DELTA, CONFIDENCE_MAX, CONFIDENCE_MIN, REJECT_DELTA};
use crate::errors::{MemoryError, Result};
use crate::validation::{validate_preference_key, validate_preference_value};

/// Polarity of a preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Whether two sentiments are in direct opposition (positive↔negative).
    /// Neutral never conflicts with anything.
    pub fn opposes(self, other: Sentiment) -> bool {
        matches!(
            (self, other),
            (Sentiment::Positive, Sentiment::Negative)
                | (Sentiment::Negative, Sentiment::Positive)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(MemoryError::InvalidInput {
                field: "sentiment".to_string(),
                reason: format!("expected positive/negative/neutral, got '{other}'"),
            }),
        }
    }
}

/// Validated `domain.key` composite identifier (e.g. `food.cappuccino`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceKey(String);

impl PreferenceKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_preference_key(&key)
            .map_err(|e| MemoryError::InvalidPreferenceKey(e.to_string()))?;
        Ok(Self(key))
    }

    /// Top-level category prefix, the text before the first dot
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Everything after the domain prefix
    pub fn bare_key(&self) -> &str {
        self.0.split_once('.').map(|(_, rest)| rest).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single learned preference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceRecord {
    /// Storage id, absent until the record is persisted
    pub id: Option<Uuid>,

    pub key: PreferenceKey,

    /// Free-text description (e.g. "likes cappuccino in the morning")
    pub value: String,

    pub sentiment: Sentiment,

    /// Belief strength, always within [0.0, 0.95]
    pub confidence: f32,

    /// Deliberately acknowledged deviation: excluded from conflict scans and
    /// from the same-sentiment overwrite rule
    pub is_exception: bool,

    pub reinforcement_count: u32,
    pub rejection_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceRecord {
    /// Build a new unpersisted record; validates key, value and confidence.
    pub fn new(
        key: PreferenceKey,
        value: impl Into<String>,
        sentiment: Sentiment,
        confidence: f32,
    ) -> Result<Self> {
        let value = value.into();
        validate_preference_value(&value).map_err(|e| MemoryError::InvalidInput {
            field: "value".to_string(),
            reason: e.to_string(),
        })?;

        if !confidence.is_finite() || !(CONFIDENCE_MIN..=CONFIDENCE_MAX).contains(&confidence) {
            return Err(MemoryError::ConfidenceOutOfRange(confidence));
        }

        let now = Utc::now();
        Ok(Self {
            id: None,
            key,
            value,
            sentiment,
            confidence,
            is_exception: false,
            reinforcement_count: 0,
            rejection_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a user acceptance: confidence rises by ACCEPT_DELTA, clamped at
    /// the 0.95 cap, and the reinforcement counter increments.
    pub fn apply_acceptance(mut self) -> Self {
        self.confidence = (self.confidence + ACCEPT_DELTA).min(CONFIDENCE_MAX);
        self.reinforcement_count += 1;
        self.updated_at = Utc::now();
        self
    }

    /// Apply a user rejection: confidence drops by REJECT_DELTA, floored at
    /// zero. A record that hits the floor is deleted - `None` means "remove
    /// from storage", never "store at zero".
    pub fn apply_rejection(mut self) -> Option<Self> {
        self.confidence = (self.confidence - REJECT_DELTA).max(CONFIDENCE_MIN);
        self.rejection_count += 1;
        self.updated_at = Utc::now();

        if self.confidence <= CONFIDENCE_MIN {
            None
        } else {
            Some(self)
        }
    }
}

/// Outcome of reconciling a newly extracted candidate with storage
#[derive(Debug)]
pub enum UpsertOutcome {
    /// No record existed for the key; the candidate should be inserted
    Insert(PreferenceRecord),
    /// Same sentiment, strictly higher confidence; replace the stored record
    Replace(PreferenceRecord),
    /// Same sentiment but no confidence gain (ties keep the existing record -
    /// stability over churn), or the existing record is an exception
    KeepExisting,
    /// Sentiments oppose; nothing is written until the user confirms
    Conflict(ConflictCandidate),
}

/// Reconcile a candidate against the existing record for its key.
///
/// The existing record is never mutated here; direct sentiment conflicts are
/// reported for confirmation instead of silently overwriting.
pub fn upsert_candidate(
    existing: Option<&PreferenceRecord>,
    candidate: PreferenceRecord,
) -> UpsertOutcome {
    let Some(existing) = existing else {
        return UpsertOutcome::Insert(candidate);
    };

    // Exception records are permanently pinned: no overwrite, no conflict.
    if existing.is_exception {
        return UpsertOutcome::KeepExisting;
    }

    if existing.sentiment.opposes(candidate.sentiment) {
        return UpsertOutcome::Conflict(ConflictCandidate::direct(existing, &candidate));
    }

    if candidate.confidence > existing.confidence {
        // Preserve identity and history of the stored record
        let mut replacement = candidate;
        replacement.id = existing.id;
        replacement.created_at = existing.created_at;
        replacement.reinforcement_count = existing.reinforcement_count;
        replacement.rejection_count = existing.rejection_count;
        replacement.updated_at = Utc::now();
        UpsertOutcome::Replace(replacement)
    } else {
        UpsertOutcome::KeepExisting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, sentiment: Sentiment, confidence: f32) -> PreferenceRecord {
        PreferenceRecord::new(
            PreferenceKey::new(key).unwrap(),
            format!("test value for {key}"),
            sentiment,
            confidence,
        )
        .unwrap()
    }

    #[test]
    fn test_acceptance_clamps_at_cap() {
        let rec = record("food.coffee", Sentiment::Positive, 0.9);
        let updated = rec.apply_acceptance();
        assert_eq!(updated.confidence, 0.95);
        assert_eq!(updated.reinforcement_count, 1);

        // Already at cap: stays there
        let again = updated.apply_acceptance();
        assert_eq!(again.confidence, 0.95);
        assert_eq!(again.reinforcement_count, 2);
    }

    #[test]
    fn test_rejection_at_low_confidence_deletes() {
        let rec = record("food.coffee", Sentiment::Positive, 0.1);
        assert!(rec.apply_rejection().is_none());
    }

    #[test]
    fn test_rejection_above_floor_survives() {
        let rec = record("food.coffee", Sentiment::Positive, 0.5);
        let updated = rec.apply_rejection().unwrap();
        assert!((updated.confidence - 0.35).abs() < 1e-6);
        assert_eq!(updated.rejection_count, 1);
    }

    #[test]
    fn test_confidence_always_in_bounds() {
        let mut rec = record("food.tea", Sentiment::Neutral, 0.5);
        for _ in 0..20 {
            rec = rec.apply_acceptance();
            assert!(rec.confidence <= 0.95);
            assert!(rec.confidence >= 0.0);
        }
    }

    #[test]
    fn test_upsert_inserts_when_absent() {
        let cand = record("food.coffee", Sentiment::Positive, 0.6);
        assert!(matches!(
            upsert_candidate(None, cand),
            UpsertOutcome::Insert(_)
        ));
    }

    #[test]
    fn test_upsert_same_sentiment_higher_confidence_replaces() {
        let mut existing = record("food.coffee", Sentiment::Positive, 0.5);
        existing.id = Some(Uuid::new_v4());
        let cand = record("food.coffee", Sentiment::Positive, 0.8);

        match upsert_candidate(Some(&existing), cand) {
            UpsertOutcome::Replace(rec) => {
                assert_eq!(rec.confidence, 0.8);
                assert_eq!(rec.id, existing.id); // identity preserved
            }
            other => panic!("expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn test_upsert_tie_keeps_existing() {
        let existing = record("food.coffee", Sentiment::Positive, 0.7);
        let cand = record("food.coffee", Sentiment::Positive, 0.7);
        assert!(matches!(
            upsert_candidate(Some(&existing), cand),
            UpsertOutcome::KeepExisting
        ));
    }

    #[test]
    fn test_upsert_opposing_sentiment_conflicts_without_write() {
        let existing = record("food.coffee", Sentiment::Positive, 0.7);
        let cand = record("food.coffee", Sentiment::Negative, 0.8);

        match upsert_candidate(Some(&existing), cand) {
            UpsertOutcome::Conflict(c) => {
                assert_eq!(c.key, "food.coffee");
                assert_eq!(c.old_sentiment, Sentiment::Positive);
                assert_eq!(c.new_sentiment, Sentiment::Negative);
                assert!((c.old_confidence - 0.7).abs() < 1e-6);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        // The existing record was only borrowed; it cannot have been mutated.
        assert_eq!(existing.confidence, 0.7);
    }

    #[test]
    fn test_upsert_neutral_never_conflicts() {
        let existing = record("food.coffee", Sentiment::Neutral, 0.5);
        let cand = record("food.coffee", Sentiment::Negative, 0.8);
        assert!(matches!(
            upsert_candidate(Some(&existing), cand),
            UpsertOutcome::Replace(_)
        ));
    }

    #[test]
    fn test_exception_record_is_pinned() {
        let mut existing = record("food.decaf", Sentiment::Positive, 0.4);
        existing.is_exception = true;

        // Higher confidence, same sentiment: still kept
        let cand = record("food.decaf", Sentiment::Positive, 0.9);
        assert!(matches!(
            upsert_candidate(Some(&existing), cand),
            UpsertOutcome::KeepExisting
        ));

        // Opposing sentiment: no conflict either
        let cand = record("food.decaf", Sentiment::Negative, 0.9);
        assert!(matches!(
            upsert_candidate(Some(&existing), cand),
            UpsertOutcome::KeepExisting
        ));
    }

    #[test]
    fn test_key_domain_split() {
        let key = PreferenceKey::new("food.cappuccino").unwrap();
        assert_eq!(key.domain(), "food");
        assert_eq!(key.bare_key(), "cappuccino");
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(PreferenceKey::new("no_domain").is_err());
        assert!(PreferenceKey::new("Food.coffee").is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let key = PreferenceKey::new("food.coffee").unwrap();
        assert!(PreferenceRecord::new(key.clone(), "v", Sentiment::Positive, 0.96).is_err());
        assert!(PreferenceRecord::new(key, "v", Sentiment::Positive, -0.1).is_err());
    }
}
