//! Preference extraction from free-text conversation
//!
//! The model turns a user message into zero or more preference candidates;
//! the core owns validation and normalization of that output. Unlike context
//! extraction, individual bad candidates are dropped (logged) rather than
//! discarding the batch: one hallucinated key should not cost the user the
//! other correctly extracted preferences.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::constants::{DEFAULT_EXTRACTION_CONFIDENCE, CONFIDENCE_MAX};
use crate::context::extractor::{first_json_object, strip_code_fences};
use crate::errors::{MemoryError, Result};
use crate::llm::{retry_with_backoff, LanguageModel};
use crate::preference::{PreferenceKey, PreferenceRecord, Sentiment};

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract user preferences from a message. \
Respond with ONLY a JSON object of this exact shape:\n\
{\"preferences\": [{\"key\": \"domain.item\", \"value\": \"description\", \
\"sentiment\": \"positive|negative|neutral\", \"confidence\": 0.5, \"is_exception\": false}]}\n\
Keys are snake_case 'domain.item' composites (food.cappuccino, music.jazz). \
The value is a short natural description of the preference. Mark is_exception \
only when the user explicitly frames the preference as a deviation from their \
usual habit. Return an empty list when the message states no preference.";

#[derive(Deserialize)]
struct RawBatch {
    #[serde(default)]
    preferences: Vec<RawCandidate>,
}

#[derive(Deserialize)]
struct RawCandidate {
    key: String,
    value: String,
    sentiment: String,
    confidence: Option<f32>,
    #[serde(default)]
    is_exception: bool,
}

pub struct PreferenceExtractor {
    llm: Arc<dyn LanguageModel>,
    retry: RetryConfig,
}

impl PreferenceExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryConfig) -> Self {
        Self { llm, retry }
    }

    /// Extract preference candidates from a message.
    ///
    /// API errors and unparseable responses propagate after the bounded
    /// retry. Candidates that fail field validation are dropped one by one,
    /// never failing the batch.
    pub async fn extract(&self, message: &str) -> Result<Vec<PreferenceRecord>> {
        let batch = retry_with_backoff(&self.retry, "preference extraction", || async {
            let response = self.llm.complete(EXTRACTION_SYSTEM_PROMPT, message).await?;
            parse_batch(&response).ok_or_else(|| {
                MemoryError::CompletionFailed(format!(
                    "no JSON object in extraction response ({} chars)",
                    response.len()
                ))
            })
        })
        .await?;

        let mut records = Vec::with_capacity(batch.preferences.len());
        for raw in batch.preferences {
            match normalize_candidate(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Dropping invalid extracted preference: {e}"),
            }
        }

        debug!(count = records.len(), "Preferences extracted");
        Ok(records)
    }
}

fn parse_batch(response: &str) -> Option<RawBatch> {
    let text = strip_code_fences(response);
    let json = first_json_object(text)?;
    serde_json::from_str(json).ok()
}

/// Validate and normalize one raw candidate into a record.
///
/// A missing confidence defaults to 0.5; a reported confidence above the
/// model cap is clamped down rather than rejected, since the cap is our
/// bound, not the extractor's.
fn normalize_candidate(raw: RawCandidate) -> Result<PreferenceRecord> {
    let key = PreferenceKey::new(raw.key.trim().to_ascii_lowercase())?;
    let sentiment: Sentiment = raw.sentiment.parse()?;

    let confidence = raw
        .confidence
        .unwrap_or(DEFAULT_EXTRACTION_CONFIDENCE)
        .clamp(0.0, CONFIDENCE_MAX);
    let confidence = if confidence.is_finite() {
        confidence
    } else {
        DEFAULT_EXTRACTION_CONFIDENCE
    };

    let mut record = PreferenceRecord::new(key, raw.value.trim(), sentiment, confidence)?;
    record.is_exception = raw.is_exception;
    Ok(record)
}
