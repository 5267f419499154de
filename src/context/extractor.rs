//! Dynamic context extraction from free text
//!
//! The model is asked for a strict JSON object, but models drift: they wrap
//! answers in code fences or prepend reasoning prose. Parsing here is
//! defensive. A response with no locatable JSON at all counts as a failed
//! attempt and is retried with backoff; a response whose JSON parses but
//! fails factor validation falls back to an empty factor set with confidence
//! 0.0 rather than propagating a malformed structure.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::context::{ContextFactors, FactorName};
use crate::errors::{MemoryError, Result};
use crate::llm::{retry_with_backoff, LanguageModel};

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract situational context from a user message. \
Respond with ONLY a JSON object of this exact shape:\n\
{\"context_factors\": {\"snake_case_name\": \"value\", ...}, \"confidence\": 0.0, \"explanation\": \"\"}\n\
Factor names must be snake_case. Include only factors the message actually \
supports (mood, location, activity, companions, urgency). If the message \
carries no situational signal, return an empty context_factors object with \
confidence 0.0.";

/// Parsed extraction result
#[derive(Debug)]
pub struct ExtractedContext {
    pub factors: ContextFactors,
    /// Model's own confidence in the extraction, within [0.0, 1.0]
    pub confidence: f32,
    pub explanation: String,
}

impl ExtractedContext {
    fn empty() -> Self {
        Self {
            factors: ContextFactors::new(),
            confidence: 0.0,
            explanation: String::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    context_factors: HashMap<String, serde_json::Value>,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    explanation: String,
}

pub struct DynamicContextExtractor {
    llm: Arc<dyn LanguageModel>,
    retry: RetryConfig,
}

impl DynamicContextExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryConfig) -> Self {
        Self { llm, retry }
    }

    /// Extract dynamic factors from a user message.
    ///
    /// API errors and responses with no parseable JSON propagate after the
    /// bounded retry; structurally valid JSON that fails factor validation
    /// degrades to an empty result instead.
    pub async fn extract(&self, message: &str) -> Result<ExtractedContext> {
        let raw = retry_with_backoff(&self.retry, "context extraction", || async {
            let response = self.llm.complete(EXTRACTION_SYSTEM_PROMPT, message).await?;
            parse_extraction_json(&response).ok_or_else(|| {
                MemoryError::CompletionFailed(format!(
                    "no JSON object in extraction response ({} chars)",
                    response.len()
                ))
            })
        })
        .await?;

        Ok(validate_extraction(raw))
    }
}

/// Locate and parse the first well-formed JSON object in a model response
fn parse_extraction_json(response: &str) -> Option<RawExtraction> {
    let text = strip_code_fences(response);
    let json = first_json_object(text)?;
    serde_json::from_str(json).ok()
}

/// Drop markdown code-fence lines, keeping their contents
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string on the opening fence line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Slice out the first balanced-brace JSON object, tolerating prose before it
pub(crate) fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Gate raw model output through factor validation.
///
/// Any invalid factor name, non-string value, or out-of-range confidence
/// discards the whole extraction: a partially trusted context is worse than
/// none.
fn validate_extraction(raw: RawExtraction) -> ExtractedContext {
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        warn!(confidence = raw.confidence, "Extraction confidence out of range, discarding");
        return ExtractedContext::empty();
    }

    let mut factors = ContextFactors::new();
    for (name, value) in raw.context_factors {
        let serde_json::Value::String(value) = value else {
            warn!(factor = %name, "Non-string factor value, discarding extraction");
            return ExtractedContext::empty();
        };

        let name = match FactorName::new(name) {
            Ok(name) => name,
            Err(e) => {
                warn!("Invalid factor name in extraction, discarding: {e}");
                return ExtractedContext::empty();
            }
        };

        if let Err(e) = factors.insert(name, value) {
            warn!("Invalid factor value in extraction, discarding: {e}");
            return ExtractedContext::empty();
        }
    }

    debug!(
        factors = factors.len(),
        confidence = raw.confidence,
        "Dynamic context extracted"
    );

    ExtractedContext {
        factors,
        confidence: raw.confidence,
        explanation: raw.explanation,
    }
}
