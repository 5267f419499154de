//! Combine system and dynamic factors into one snapshot
//!
//! Dynamic factors always win on collision: what the user says about their
//! situation is more specific than what the clock can infer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RetryConfig;
use crate::context::extractor::DynamicContextExtractor;
use crate::context::system::SystemContextProvider;
use crate::context::ContextFactors;
use crate::errors::Result;
use crate::llm::LanguageModel;

pub struct ContextMerger {
    system: SystemContextProvider,
    extractor: DynamicContextExtractor,
}

impl ContextMerger {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryConfig) -> Self {
        Self {
            system: SystemContextProvider,
            extractor: DynamicContextExtractor::new(llm, retry),
        }
    }

    /// Full snapshot for a message at the current instant
    pub async fn snapshot(&self, message: &str) -> Result<ContextFactors> {
        self.snapshot_at(message, Utc::now()).await
    }

    /// Full snapshot for a message at an arbitrary instant.
    ///
    /// Extraction failures propagate; an extraction that degraded to an empty
    /// factor set still yields the system factors.
    pub async fn snapshot_at(&self, message: &str, at: DateTime<Utc>) -> Result<ContextFactors> {
        let system = self.system.factors_at(at);
        let dynamic = self.extractor.extract(message).await?;

        let merged = system.merge(&dynamic.factors, true);
        debug!(
            system = system.len(),
            dynamic = dynamic.factors.len(),
            merged = merged.len(),
            "Context snapshot built"
        );
        Ok(merged)
    }
}
