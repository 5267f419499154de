//! Structured error types for the preference memory core
//!
//! Four-way taxonomy: validation errors are rejected before storage and are
//! never fatal to the overall request; not-found is surfaced distinctly;
//! external-dependency failures are retryable and degrade gracefully;
//! consistency failures carry enough identity to reconcile a partial
//! dual-store write.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error payload for tool-surface clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Which half of the dual store completed before a partial write failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreSide {
    Graph,
    Vector,
}

impl fmt::Display for StoreSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Vector => write!(f, "vector"),
        }
    }
}

/// Application error types with proper categorization
#[derive(Debug)]
pub enum MemoryError {
    // Validation errors - rejected before reaching storage
    InvalidInput { field: String, reason: String },
    InvalidUserId(String),
    InvalidPreferenceKey(String),
    InvalidFactorName(String),
    ConfidenceOutOfRange(f32),

    // Not found - distinct from dependency failure
    PreferenceNotFound { tenant_id: String, preference_id: String },
    SituationNotFound { tenant_id: String, situation_id: String },

    // External dependency failures - retryable, degrade to best-effort
    CompletionFailed(String),
    EmbeddingFailed(String),
    EmbeddingDimensionMismatch { expected: usize, actual: usize },
    StoreUnavailable { store: String, reason: String },

    // Partial dual-store write; carries what is needed for reconciliation
    Consistency {
        situation_id: String,
        succeeded: StoreSide,
        reason: String,
    },

    // Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl MemoryError {
    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidUserId(_) => "INVALID_USER_ID",
            Self::InvalidPreferenceKey(_) => "INVALID_PREFERENCE_KEY",
            Self::InvalidFactorName(_) => "INVALID_FACTOR_NAME",
            Self::ConfidenceOutOfRange(_) => "CONFIDENCE_OUT_OF_RANGE",
            Self::PreferenceNotFound { .. } => "PREFERENCE_NOT_FOUND",
            Self::SituationNotFound { .. } => "SITUATION_NOT_FOUND",
            Self::CompletionFailed(_) => "COMPLETION_FAILED",
            Self::EmbeddingFailed(_) => "EMBEDDING_FAILED",
            Self::EmbeddingDimensionMismatch { .. } => "EMBEDDING_DIMENSION_MISMATCH",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::Consistency { .. } => "CONSISTENCY_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the whole operation
    ///
    /// Consistency failures are deliberately NOT retryable: replaying the
    /// write would create a duplicate situation id. They need reconciliation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CompletionFailed(_) | Self::EmbeddingFailed(_) | Self::StoreUnavailable { .. }
        )
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::InvalidUserId(msg) => format!("Invalid user ID: {msg}"),
            Self::InvalidPreferenceKey(msg) => format!("Invalid preference key: {msg}"),
            Self::InvalidFactorName(msg) => format!("Invalid context factor name: {msg}"),
            Self::ConfidenceOutOfRange(v) => {
                format!("Confidence must be within [0.0, 0.95], got {v}")
            }
            Self::PreferenceNotFound {
                tenant_id,
                preference_id,
            } => format!("Preference {preference_id} not found for tenant {tenant_id}"),
            Self::SituationNotFound {
                tenant_id,
                situation_id,
            } => format!("Situation {situation_id} not found for tenant {tenant_id}"),
            Self::CompletionFailed(msg) => format!("LLM completion failed: {msg}"),
            Self::EmbeddingFailed(msg) => format!("Embedding generation failed: {msg}"),
            Self::EmbeddingDimensionMismatch { expected, actual } => {
                format!("Embedding dimension mismatch: expected {expected}, got {actual}")
            }
            Self::StoreUnavailable { store, reason } => {
                format!("Store '{store}' unavailable: {reason}")
            }
            Self::Consistency {
                situation_id,
                succeeded,
                reason,
            } => format!(
                "Partial dual-store write for situation {situation_id} \
                 ({succeeded} store succeeded): {reason}"
            ),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Convert to structured error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            details: None,
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for MemoryError {}

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Helper trait to convert validation errors
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| MemoryError::InvalidInput {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using MemoryError
pub type Result<T> = std::result::Result<T, MemoryError>;
