//! Situational context: factor maps and captured situations
//!
//! Context factors are a flat string map describing the circumstances a
//! preference was learned under (time of day, mood, location). Factor names
//! go through a validating newtype so malformed model output never reaches
//! storage; the map itself keeps sorted key order so hashing and embedding
//! serialization are independent of insertion order.

pub mod extractor;
pub mod merger;
pub mod system;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{MemoryError, Result};
use crate::validation::{validate_factor_name, validate_factor_value, MAX_FACTORS_PER_CONTEXT};

/// Validated snake_case context factor name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FactorName(String);

impl FactorName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_factor_name(&name).map_err(|e| MemoryError::InvalidFactorName(e.to_string()))?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FactorName {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FactorName> for String {
    fn from(name: FactorName) -> Self {
        name.0
    }
}

impl std::fmt::Display for FactorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flat factor-name → value map with order-independent identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextFactors {
    factors: BTreeMap<FactorName, String>,
}

impl ContextFactors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (name, value) pairs, validating each
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut factors = Self::new();
        for (name, value) in pairs {
            factors.insert(FactorName::new(name)?, value.into())?;
        }
        Ok(factors)
    }

    pub fn insert(&mut self, name: FactorName, value: String) -> Result<()> {
        validate_factor_value(&value).map_err(|e| MemoryError::InvalidInput {
            field: format!("factor '{name}'"),
            reason: e.to_string(),
        })?;

        if !self.factors.contains_key(&name) && self.factors.len() >= MAX_FACTORS_PER_CONTEXT {
            return Err(MemoryError::InvalidInput {
                field: "context_factors".to_string(),
                reason: format!("too many factors (max: {MAX_FACTORS_PER_CONTEXT})"),
            });
        }

        self.factors.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.factors
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FactorName, &String)> {
        self.factors.iter()
    }

    /// Merge with another factor map. `override_existing=true` means the
    /// other map's values win on key collision.
    pub fn merge(&self, other: &ContextFactors, override_existing: bool) -> ContextFactors {
        let mut merged = self.factors.clone();
        for (name, value) in &other.factors {
            if override_existing || !merged.contains_key(name) {
                merged.insert(name.clone(), value.clone());
            }
        }
        ContextFactors { factors: merged }
    }

    /// Deterministic serialization for the embedding service: factors sorted
    /// by key, rendered as `key: value` joined by `, `.
    pub fn to_embedding_text(&self) -> String {
        self.factors
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Canonical JSON (keys sorted) used for cache-key hashing
    pub fn canonical_json(&self) -> String {
        // BTreeMap serializes in key order, so this is already canonical.
        serde_json::to_string(&self.factors).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A captured context snapshot under which preferences were learned
///
/// Immutable once embedded: situations are created and linked, never
/// updated, and garbage-collected only when no preferences point at them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Situation {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub factors: ContextFactors,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Situation {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, factors: ContextFactors) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            factors,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }
}
