//! TTL cache and the cache-key scheme
//!
//! Keys follow `prefs:{tenant}:{user}` and
//! `context:{tenant}:{user}:{digest}` where the digest is the first 16 hex
//! chars of sha256 over the canonical (key-sorted) JSON of the factors, so
//! the same context hashes identically under any key-order permutation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::constants::CONTEXT_KEY_HASH_LEN;
use crate::context::ContextFactors;
use crate::errors::Result;
use crate::store::PreferenceCache;

/// Cache key for a user's preference list
pub fn prefs_key(tenant_id: &str, user_id: &str) -> String {
    format!("prefs:{tenant_id}:{user_id}")
}

/// Cache key for a context-retrieval result
pub fn context_key(tenant_id: &str, user_id: &str, factors: &ContextFactors) -> String {
    let digest = Sha256::digest(factors.canonical_json().as_bytes());
    let hex: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(CONTEXT_KEY_HASH_LEN)
        .collect();
    format!("context:{tenant_id}:{user_id}:{hex}")
}

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // Expired entries are dropped lazily on read
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.entries.write().remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
