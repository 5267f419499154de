//! In-memory graph store
//!
//! Nodes and links in process memory behind a single lock. Link direction is
//! preference → situation ("recorded-in"); the reverse index exists only as
//! a scan, which is fine at in-memory scale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::context::Situation;
use crate::errors::{MemoryError, Result};
use crate::preference::PreferenceRecord;
use crate::store::GraphStore;

#[derive(Default)]
struct GraphState {
    /// (tenant, preference id) → (user id, record)
    preferences: HashMap<(String, Uuid), (String, PreferenceRecord)>,
    /// (tenant, situation id) → situation
    situations: HashMap<(String, Uuid), Situation>,
    /// (tenant, preference id, situation id)
    links: Vec<(String, Uuid, Uuid)>,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    fail_next_link_lookup: AtomicBool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next linked-preference lookup fail, for exercising degraded reads
    pub fn fail_next_link_lookup(&self) {
        self.fail_next_link_lookup.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_preference(
        &self,
        tenant_id: &str,
        user_id: &str,
        record: &PreferenceRecord,
    ) -> Result<Uuid> {
        let id = record.id.unwrap_or_else(Uuid::new_v4);
        let mut stored = record.clone();
        stored.id = Some(id);

        let mut state = self.state.write();
        state.preferences.insert(
            (tenant_id.to_string(), id),
            (user_id.to_string(), stored),
        );
        debug!(%id, tenant = tenant_id, "Preference node upserted");
        Ok(id)
    }

    async fn get_preferences(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<PreferenceRecord>> {
        let state = self.state.read();
        Ok(state
            .preferences
            .iter()
            .filter(|((tenant, _), (user, _))| tenant == tenant_id && user == user_id)
            .map(|(_, (_, record))| record.clone())
            .collect())
    }

    async fn delete_preference(&self, tenant_id: &str, preference_id: Uuid) -> Result<bool> {
        let mut state = self.state.write();
        let removed = state
            .preferences
            .remove(&(tenant_id.to_string(), preference_id))
            .is_some();
        if removed {
            state
                .links
                .retain(|(tenant, pref, _)| !(tenant == tenant_id && *pref == preference_id));
        }
        Ok(removed)
    }

    async fn delete_all_preferences(&self, tenant_id: &str, user_id: &str) -> Result<usize> {
        let mut state = self.state.write();
        let doomed: Vec<Uuid> = state
            .preferences
            .iter()
            .filter(|((tenant, _), (user, _))| tenant == tenant_id && user == user_id)
            .map(|((_, id), _)| *id)
            .collect();

        for id in &doomed {
            state.preferences.remove(&(tenant_id.to_string(), *id));
        }
        state
            .links
            .retain(|(tenant, pref, _)| !(tenant == tenant_id && doomed.contains(pref)));

        Ok(doomed.len())
    }

    async fn create_situation(&self, situation: &Situation) -> Result<()> {
        let mut state = self.state.write();
        state.situations.insert(
            (situation.tenant_id.clone(), situation.id),
            situation.clone(),
        );
        debug!(id = %situation.id, tenant = %situation.tenant_id, "Situation node created");
        Ok(())
    }

    async fn delete_situation(&self, tenant_id: &str, situation_id: Uuid) -> Result<bool> {
        let mut state = self.state.write();
        let removed = state
            .situations
            .remove(&(tenant_id.to_string(), situation_id))
            .is_some();
        if removed {
            state
                .links
                .retain(|(tenant, _, sit)| !(tenant == tenant_id && *sit == situation_id));
        }
        Ok(removed)
    }

    async fn link_preference_to_situation(
        &self,
        tenant_id: &str,
        preference_id: Uuid,
        situation_id: Uuid,
    ) -> Result<()> {
        let mut state = self.state.write();

        if !state
            .preferences
            .contains_key(&(tenant_id.to_string(), preference_id))
        {
            return Err(MemoryError::PreferenceNotFound {
                tenant_id: tenant_id.to_string(),
                preference_id: preference_id.to_string(),
            });
        }
        if !state
            .situations
            .contains_key(&(tenant_id.to_string(), situation_id))
        {
            return Err(MemoryError::SituationNotFound {
                tenant_id: tenant_id.to_string(),
                situation_id: situation_id.to_string(),
            });
        }

        let link = (tenant_id.to_string(), preference_id, situation_id);
        if !state.links.contains(&link) {
            state.links.push(link);
        }
        Ok(())
    }

    async fn orphaned_situations(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Uuid>> {
        let state = self.state.read();
        Ok(state
            .situations
            .iter()
            .filter(|((tenant, id), situation)| {
                tenant == tenant_id
                    && situation.user_id == user_id
                    && !state
                        .links
                        .iter()
                        .any(|(t, _, sit)| t == tenant_id && sit == id)
            })
            .map(|((_, id), _)| *id)
            .collect())
    }

    async fn situations_for_preference(
        &self,
        tenant_id: &str,
        preference_id: Uuid,
    ) -> Result<Vec<Situation>> {
        let state = self.state.read();
        Ok(state
            .links
            .iter()
            .filter(|(tenant, pref, _)| tenant == tenant_id && *pref == preference_id)
            .filter_map(|(tenant, _, sit)| state.situations.get(&(tenant.clone(), *sit)))
            .cloned()
            .collect())
    }

    async fn preferences_for_situation(
        &self,
        tenant_id: &str,
        situation_id: Uuid,
    ) -> Result<Vec<PreferenceRecord>> {
        if self.fail_next_link_lookup.swap(false, Ordering::SeqCst) {
            return Err(MemoryError::StoreUnavailable {
                store: "graph".to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let state = self.state.read();
        Ok(state
            .links
            .iter()
            .filter(|(tenant, _, sit)| tenant == tenant_id && *sit == situation_id)
            .filter_map(|(tenant, pref, _)| state.preferences.get(&(tenant.clone(), *pref)))
            .map(|(_, record)| record.clone())
            .collect())
    }
}
