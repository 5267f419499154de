//! Agent registry and passive learning
//!
//! The registry owns the per-user agent instances for the lifetime of the
//! process: created at service start, handed out on demand, torn down at
//! shutdown. It is injected wherever agents are needed; there is no ambient
//! global state.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::agent::PreferenceAgent;
use crate::config::Config;
use crate::errors::{Result, ValidationErrorExt};
use crate::llm::LanguageModel;
use crate::situations::SituationStore;
use crate::store::{GraphStore, PreferenceCache};
use crate::validation::validate_user_id;

pub struct AgentRegistry {
    config: Config,
    llm: Arc<dyn LanguageModel>,
    graph: Arc<dyn GraphStore>,
    cache: Arc<dyn PreferenceCache>,
    situations: Arc<SituationStore>,
    agents: DashMap<String, Arc<PreferenceAgent>>,
}

impl AgentRegistry {
    pub fn new(
        config: Config,
        llm: Arc<dyn LanguageModel>,
        graph: Arc<dyn GraphStore>,
        cache: Arc<dyn PreferenceCache>,
        situations: Arc<SituationStore>,
    ) -> Self {
        Self {
            config,
            llm,
            graph,
            cache,
            situations,
            agents: DashMap::new(),
        }
    }

    /// Fetch the agent for a user, creating it on first access.
    ///
    /// Always returns the registered instance: the entry lock makes
    /// concurrent first accesses for the same user converge on one agent,
    /// so no caller is left holding a twin with its own mirror and
    /// pending queue.
    pub fn get_or_create(&self, user_id: &str) -> Result<Arc<PreferenceAgent>> {
        validate_user_id(user_id).map_validation_err("user_id")?;

        if let Some(agent) = self.agents.get(user_id) {
            return Ok(agent.clone());
        }

        let agent = self
            .agents
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user = user_id, "Agent created");
                Arc::new(PreferenceAgent::new(
                    user_id.to_string(),
                    self.config.clone(),
                    self.llm.clone(),
                    self.graph.clone(),
                    self.cache.clone(),
                    self.situations.clone(),
                ))
            })
            .clone();
        Ok(agent)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Drop a user's agent; the next access recreates it from storage
    pub fn evict(&self, user_id: &str) -> bool {
        self.agents.remove(user_id).is_some()
    }

    /// Release every agent. Pending in-memory state is dropped; persisted
    /// records are unaffected.
    pub fn shutdown(&self) {
        let count = self.agents.len();
        self.agents.clear();
        info!(agents = count, "Registry shut down");
    }
}

/// Sink for failures of background learning tasks
pub trait FailureSink: Send + Sync {
    fn record(&self, user_id: &str, error: &crate::errors::MemoryError);
}

/// Default sink: failures go to the log and nowhere else
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn record(&self, user_id: &str, error: &crate::errors::MemoryError) {
        warn!(user = user_id, code = error.code(), "Passive learning failed: {error}");
    }
}

/// Fire-and-forget background learning triggered by context retrievals.
///
/// Spawned tasks are not awaited and have no cancellation hook; their
/// failures reach the sink and are never surfaced to the triggering caller.
pub struct PassiveLearner {
    registry: Arc<AgentRegistry>,
    sink: Arc<dyn FailureSink>,
}

impl PassiveLearner {
    pub fn new(registry: Arc<AgentRegistry>, sink: Arc<dyn FailureSink>) -> Self {
        Self { registry, sink }
    }

    /// Kick off a learning pass for the query in the background
    pub fn spawn(&self, user_id: &str, query: &str) {
        let registry = self.registry.clone();
        let sink = self.sink.clone();
        let user_id = user_id.to_string();
        let query = query.to_string();

        tokio::spawn(async move {
            let agent = match registry.get_or_create(&user_id) {
                Ok(agent) => agent,
                Err(e) => {
                    sink.record(&user_id, &e);
                    return;
                }
            };
            match agent.learn(&query).await {
                Ok(outcome) => {
                    debug!(
                        user = %user_id,
                        learned = outcome.learned.len(),
                        "Passive learning pass complete"
                    );
                }
                Err(e) => sink.record(&user_id, &e),
            }
        });
    }
}
