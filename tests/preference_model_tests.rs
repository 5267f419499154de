//! Accept/reject state transitions through the agent surface

use std::sync::Arc;

use ruchi_memory::agent::PreferenceAgent;
use ruchi_memory::config::{Config, RetryConfig};
use ruchi_memory::embedding::EmbeddingService;
use ruchi_memory::llm::testing::MockLanguageModel;
use ruchi_memory::llm::LanguageModel;
use ruchi_memory::preference::{PreferenceKey, PreferenceRecord, Sentiment};
use ruchi_memory::situations::SituationStore;
use ruchi_memory::store::cache::InMemoryCache;
use ruchi_memory::store::graph::InMemoryGraphStore;
use ruchi_memory::store::vector::InMemoryVectorStore;
use ruchi_memory::store::GraphStore;
use ruchi_memory::uuid::Uuid;

fn test_config() -> Config {
    let mut config = Config::default();
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
    };
    config
}

fn agent_with(llm: MockLanguageModel) -> (PreferenceAgent, Arc<InMemoryGraphStore>) {
    let llm: Arc<MockLanguageModel> = Arc::new(llm);
    let graph = Arc::new(InMemoryGraphStore::new());
    let vector = Arc::new(InMemoryVectorStore::new());
    let situations = Arc::new(SituationStore::new(
        graph.clone(),
        vector,
        EmbeddingService::new(llm.clone() as Arc<dyn LanguageModel>, 3),
    ));
    let agent = PreferenceAgent::new(
        "alice".to_string(),
        test_config(),
        llm as Arc<dyn LanguageModel>,
        graph.clone(),
        Arc::new(InMemoryCache::new()),
        situations,
    );
    (agent, graph)
}

async fn seed(graph: &InMemoryGraphStore, key: &str, sentiment: Sentiment, confidence: f32) -> Uuid {
    let record = PreferenceRecord::new(
        PreferenceKey::new(key).unwrap(),
        format!("about {key}"),
        sentiment,
        confidence,
    )
    .unwrap();
    graph
        .upsert_preference("default-tenant", "alice", &record)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_acceptance_raises_confidence() {
    let (agent, graph) = agent_with(MockLanguageModel::new());
    let id = seed(&graph, "food.coffee", Sentiment::Positive, 0.5).await;

    let new_confidence = agent.record_interaction(id, true).await.unwrap();
    assert_eq!(new_confidence, Some(0.6));
}

#[tokio::test]
async fn test_acceptance_clamps_at_cap() {
    let (agent, graph) = agent_with(MockLanguageModel::new());
    let id = seed(&graph, "food.coffee", Sentiment::Positive, 0.9).await;

    assert_eq!(agent.record_interaction(id, true).await.unwrap(), Some(0.95));
    assert_eq!(agent.record_interaction(id, true).await.unwrap(), Some(0.95));
}

#[tokio::test]
async fn test_rejection_lowers_confidence() {
    let (agent, graph) = agent_with(MockLanguageModel::new());
    let id = seed(&graph, "food.coffee", Sentiment::Positive, 0.5).await;

    let new_confidence = agent.record_interaction(id, false).await.unwrap().unwrap();
    assert!((new_confidence - 0.35).abs() < 1e-6);
}

#[tokio::test]
async fn test_rejection_to_zero_deletes_record() {
    let (agent, graph) = agent_with(MockLanguageModel::new());
    let id = seed(&graph, "food.coffee", Sentiment::Positive, 0.1).await;

    assert_eq!(agent.record_interaction(id, false).await.unwrap(), None);

    // Gone from storage, not retained at zero
    let remaining = graph.get_preferences("default-tenant", "alice").await.unwrap();
    assert!(remaining.is_empty());
    assert!(agent.get_preferences(None, 0.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_confidence_stays_in_bounds_over_many_interactions() {
    let (agent, graph) = agent_with(MockLanguageModel::new());
    let id = seed(&graph, "food.coffee", Sentiment::Positive, 0.5).await;

    for _ in 0..10 {
        let confidence = agent.record_interaction(id, true).await.unwrap().unwrap();
        assert!((0.0..=0.95).contains(&confidence));
    }
}

#[tokio::test]
async fn test_unknown_preference_id_is_not_found() {
    let (agent, _graph) = agent_with(MockLanguageModel::new());

    let err = agent
        .record_interaction(Uuid::new_v4(), true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PREFERENCE_NOT_FOUND");
}

#[tokio::test]
async fn test_interaction_invalidates_cache() {
    let (agent, graph) = agent_with(MockLanguageModel::new());
    let id = seed(&graph, "food.coffee", Sentiment::Positive, 0.5).await;

    // Prime the cache
    let before = agent.get_preferences(None, 0.0).await.unwrap();
    assert_eq!(before[0].confidence, 0.5);

    agent.record_interaction(id, true).await.unwrap();

    // A stale cache entry would still report 0.5 here
    let after = agent.get_preferences(None, 0.0).await.unwrap();
    assert_eq!(after[0].confidence, 0.6);
}
