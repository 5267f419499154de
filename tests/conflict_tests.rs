//! Direct and semantic conflict behavior through the learn path

use std::sync::Arc;

use ruchi_memory::agent::PreferenceAgent;
use ruchi_memory::config::{Config, RetryConfig};
use ruchi_memory::conflict::ConflictKind;
use ruchi_memory::embedding::EmbeddingService;
use ruchi_memory::llm::testing::MockLanguageModel;
use ruchi_memory::llm::LanguageModel;
use ruchi_memory::preference::{PreferenceKey, PreferenceRecord, Sentiment};
use ruchi_memory::situations::SituationStore;
use ruchi_memory::store::cache::InMemoryCache;
use ruchi_memory::store::graph::InMemoryGraphStore;
use ruchi_memory::store::vector::InMemoryVectorStore;
use ruchi_memory::store::GraphStore;

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

async fn seed(graph: &InMemoryGraphStore, key: &str, sentiment: Sentiment, confidence: f32) {
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
        .unwrap();
}

fn extraction(key: &str, sentiment: &str, confidence: f32) -> String {
    format!(
        r#"{{"preferences": [{{"key": "{key}", "value": "about {key}", "sentiment": "{sentiment}", "confidence": {confidence}}}]}}"#
    )
}

#[tokio::test]
async fn test_direct_conflict_leaves_existing_untouched() {
    // Existing positive food.coffee at 0.7; a negative extraction at 0.8
    // must not overwrite it.
    let llm = MockLanguageModel::new().with_completion(extraction("food.coffee", "negative", 0.8));
    let (agent, graph) = agent_with(llm);
    seed(&graph, "food.coffee", Sentiment::Positive, 0.7).await;

    let outcome = agent.learn("coffee is awful actually").await.unwrap();

    assert!(outcome.learned.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::Direct);
    assert_eq!(conflict.key, "food.coffee");
    assert_eq!(conflict.old_sentiment, Sentiment::Positive);
    assert_eq!(conflict.new_sentiment, Sentiment::Negative);

    let stored = graph.get_preferences("default-tenant", "alice").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sentiment, Sentiment::Positive);
    assert!((stored[0].confidence - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_semantic_conflict_reports_general_key() {
    // Existing negative food.coffee; new positive food.espresso. The
    // relatedness check names food.coffee as the general key.
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.espresso", "positive", 0.7))
        .with_completion("food.coffee");
    let (agent, graph) = agent_with(llm);
    seed(&graph, "food.coffee", Sentiment::Negative, 0.6).await;

    let outcome = agent.learn("espresso is wonderful").await.unwrap();

    assert!(outcome.learned.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::Semantic);
    assert_eq!(conflict.key, "food.coffee");
    assert_eq!(conflict.candidate_key, "food.espresso");

    // The held candidate was never written
    let stored = graph.get_preferences("default-tenant", "alice").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key.as_str(), "food.coffee");
}

#[tokio::test]
async fn test_unrelated_keys_coexist() {
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.espresso", "positive", 0.7))
        .with_completion("none")
        .with_completion(r#"{"context_factors": {}, "confidence": 0.0, "explanation": ""}"#)
        .with_default_embedding(vec![0.1, 0.2, 0.3]);
    let (agent, graph) = agent_with(llm);
    seed(&graph, "food.sushi", Sentiment::Negative, 0.6).await;

    let outcome = agent.learn("espresso is wonderful").await.unwrap();

    assert_eq!(outcome.learned.len(), 1);
    assert!(outcome.conflicts.is_empty());
    let stored = graph.get_preferences("default-tenant", "alice").await.unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_exception_record_never_conflicts() {
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.espresso", "positive", 0.7))
        .with_completion(r#"{"context_factors": {}, "confidence": 0.0, "explanation": ""}"#)
        .with_default_embedding(vec![0.1, 0.2, 0.3]);
    let (agent, graph) = agent_with(llm);

    let mut pinned = PreferenceRecord::new(
        PreferenceKey::new("food.coffee").unwrap(),
        "dislikes coffee",
        Sentiment::Negative,
        0.6,
    )
    .unwrap();
    pinned.is_exception = true;
    graph
        .upsert_preference("default-tenant", "alice", &pinned)
        .await
        .unwrap();

    // No relatedness completion is scripted: the exception is skipped
    // without any relatedness call, and the new preference lands.
    let outcome = agent.learn("espresso is wonderful").await.unwrap();
    assert_eq!(outcome.learned.len(), 1);
    assert!(outcome.conflicts.is_empty());
}

#[tokio::test]
async fn test_same_sentiment_higher_confidence_replaces() {
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.coffee", "positive", 0.8))
        .with_completion(r#"{"context_factors": {}, "confidence": 0.0, "explanation": ""}"#)
        .with_default_embedding(vec![0.1, 0.2, 0.3]);
    let (agent, graph) = agent_with(llm);
    seed(&graph, "food.coffee", Sentiment::Positive, 0.5).await;

    let outcome = agent.learn("I really do love coffee").await.unwrap();
    assert_eq!(outcome.learned.len(), 1);

    let stored = graph.get_preferences("default-tenant", "alice").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!((stored[0].confidence - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn test_same_sentiment_lower_confidence_keeps_existing() {
    let llm = MockLanguageModel::new().with_completion(extraction("food.coffee", "positive", 0.4));
    let (agent, graph) = agent_with(llm);
    seed(&graph, "food.coffee", Sentiment::Positive, 0.7).await;

    let outcome = agent.learn("coffee is fine I guess").await.unwrap();
    assert!(outcome.learned.is_empty());
    assert!(outcome.conflicts.is_empty());

    let stored = graph.get_preferences("default-tenant", "alice").await.unwrap();
    assert!((stored[0].confidence - 0.7).abs() < 1e-6);
}
