//! Context retrieval: pipeline, caching, graceful degradation

use std::sync::Arc;

use ruchi_memory::agent::{ContextOptions, PreferenceAgent};
use ruchi_memory::config::{Config, RetryConfig};
use ruchi_memory::embedding::EmbeddingService;
use ruchi_memory::llm::testing::MockLanguageModel;
use ruchi_memory::llm::LanguageModel;
use ruchi_memory::situations::SituationStore;
use ruchi_memory::store::cache::InMemoryCache;
use ruchi_memory::store::graph::InMemoryGraphStore;
use ruchi_memory::store::vector::InMemoryVectorStore;

struct Harness {
    agent: PreferenceAgent,
    llm: Arc<MockLanguageModel>,
    graph: Arc<InMemoryGraphStore>,
}

fn harness(llm: MockLanguageModel) -> Harness {
    let llm = Arc::new(llm);
    let graph = Arc::new(InMemoryGraphStore::new());
    let vector = Arc::new(InMemoryVectorStore::new());
    let situations = Arc::new(SituationStore::new(
        graph.clone(),
        vector,
        EmbeddingService::new(llm.clone() as Arc<dyn LanguageModel>, 3),
    ));

    let mut config = Config::default();
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
    };

    let agent = PreferenceAgent::new(
        "alice".to_string(),
        config,
        llm.clone() as Arc<dyn LanguageModel>,
        graph.clone(),
        Arc::new(InMemoryCache::new()),
        situations,
    );
    Harness { agent, llm, graph }
}

const CALM_CONTEXT: &str =
    r#"{"context_factors": {"mood": "calm"}, "confidence": 0.8, "explanation": ""}"#;

fn extraction(key: &str) -> String {
    format!(
        r#"{{"preferences": [{{"key": "{key}", "value": "about {key}", "sentiment": "positive", "confidence": 0.7}}]}}"#
    )
}

#[tokio::test]
async fn test_context_returns_linked_preferences_and_situations() {
    // Pass 1 (learn): extraction + context completion, default embedding.
    // Pass 2 (get_context): context completion, query embeds to the same
    // vector so the recorded situation matches with similarity 1.0.
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.cappuccino"))
        .with_completion(CALM_CONTEXT)
        .with_completion(CALM_CONTEXT)
        .with_default_embedding(vec![0.6, 0.8, 0.0]);
    let h = harness(llm);

    let outcome = h.agent.learn("cappuccino please").await.unwrap();
    assert_eq!(outcome.learned.len(), 1);
    assert!(outcome.situation.is_some());

    let response = h
        .agent
        .get_context("what should I drink", &ContextOptions::default())
        .await
        .unwrap();

    assert_eq!(response.situations.len(), 1);
    assert!(response.situations[0].score > 0.99);
    assert_eq!(response.preferences.len(), 1);
    assert_eq!(response.preferences[0].key.as_str(), "food.cappuccino");
    assert!(response.summary.contains("cappuccino"));
}

#[tokio::test]
async fn test_context_cache_short_circuits_retrieval() {
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.cappuccino"))
        .with_completion(CALM_CONTEXT)
        .with_completion(CALM_CONTEXT)
        .with_completion(CALM_CONTEXT)
        .with_default_embedding(vec![0.6, 0.8, 0.0]);
    let h = harness(llm);

    h.agent.learn("cappuccino please").await.unwrap();

    let first = h
        .agent
        .get_context("what should I drink", &ContextOptions::default())
        .await
        .unwrap();
    let embeds_after_first = h.llm.embedding_calls();

    // Same factors hash to the same cache key; the second call stops at the
    // cache without embedding the query again.
    let second = h
        .agent
        .get_context("what should I drink", &ContextOptions::default())
        .await
        .unwrap();

    assert_eq!(h.llm.embedding_calls(), embeds_after_first);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.preferences.len(), second.preferences.len());
}

#[tokio::test]
async fn test_pipeline_failure_degrades_to_unavailable() {
    // No scripted completions at all: the context pipeline fails, but the
    // call still succeeds with an unavailable-context response.
    let llm = MockLanguageModel::new();
    let h = harness(llm);

    let response = h
        .agent
        .get_context("anything", &ContextOptions::default())
        .await
        .unwrap();

    assert_eq!(response.summary, "relevant context unavailable");
    assert!(response.preferences.is_empty());
    assert!(response.situations.is_empty());
}

#[tokio::test]
async fn test_link_lookup_failure_degrades_to_unavailable() {
    // Retrieval finds a matching situation, but the lookup of its linked
    // preferences fails. That degrades like the earlier stages instead of
    // surfacing an error to the caller.
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.cappuccino"))
        .with_completion(CALM_CONTEXT)
        .with_completion(CALM_CONTEXT)
        .with_default_embedding(vec![0.6, 0.8, 0.0]);
    let h = harness(llm);

    h.agent.learn("cappuccino please").await.unwrap();

    h.graph.fail_next_link_lookup();
    let response = h
        .agent
        .get_context("what should I drink", &ContextOptions::default())
        .await
        .unwrap();

    assert_eq!(response.summary, "relevant context unavailable");
    assert!(response.preferences.is_empty());
    assert!(response.situations.is_empty());
}

#[tokio::test]
async fn test_no_matching_situations_falls_back_to_preference_list() {
    // A learned preference exists, but the query context embeds orthogonally
    // to the recorded situation, so no situation clears min_score. The
    // response falls back to the plain high-confidence preference list.
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.cappuccino"))
        .with_completion(CALM_CONTEXT)
        .with_embedding(vec![1.0, 0.0, 0.0])
        .with_completion(r#"{"context_factors": {"mood": "rushed"}, "confidence": 0.8, "explanation": ""}"#)
        .with_embedding(vec![0.0, 1.0, 0.0]);
    let h = harness(llm);

    h.agent.learn("cappuccino please").await.unwrap();

    let response = h
        .agent
        .get_context("completely different situation", &ContextOptions::default())
        .await
        .unwrap();

    assert!(response.situations.is_empty());
    assert_eq!(response.preferences.len(), 1);
    assert_eq!(response.preferences[0].key.as_str(), "food.cappuccino");
}

#[tokio::test]
async fn test_min_confidence_filters_linked_preferences() {
    let llm = MockLanguageModel::new()
        .with_completion(
            r#"{"preferences": [{"key": "food.cappuccino", "value": "weak hunch", "sentiment": "positive", "confidence": 0.3}]}"#,
        )
        .with_completion(CALM_CONTEXT)
        .with_completion(CALM_CONTEXT)
        .with_default_embedding(vec![0.6, 0.8, 0.0]);
    let h = harness(llm);

    h.agent.learn("maybe cappuccino").await.unwrap();

    // Default min_confidence of 0.5 excludes the 0.3-confidence record
    let response = h
        .agent
        .get_context("what should I drink", &ContextOptions::default())
        .await
        .unwrap();

    assert_eq!(response.situations.len(), 1);
    assert!(response.preferences.is_empty());
}

#[tokio::test]
async fn test_include_flags_control_response_shape() {
    let llm = MockLanguageModel::new()
        .with_completion(extraction("food.cappuccino"))
        .with_completion(CALM_CONTEXT)
        .with_completion(CALM_CONTEXT)
        .with_default_embedding(vec![0.6, 0.8, 0.0]);
    let h = harness(llm);

    h.agent.learn("cappuccino please").await.unwrap();

    let options = ContextOptions {
        include_preferences: false,
        include_situations: false,
        min_confidence: 0.5,
    };
    let response = h
        .agent
        .get_context("what should I drink", &options)
        .await
        .unwrap();

    assert!(response.preferences.is_empty());
    assert!(response.situations.is_empty());
}
