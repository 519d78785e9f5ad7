//! End-to-end session tests
//!
//! Drive full sessions through the public API: routing loaded from TOML,
//! scripted actors, the shared completion cache and the transcript store
//! actor writing JSON files to a temporary directory.

use std::sync::Arc;
use std::time::Duration;

use conductor::actors::conductor::{
    ActorRegistry, ActorSpec, ChannelObserver, ObserverEvent, SchedulerArguments,
    ScriptedProvider, TurnScheduler,
};
use conductor::actors::transcript_store::{TranscriptStoreArguments, TranscriptStoreHandle};
use conductor::cache::CompletionCache;
use conductor::config::{CacheConfig, RoutingConfig, SchedulerConfig};
use shared_types::{ActorRole, SessionStatus, TerminationReason};

// ============================================================================
// Test Helpers
// ============================================================================

const ROUTING: &str = r#"
default_actor = "planner"

[[keyword_routes]]
actor = "reviewer"
keywords = ["please review", "audit"]

[[keyword_routes]]
actor = "coder"
keywords = ["implement"]

[[sequence]]
from = "planner"
to = "coder"

[[sequence]]
from = "coder"
to = "reviewer"
"#;

fn registry(provider: Arc<ScriptedProvider>) -> Arc<ActorRegistry> {
    Arc::new(
        ActorRegistry::new(vec![
            ActorSpec::new("planner", ActorRole::Manager, provider.clone()),
            ActorSpec::new("coder", ActorRole::Worker, provider.clone()),
            ActorSpec::new("reviewer", ActorRole::Worker, provider),
        ])
        .unwrap(),
    )
}

fn cache() -> Arc<CompletionCache> {
    CompletionCache::shared(&CacheConfig::default())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_session_is_persisted_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _store_handle) =
        TranscriptStoreHandle::spawn(TranscriptStoreArguments::Directory(dir.path().into()))
            .await
            .unwrap();

    let provider = Arc::new(
        ScriptedProvider::new()
            .with_reply("planner", "Two steps: lexer, then parser. @coder go ahead.")
            .with_reply("coder", "Lexer done. Please review the token set.")
            .with_reply("reviewer", "Token set approved. TERMINATE"),
    );
    let args = SchedulerArguments::new(
        "Write a JSON parser",
        registry(provider.clone()),
        cache(),
        Arc::new(store.clone()),
    )
    .with_routing(RoutingConfig::from_toml_str(ROUTING).unwrap());

    let report = TurnScheduler::new(args).unwrap().run().await;
    assert_eq!(report.status, SessionStatus::Terminated);
    assert_eq!(
        report.outcome.termination,
        Some(TerminationReason::Marker("terminate".to_string()))
    );

    let handle = report.persistence.as_ref().unwrap();
    let file = dir.path().join(format!("{}.json", report.session_id));
    assert_eq!(handle.location, file.display().to_string());

    let raw = std::fs::read_to_string(&file).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["original_request"], "Write a JSON parser");
    assert_eq!(json["outcome"]["status"], "terminated");
    assert_eq!(json["messages"].as_array().unwrap().len(), 4);
    assert_eq!(json["messages"][1]["role"], "manager");
    assert_eq!(json["messages"][2]["actor_name"], "coder");

    let loaded = store
        .load(report.session_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.messages.as_slice(), &*report.transcript);
    assert_eq!(
        store.list().await.unwrap(),
        vec![report.session_id.to_string()]
    );

    store.stop();
}

#[tokio::test]
async fn test_keyword_routing_from_toml() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_reply("coder", "Implemented. Please review.")
            .with_reply("reviewer", "Audit passed. TERMINATE"),
    );
    let (store, _store_handle) = TranscriptStoreHandle::spawn(TranscriptStoreArguments::InMemory)
        .await
        .unwrap();

    let args = SchedulerArguments::new(
        "implement the retry loop",
        registry(provider),
        cache(),
        Arc::new(store.clone()),
    )
    .with_routing(RoutingConfig::from_toml_str(ROUTING).unwrap());

    let report = TurnScheduler::new(args).unwrap().run().await;

    let speakers: Vec<_> = report
        .actor_messages()
        .filter_map(|m| m.actor_name.clone())
        .collect();
    assert_eq!(speakers, vec!["coder", "reviewer"]);
    assert_eq!(report.status, SessionStatus::Terminated);

    store.stop();
}

#[tokio::test]
async fn test_spawned_session_can_be_cancelled() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_fallback("still thinking about the problem")
            .with_fragment_delay(Duration::from_millis(20)),
    );
    let (store, _store_handle) = TranscriptStoreHandle::spawn(TranscriptStoreArguments::InMemory)
        .await
        .unwrap();
    let (observer, mut events) = ChannelObserver::new();

    let args = SchedulerArguments::new(
        "think forever",
        registry(provider),
        cache(),
        Arc::new(store.clone()),
    )
    .with_routing(RoutingConfig::from_toml_str(ROUTING).unwrap())
    .with_config(SchedulerConfig {
        max_turns: 1000,
        max_consecutive: 1000,
        ..SchedulerConfig::default()
    })
    .with_observer(Arc::new(observer));

    let handle = TurnScheduler::new(args).unwrap().spawn();
    let session_id = handle.session_id().clone();

    // Wait until the first fragment arrives, then cancel.
    loop {
        match events.recv().await {
            Some(ObserverEvent::Fragment { .. }) => break,
            Some(_) => continue,
            None => panic!("session ended before streaming"),
        }
    }
    handle.cancel();
    let report = handle.join().await.unwrap();

    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(report.session_id, session_id);

    let stored = store.load(session_id.as_str()).await.unwrap().unwrap();
    assert_eq!(stored.outcome.status, SessionStatus::Cancelled);
    assert_eq!(stored.messages.len(), report.transcript.len());

    store.stop();
}
