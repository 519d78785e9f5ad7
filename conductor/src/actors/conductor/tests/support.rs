use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shared_types::{ActorRole, Message, SessionOutcome};

use crate::actors::conductor::{
    ActorRegistry, ActorSpec, ConductorError, SchedulerArguments, ScriptedProvider,
    SharedActorRegistry, TranscriptHandle, TranscriptSink,
};
use crate::cache::{CompletionCache, SharedCompletionCache};
use crate::config::{CacheConfig, KeywordRoute, RoutingConfig, SchedulerConfig, SequenceStep};

/// One `save_session` call as seen by the sink
#[derive(Debug, Clone)]
pub(crate) struct SavedSession {
    pub session_id: String,
    pub original_request: String,
    pub log: Vec<Message>,
    pub outcome: SessionOutcome,
}

/// Sink that records every save, optionally failing all of them.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    saved: Mutex<Vec<SavedSession>>,
    fail_with: Option<String>,
}

impl RecordingSink {
    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail_with: Some(reason.to_string()),
        }
    }

    pub(crate) fn saved(&self) -> Vec<SavedSession> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn save_session(
        &self,
        session_id: &str,
        original_request: &str,
        log: &[Message],
        outcome: &SessionOutcome,
    ) -> Result<TranscriptHandle, ConductorError> {
        self.saved.lock().unwrap().push(SavedSession {
            session_id: session_id.to_string(),
            original_request: original_request.to_string(),
            log: log.to_vec(),
            outcome: outcome.clone(),
        });
        if let Some(reason) = &self.fail_with {
            return Err(ConductorError::Persistence(reason.clone()));
        }
        Ok(TranscriptHandle {
            session_id: session_id.to_string(),
            location: format!("test://{session_id}"),
        })
    }
}

pub(crate) fn test_cache() -> SharedCompletionCache {
    Arc::new(CompletionCache::new(&CacheConfig {
        max_size: 64,
        default_ttl: Duration::from_secs(300),
        sweep_interval: Duration::from_secs(60),
    }))
}

/// planner (manager), coder and reviewer (workers), all served by `provider`.
pub(crate) fn team(provider: Arc<ScriptedProvider>) -> SharedActorRegistry {
    Arc::new(
        ActorRegistry::new(vec![
            ActorSpec::new("planner", ActorRole::Manager, provider.clone()),
            ActorSpec::new("coder", ActorRole::Worker, provider.clone()),
            ActorSpec::new("reviewer", ActorRole::Worker, provider),
        ])
        .unwrap(),
    )
}

/// planner opens, then planner -> coder -> reviewer; "review" routes to reviewer.
pub(crate) fn pipeline_routing() -> RoutingConfig {
    RoutingConfig {
        default_actor: Some("planner".to_string()),
        keyword_routes: vec![KeywordRoute {
            actor: "reviewer".to_string(),
            keywords: vec!["review".to_string()],
        }],
        sequence: vec![
            SequenceStep {
                from: "planner".to_string(),
                to: "coder".to_string(),
            },
            SequenceStep {
                from: "coder".to_string(),
                to: "reviewer".to_string(),
            },
        ],
    }
}

pub(crate) fn scheduler_config(max_turns: u32, max_consecutive: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_turns,
        max_consecutive,
        ..SchedulerConfig::default()
    }
}

pub(crate) fn session_args(
    request: &str,
    provider: Arc<ScriptedProvider>,
    cache: SharedCompletionCache,
    sink: Arc<RecordingSink>,
) -> SchedulerArguments {
    SchedulerArguments::new(request, team(provider), cache, sink)
        .with_routing(pipeline_routing())
        .with_config(scheduler_config(10, 3))
}

/// Names of the actors that took a turn, in order.
pub(crate) fn speakers(transcript: &[Message]) -> Vec<&str> {
    transcript
        .iter()
        .filter_map(|message| message.actor_name.as_deref())
        .collect()
}
