use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::Message;

use crate::actors::conductor::events;
use crate::actors::conductor::registry::{ActorIdentity, RegisteredActor};
use crate::actors::conductor::scheduler::TurnScheduler;
use crate::actors::conductor::workers::CompletionChunk;
use crate::cache::Fingerprint;

/// Payload stored in the completion cache for one finished turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct CachedCompletion {
    pub actor: String,
    pub content: String,
}

pub(crate) enum TurnOutcome {
    /// A message to append. Failed turns are completed turns too, with a
    /// failure-marked message.
    Completed(Message),
    Cancelled,
}

enum StreamOutcome {
    Finished(String),
    Failed(String),
    Cancelled,
}

/// Cache key for `actor` acting on `history`.
///
/// The prompt is the serialized `(role, actor, content)` history; timestamps
/// are left out so identical conversations hit the same entry.
pub(crate) fn turn_fingerprint<'a>(
    actor: &ActorIdentity,
    history: impl Iterator<Item = &'a Message>,
) -> Fingerprint {
    let entries: Vec<Value> = history
        .map(|message| {
            serde_json::json!({
                "role": message.role.as_str(),
                "actor": message.actor_name,
                "content": message.content,
            })
        })
        .collect();
    let prompt = Value::Array(entries).to_string();

    let mut context = BTreeMap::new();
    context.insert("actor".to_string(), Value::String(actor.name.clone()));
    context.insert(
        "role".to_string(),
        Value::String(actor.role.as_str().to_string()),
    );
    Fingerprint::compute(&prompt, &context)
}

impl TurnScheduler {
    pub(crate) async fn execute_turn(&self, actor: &RegisteredActor, turn: u32) -> TurnOutcome {
        let identity = &actor.identity;
        let session_id = self.session_id.as_str();
        let fingerprint = turn_fingerprint(identity, self.log.iter());
        let key = fingerprint.to_hex();

        if let Some(content) = self.cached_reply(&fingerprint, identity) {
            events::emit_cache_hit(session_id, turn, &identity.name, &key);
            self.notify_started(identity, true);
            self.forward_fragment(&identity.name, &content);
            return TurnOutcome::Completed(Message::actor(identity.role, &identity.name, content));
        }

        self.notify_started(identity, false);
        events::emit_turn_dispatched(session_id, turn, &identity.name, &key);

        let history = self.log.snapshot();
        match self.stream_completion(actor, &history).await {
            StreamOutcome::Finished(content) => {
                let cached = CachedCompletion {
                    actor: identity.name.clone(),
                    content: content.clone(),
                };
                match serde_json::to_value(&cached) {
                    Ok(payload) => self.cache.set_default(fingerprint, payload),
                    Err(e) => tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to encode completion for cache"
                    ),
                }
                TurnOutcome::Completed(Message::actor(identity.role, &identity.name, content))
            }
            StreamOutcome::Failed(reason) => {
                events::emit_turn_failed(session_id, turn, &identity.name, &reason);
                TurnOutcome::Completed(Message::failure(identity.role, &identity.name, &reason))
            }
            StreamOutcome::Cancelled => TurnOutcome::Cancelled,
        }
    }

    /// Cached reply for `fingerprint`, if present and readable. Unreadable
    /// entries are dropped from the cache.
    fn cached_reply(&self, fingerprint: &Fingerprint, actor: &ActorIdentity) -> Option<String> {
        let payload = self.cache.get(fingerprint)?;
        match serde_json::from_value::<CachedCompletion>(payload) {
            Ok(cached) if cached.actor.eq_ignore_ascii_case(&actor.name) => Some(cached.content),
            Ok(cached) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    expected = %actor.name,
                    found = %cached.actor,
                    "Cache entry belongs to another actor; discarding"
                );
                self.cache.invalidate(fingerprint);
                None
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "Unreadable cache entry; discarding"
                );
                self.cache.invalidate(fingerprint);
                None
            }
        }
    }

    async fn stream_completion(
        &self,
        actor: &RegisteredActor,
        history: &[Message],
    ) -> StreamOutcome {
        let name = actor.identity.name.as_str();

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
            opened = actor.provider.invoke(&actor.identity, history) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return StreamOutcome::Failed(e.to_string()),
        };

        let mut content = String::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(CompletionChunk::Started) => {}
                Some(CompletionChunk::Fragment(text)) => {
                    self.forward_fragment(name, &text);
                    content.push_str(&text);
                }
                Some(CompletionChunk::Failed(reason)) => return StreamOutcome::Failed(reason),
                Some(CompletionChunk::Finished) | None => return StreamOutcome::Finished(content),
            }
        }
    }

    fn notify_started(&self, actor: &ActorIdentity, cached: bool) {
        if let Some(observer) = &self.observer {
            let delivered =
                catch_unwind(AssertUnwindSafe(|| observer.on_turn_started(actor, cached)));
            if let Err(panic) = delivered {
                self.observer_panicked(&actor.name, "turn_started", panic.as_ref());
            }
        }
    }

    fn forward_fragment(&self, actor: &str, text: &str) {
        let Some(observer) = &self.observer else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| observer.on_fragment(actor, text))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(
                session_id = %self.session_id,
                actor = %actor,
                error = %e,
                "Observer rejected fragment"
            ),
            Err(panic) => self.observer_panicked(actor, "fragment", panic.as_ref()),
        }
    }

    pub(crate) fn notify_finished(&self, message: &Message) {
        if let Some(observer) = &self.observer {
            let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_turn_finished(message)));
            if let Err(panic) = delivered {
                let actor = message.actor_name.as_deref().unwrap_or_default();
                self.observer_panicked(actor, "turn_finished", panic.as_ref());
            }
        }
    }

    fn observer_panicked(&self, actor: &str, callback: &str, panic: &(dyn Any + Send)) {
        tracing::debug!(
            session_id = %self.session_id,
            actor = %actor,
            callback,
            error = %panic_message(panic),
            "Observer panicked; ignoring"
        );
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
