//! Collaborator contracts the scheduler drives each turn through.
//!
//! - [`CompletionProvider`]: produces an ordered fragment stream for one actor turn
//! - [`TurnObserver`]: receives fragments live, synchronously
//! - [`TranscriptSink`]: persists a finished session exactly once
//!
//! [`ScriptedProvider`] replays canned replies and backs the demo binary and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use shared_types::{Message, SessionOutcome};
use tokio::sync::mpsc;

use crate::actors::conductor::protocol::{ConductorError, ObserverError};
use crate::actors::conductor::registry::ActorIdentity;

// ─── Completion capability ───────────────────────────────────────────────────

/// One signal of a completion stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    Started,
    Fragment(String),
    Failed(String),
    Finished,
}

/// Ordered fragments closed by `Finished`, `Failed`, or the end of the stream.
pub type CompletionStream = BoxStream<'static, CompletionChunk>;

pub type SharedCompletionProvider = Arc<dyn CompletionProvider>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a completion stream for `actor` given the ordered history.
    /// An `Err` here is handled like a stream that failed immediately.
    async fn invoke(
        &self,
        actor: &ActorIdentity,
        history: &[Message],
    ) -> Result<CompletionStream, ConductorError>;
}

// ─── Observer ────────────────────────────────────────────────────────────────

pub type SharedTurnObserver = Arc<dyn TurnObserver>;

/// Live view of a session. Called inline by the scheduler; errors are logged
/// and otherwise ignored.
pub trait TurnObserver: Send + Sync {
    fn on_turn_started(&self, _actor: &ActorIdentity, _cached: bool) {}

    fn on_fragment(&self, actor_name: &str, fragment: &str) -> Result<(), ObserverError>;

    fn on_turn_finished(&self, _message: &Message) {}
}

/// Observer notifications forwarded over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    TurnStarted { actor: String, cached: bool },
    Fragment { actor: String, text: String },
    TurnFinished { actor: String, failed: bool },
}

/// Forwards observer callbacks to an unbounded channel (e.g. a UI task).
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TurnObserver for ChannelObserver {
    fn on_turn_started(&self, actor: &ActorIdentity, cached: bool) {
        let _ = self.tx.send(ObserverEvent::TurnStarted {
            actor: actor.name.clone(),
            cached,
        });
    }

    fn on_fragment(&self, actor_name: &str, fragment: &str) -> Result<(), ObserverError> {
        self.tx
            .send(ObserverEvent::Fragment {
                actor: actor_name.to_string(),
                text: fragment.to_string(),
            })
            .map_err(|_| ObserverError::Disconnected)
    }

    fn on_turn_finished(&self, message: &Message) {
        let _ = self.tx.send(ObserverEvent::TurnFinished {
            actor: message.actor_name.clone().unwrap_or_default(),
            failed: message.failed,
        });
    }
}

// ─── Persistence sink ────────────────────────────────────────────────────────

pub type SharedTranscriptSink = Arc<dyn TranscriptSink>;

/// Where a transcript ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptHandle {
    pub session_id: String,
    pub location: String,
}

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn save_session(
        &self,
        session_id: &str,
        original_request: &str,
        log: &[Message],
        outcome: &SessionOutcome,
    ) -> Result<TranscriptHandle, ConductorError>;
}

// ─── Scripted provider ───────────────────────────────────────────────────────

/// One canned reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Stream these fragments, then finish
    Text(Vec<String>),
    /// Stream these fragments, then fail with the message
    FailAfter(Vec<String>, String),
    /// Refuse to open a stream at all
    Refuse(String),
}

impl ScriptedReply {
    /// Split `text` into word-sized fragments (whitespace kept on the fragment).
    pub fn text(text: &str) -> Self {
        Self::Text(split_fragments(text))
    }
}

fn split_fragments(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if c.is_whitespace() {
            fragments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

/// Deterministic provider that replays queued replies per actor.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    fallback: Option<String>,
    fragment_delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text reply for `actor`.
    pub fn with_reply(self, actor: &str, text: &str) -> Self {
        self.push_reply(actor, ScriptedReply::text(text));
        self
    }

    /// Reply used once an actor's queue is empty.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Sleep between fragments, to exercise cancellation and interleaving.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    pub fn push_reply(&self, actor: &str, reply: ScriptedReply) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(actor.to_lowercase())
                .or_default()
                .push_back(reply);
        }
    }

    /// Number of `invoke` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, actor: &str) -> ScriptedReply {
        let queued = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(&actor.to_lowercase())?.pop_front());

        queued.unwrap_or_else(|| match &self.fallback {
            Some(text) => ScriptedReply::text(text),
            None => ScriptedReply::text(&format!("{actor} has nothing further to add.")),
        })
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn invoke(
        &self,
        actor: &ActorIdentity,
        _history: &[Message],
    ) -> Result<CompletionStream, ConductorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut chunks = vec![CompletionChunk::Started];
        match self.next_reply(&actor.name) {
            ScriptedReply::Text(fragments) => {
                chunks.extend(fragments.into_iter().map(CompletionChunk::Fragment));
                chunks.push(CompletionChunk::Finished);
            }
            ScriptedReply::FailAfter(fragments, error) => {
                chunks.extend(fragments.into_iter().map(CompletionChunk::Fragment));
                chunks.push(CompletionChunk::Failed(error));
            }
            ScriptedReply::Refuse(reason) => return Err(ConductorError::WorkerFailed(reason)),
        }

        let stream = stream::iter(chunks);
        Ok(match self.fragment_delay {
            Some(delay) => stream
                .then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    chunk
                })
                .boxed(),
            None => stream.boxed(),
        })
    }
}
