//! TurnScheduler - drives one session from the user's request to a terminal status
//!
//! Each iteration selects an actor, executes its turn through the completion
//! cache and provider, and appends the resulting message. Turn failures are
//! recorded in the log and never end the session; cancellation, selection
//! termination, registry misses and a panicking provider do. Whatever the exit
//! path, the session is finalized exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use shared_types::{Message, SessionId, SessionOutcome, SessionStatus, TerminationReason};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actors::conductor::events;
use crate::actors::conductor::policy::{Selection, SelectionPolicy};
use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::registry::SharedActorRegistry;
use crate::actors::conductor::runtime::turn::{panic_message, TurnOutcome};
use crate::actors::conductor::state::{SchedulerPhase, SessionCounters};
use crate::actors::conductor::workers::{SharedTranscriptSink, SharedTurnObserver, TranscriptHandle};
use crate::cache::SharedCompletionCache;
use crate::config::{RoutingConfig, SchedulerConfig};
use crate::conversation::ConversationLog;

/// Everything a scheduler needs, supplied at construction
#[derive(Clone)]
pub struct SchedulerArguments {
    pub session_id: SessionId,
    pub request: String,
    pub registry: SharedActorRegistry,
    pub routing: RoutingConfig,
    pub config: SchedulerConfig,
    pub cache: SharedCompletionCache,
    pub sink: SharedTranscriptSink,
    pub observer: Option<SharedTurnObserver>,
}

impl SchedulerArguments {
    pub fn new(
        request: impl Into<String>,
        registry: SharedActorRegistry,
        cache: SharedCompletionCache,
        sink: SharedTranscriptSink,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            request: request.into(),
            registry,
            routing: RoutingConfig::default(),
            config: SchedulerConfig::default(),
            cache,
            sink,
            observer: None,
        }
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: SharedTurnObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Result of a finished session.
///
/// The transcript and status are always present; a failed save only shows up
/// in `persistence`.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub transcript: Arc<[Message]>,
    pub outcome: SessionOutcome,
    pub error: Option<ConductorError>,
    pub persistence: Result<TranscriptHandle, ConductorError>,
}

impl SessionReport {
    /// Collapse into the first hard error (session error, then persistence).
    pub fn into_result(self) -> Result<TranscriptHandle, ConductorError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.persistence
    }

    /// Messages produced by actors, in order.
    pub fn actor_messages(&self) -> impl Iterator<Item = &Message> {
        self.transcript
            .iter()
            .filter(|message| message.actor_name.is_some())
    }
}

/// How the loop ended, before finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Terminated(TerminationReason),
    Cancelled,
}

pub struct TurnScheduler {
    pub(crate) session_id: SessionId,
    pub(crate) request: String,
    pub(crate) registry: SharedActorRegistry,
    pub(crate) policy: SelectionPolicy,
    pub(crate) cache: SharedCompletionCache,
    pub(crate) sink: SharedTranscriptSink,
    pub(crate) observer: Option<SharedTurnObserver>,
    pub(crate) log: ConversationLog,
    pub(crate) counters: SessionCounters,
    pub(crate) phase: SchedulerPhase,
    pub(crate) cancel: CancellationToken,
    pub(crate) started_at: Instant,
}

impl TurnScheduler {
    /// Validate routing against the registry and build an idle scheduler.
    pub fn new(args: SchedulerArguments) -> Result<Self, ConductorError> {
        let policy = SelectionPolicy::new(&args.routing, &args.config, args.registry.clone())?;
        Ok(Self {
            session_id: args.session_id,
            request: args.request,
            registry: args.registry,
            policy,
            cache: args.cache,
            sink: args.sink,
            observer: args.observer,
            log: ConversationLog::new(args.config.max_log_length),
            counters: SessionCounters::default(),
            phase: SchedulerPhase::Init,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Token that cancels this session when triggered. The in-flight turn is
    /// discarded and the session finishes as `Cancelled`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session to completion on a tokio task.
    pub fn spawn(self) -> SchedulerHandle {
        let session_id = self.session_id.clone();
        let cancel = self.cancel_token();
        let join = tokio::spawn(self.run());
        SchedulerHandle {
            session_id,
            cancel,
            join,
        }
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> SessionReport {
        self.started_at = Instant::now();
        events::emit_session_started(
            self.session_id.as_str(),
            &self.request,
            self.registry.len(),
        );
        self.log.append(Message::user(self.request.clone()));

        // A panicking provider or stream must not skip finalization.
        let end = match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(end) => end,
            Err(panic) => Err(ConductorError::SessionAborted(panic_message(panic.as_ref()))),
        };
        self.finalize(end).await
    }

    async fn drive(&mut self) -> Result<SessionEnd, ConductorError> {
        self.phase.advance(SchedulerPhase::Selecting)?;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }

            let (name, rule) = match self.policy.select(&self.log, &self.counters) {
                Selection::Terminate(reason) => return Ok(SessionEnd::Terminated(reason)),
                Selection::Actor { name, rule } => (name, rule),
            };
            let turn = self.counters.turn_count + 1;
            events::emit_turn_selected(self.session_id.as_str(), turn, &name, rule);

            self.phase.advance(SchedulerPhase::Executing)?;
            let actor = self
                .registry
                .get(&name)
                .cloned()
                .ok_or_else(|| ConductorError::UnknownActor(name.clone()))?;

            let message = match self.execute_turn(&actor, turn).await {
                TurnOutcome::Completed(message) => message,
                TurnOutcome::Cancelled => {
                    tracing::info!(
                        session_id = %self.session_id,
                        turn,
                        actor = %actor.identity.name,
                        "Discarding in-flight turn after cancellation"
                    );
                    return Ok(SessionEnd::Cancelled);
                }
            };

            self.phase.advance(SchedulerPhase::Appending)?;
            let chars = message.content.chars().count();
            let evicted = self.log.append(message.clone());
            self.counters.record_turn(&actor.identity.name);
            self.notify_finished(&message);
            events::emit_turn_appended(
                self.session_id.as_str(),
                turn,
                &actor.identity.name,
                chars,
                evicted,
            );

            self.phase.advance(SchedulerPhase::Selecting)?;
        }
    }
}

/// Handle to a session running on its own task
#[derive(Debug)]
pub struct SchedulerHandle {
    session_id: SessionId,
    cancel: CancellationToken,
    join: JoinHandle<SessionReport>,
}

impl SchedulerHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<SessionReport, ConductorError> {
        self.join
            .await
            .map_err(|e| ConductorError::SessionAborted(e.to_string()))
    }
}
