//! TurnScheduler - coordinates a conversation between registered actors
//!
//! The scheduler runs one session: it seeds the log with the user's request,
//! asks the [`SelectionPolicy`] who speaks next, runs that actor's turn through
//! the shared completion cache, appends the result and repeats until the
//! policy terminates the session or the caller cancels it.
//!
//! ## State Machine
//!
//! ```text
//! Init → Selecting → Executing → Appending → Selecting → …
//!            |           |
//!            v           v
//!        Finished(Completed | MaxTurns | Terminated | Error | Cancelled)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crate::actors::conductor::{SchedulerArguments, TurnScheduler};
//!
//! let args = SchedulerArguments::new(request, registry, cache, sink)
//!     .with_routing(routing)
//!     .with_config(config.scheduler.clone());
//!
//! let report = TurnScheduler::new(args)?.run().await;
//! ```

pub mod events;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod router;
mod runtime;
pub mod scheduler;
pub mod state;
pub mod workers;

#[cfg(test)]
mod tests;

pub use policy::{Selection, SelectionPolicy, SelectionRule};
pub use protocol::{ConductorError, ObserverError};
pub use registry::{ActorIdentity, ActorRegistry, ActorSpec, SharedActorRegistry};
pub use scheduler::{SchedulerArguments, SchedulerHandle, SessionReport, TurnScheduler};
pub use state::{SchedulerPhase, SessionCounters};
pub use workers::{
    ChannelObserver, CompletionChunk, CompletionProvider, CompletionStream, ObserverEvent,
    ScriptedProvider, ScriptedReply, SharedCompletionProvider, SharedTranscriptSink,
    SharedTurnObserver, TranscriptHandle, TranscriptSink, TurnObserver,
};
