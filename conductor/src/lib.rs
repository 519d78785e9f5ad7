//! Conductor - multi-actor turn scheduler
//!
//! A manager actor and several worker actors take turns on a shared
//! conversation. This crate decides who speaks next, runs each turn through a
//! process-wide completion cache, keeps the bounded conversation log and
//! persists the finished session.

pub mod actors;
pub mod cache;
pub mod config;
pub mod conversation;

pub use actors::conductor::{
    ActorRegistry, ActorSpec, ConductorError, SchedulerArguments, SessionReport, TurnScheduler,
};
pub use cache::{CompletionCache, Fingerprint, SharedCompletionCache};
pub use config::ConductorConfig;
pub use conversation::ConversationLog;
