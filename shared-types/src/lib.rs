//! Shared conversation types
//!
//! These types are used by both:
//! - the conductor engine (turn scheduling, caching, persistence)
//! - any presentation layer that renders a session transcript
//!
//! Serializable with serde so transcripts can be stored and shipped as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Types
// ============================================================================

/// Unique identifier for a conversation session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Who produced a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Manager,
    Worker,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Manager => "manager",
            Self::Worker => "worker",
            Self::System => "system",
        }
    }
}

/// Role metadata of a registered actor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Manager,
    Worker,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Worker => "worker",
        }
    }

    /// Role used for messages this actor appends to the conversation.
    pub fn message_role(&self) -> MessageRole {
        match self {
            Self::Manager => MessageRole::Manager,
            Self::Worker => MessageRole::Worker,
        }
    }
}

/// Message - one entry of the conversation log.
/// Never mutated after it has been appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Name of the actor that produced the message (None for user/system input)
    pub actor_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Set on messages synthesized for a failed actor turn
    #[serde(default)]
    pub failed: bool,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, actor_name: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            actor_name,
            timestamp: Utc::now(),
            failed: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content, None)
    }

    pub fn actor(role: ActorRole, actor_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(role.message_role(), content, Some(actor_name.into()))
    }

    /// Failure-marked message attributed to the actor whose turn failed.
    pub fn failure(role: ActorRole, actor_name: impl Into<String>, reason: &str) -> Self {
        let actor_name = actor_name.into();
        let mut message = Self::new(
            role.message_role(),
            format!("[turn failed] {actor_name} could not complete its turn: {reason}"),
            Some(actor_name),
        );
        message.failed = true;
        message
    }
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Session status. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    MaxTurns,
    Terminated,
    Error,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::MaxTurns => "max_turns",
            Self::Terminated => "terminated",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why the selection step ended a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    /// `turn_count` reached `max_turns`
    TurnLimit,
    /// The same actor ran more than `max_consecutive` turns in a row
    ConsecutiveLimit,
    /// The last message carried this termination marker
    Marker(String),
    /// No selection rule produced a candidate
    NoCandidate,
}

impl TerminationReason {
    /// Terminal status the scheduler records for this reason.
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::TurnLimit => SessionStatus::MaxTurns,
            Self::ConsecutiveLimit | Self::Marker(_) => SessionStatus::Terminated,
            Self::NoCandidate => SessionStatus::Completed,
        }
    }
}

/// Serializable error summary attached to a persisted outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionError {
    pub code: String,
    pub message: String,
}

/// How a session ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub turn_count: u32,
    pub elapsed_ms: u64,
    pub termination: Option<TerminationReason>,
    pub last_actor: Option<String>,
    pub error: Option<SessionError>,
}

/// Persisted form of a finished session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTranscript {
    pub session_id: String,
    pub original_request: String,
    pub messages: Vec<Message>,
    pub outcome: SessionOutcome,
    pub saved_at: DateTime<Utc>,
}

// ============================================================================
// Event Topics
// ============================================================================

pub const EVENT_TOPIC_SESSION_STARTED: &str = "conductor.session.started";
pub const EVENT_TOPIC_SESSION_FINISHED: &str = "conductor.session.finished";
pub const EVENT_TOPIC_TURN_SELECTED: &str = "conductor.turn.selected";
pub const EVENT_TOPIC_TURN_DISPATCHED: &str = "conductor.turn.dispatched";
pub const EVENT_TOPIC_TURN_CACHE_HIT: &str = "conductor.turn.cache_hit";
pub const EVENT_TOPIC_TURN_FAILED: &str = "conductor.turn.failed";
pub const EVENT_TOPIC_TURN_APPENDED: &str = "conductor.turn.appended";
pub const EVENT_TOPIC_TRANSCRIPT_SAVED: &str = "conductor.transcript.saved";
