//! Conductor error types
//!
//! Defines the errors used throughout the conductor system and their
//! serializable summary for persisted session outcomes.

/// Errors that can occur in the conductor
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConductorError {
    /// Actor name is not registered
    #[error("unknown actor: {0}")]
    UnknownActor(String),
    /// Actor name registered twice (names compare case-insensitively)
    #[error("duplicate actor: {0}")]
    DuplicateActor(String),
    /// Actor name cannot be addressed with an `@name` mention
    #[error("invalid actor name: {0:?}")]
    InvalidActorName(String),
    /// Configuration rejected at construction time
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Worker failed to produce a completion
    #[error("worker failed: {0}")]
    WorkerFailed(String),
    /// Transcript persistence failed
    #[error("persistence failed: {0}")]
    Persistence(String),
    /// Scheduler phase change that the state machine does not allow
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    /// Transcript store actor could not be reached
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// Scheduler task panicked or was aborted before producing a report
    #[error("session aborted: {0}")]
    SessionAborted(String),
}

impl ConductorError {
    pub fn code(&self) -> &'static str {
        match self {
            ConductorError::UnknownActor(_) => "UNKNOWN_ACTOR",
            ConductorError::DuplicateActor(_) => "DUPLICATE_ACTOR",
            ConductorError::InvalidActorName(_) => "INVALID_ACTOR_NAME",
            ConductorError::InvalidConfig(_) => "INVALID_CONFIG",
            ConductorError::WorkerFailed(_) => "WORKER_FAILED",
            ConductorError::Persistence(_) => "PERSISTENCE_FAILED",
            ConductorError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ConductorError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ConductorError::SessionAborted(_) => "SESSION_ABORTED",
        }
    }
}

impl From<ConductorError> for shared_types::SessionError {
    fn from(err: ConductorError) -> Self {
        shared_types::SessionError {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Failure reported by a turn observer. Logged by the scheduler, never fatal.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// The receiving side of the observer went away
    #[error("observer disconnected")]
    Disconnected,
    #[error("observer rejected fragment: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_converts_to_session_error() {
        let err = ConductorError::Persistence("disk full".to_string());
        let shared: shared_types::SessionError = err.into();
        assert_eq!(shared.code, "PERSISTENCE_FAILED");
        assert_eq!(shared.message, "persistence failed: disk full");
    }
}
