//! Per-session scheduler state
//!
//! Holds the session counters and the phase machine:
//!
//! ```text
//! Init → Selecting → Executing → Appending → Selecting → …
//!            |           |
//!            v           v
//!        Finished(Completed | MaxTurns | Terminated | Error | Cancelled)
//! ```
//!
//! No transition leaves `Finished`.

use shared_types::SessionStatus;

use crate::actors::conductor::protocol::ConductorError;

/// Counters the selection policy reads and the scheduler updates after each append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCounters {
    pub turn_count: u32,
    pub last_actor: Option<String>,
    pub consecutive_count: u32,
    pub status: SessionStatus,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self {
            turn_count: 0,
            last_actor: None,
            consecutive_count: 0,
            status: SessionStatus::Running,
        }
    }
}

impl SessionCounters {
    /// Record a completed turn by `actor`.
    pub fn record_turn(&mut self, actor: &str) {
        self.turn_count += 1;
        let same_actor = self
            .last_actor
            .as_deref()
            .is_some_and(|last| last.eq_ignore_ascii_case(actor));
        if same_actor {
            self.consecutive_count += 1;
        } else {
            self.consecutive_count = 1;
            self.last_actor = Some(actor.to_string());
        }
    }

    /// Move to a terminal status. Once terminal, the status never changes again.
    pub fn finish(&mut self, status: SessionStatus) -> Result<(), ConductorError> {
        if self.status.is_terminal() {
            return Err(ConductorError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        self.status = status;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Init,
    Selecting,
    Executing,
    Appending,
    Finished(SessionStatus),
}

impl SchedulerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Selecting => "selecting",
            Self::Executing => "executing",
            Self::Appending => "appending",
            Self::Finished(_) => "finished",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Validate and apply a phase change.
    pub fn advance(&mut self, next: SchedulerPhase) -> Result<(), ConductorError> {
        use SchedulerPhase::*;

        let allowed = match (*self, next) {
            (Finished(_), _) => false,
            (_, Finished(status)) => status.is_terminal(),
            (Init, Selecting) => true,
            (Selecting, Executing) => true,
            (Executing, Appending) => true,
            (Appending, Selecting) => true,
            _ => false,
        };

        if !allowed {
            return Err(ConductorError::InvalidTransition {
                from: self.describe(),
                to: next.describe(),
            });
        }
        *self = next;
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            Self::Finished(status) => format!("finished({})", status.as_str()),
            other => other.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_turn_tracks_consecutive_runs() {
        let mut counters = SessionCounters::default();
        counters.record_turn("coder");
        counters.record_turn("coder");
        assert_eq!(counters.consecutive_count, 2);
        assert_eq!(counters.turn_count, 2);

        counters.record_turn("reviewer");
        assert_eq!(counters.consecutive_count, 1);
        assert_eq!(counters.last_actor.as_deref(), Some("reviewer"));
        assert_eq!(counters.turn_count, 3);
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut counters = SessionCounters::default();
        counters.finish(SessionStatus::MaxTurns).unwrap();
        assert!(counters.finish(SessionStatus::Completed).is_err());
        assert_eq!(counters.status, SessionStatus::MaxTurns);
    }

    #[test]
    fn test_phase_cycle() {
        let mut phase = SchedulerPhase::Init;
        phase.advance(SchedulerPhase::Selecting).unwrap();
        phase.advance(SchedulerPhase::Executing).unwrap();
        phase.advance(SchedulerPhase::Appending).unwrap();
        phase.advance(SchedulerPhase::Selecting).unwrap();
        phase
            .advance(SchedulerPhase::Finished(SessionStatus::Completed))
            .unwrap();
        assert!(phase.is_finished());
    }

    #[test]
    fn test_no_transition_leaves_finished() {
        let mut phase = SchedulerPhase::Finished(SessionStatus::Terminated);
        let err = phase.advance(SchedulerPhase::Selecting).unwrap_err();
        assert_eq!(
            err,
            ConductorError::InvalidTransition {
                from: "finished(terminated)".to_string(),
                to: "selecting".to_string(),
            }
        );
        assert!(phase
            .advance(SchedulerPhase::Finished(SessionStatus::Error))
            .is_err());
    }

    #[test]
    fn test_skipping_phases_rejected() {
        let mut phase = SchedulerPhase::Init;
        assert!(phase.advance(SchedulerPhase::Executing).is_err());
        assert!(phase
            .advance(SchedulerPhase::Finished(SessionStatus::Running))
            .is_err());
        assert_eq!(phase, SchedulerPhase::Init);
    }
}
