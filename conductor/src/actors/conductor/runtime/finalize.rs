use shared_types::{SessionOutcome, SessionStatus};

use crate::actors::conductor::events;
use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::scheduler::{SessionEnd, SessionReport, TurnScheduler};
use crate::actors::conductor::state::SchedulerPhase;

impl TurnScheduler {
    /// Record the terminal status and hand the transcript to the sink.
    ///
    /// Consumes the scheduler, so a session is saved at most once; every exit
    /// of `run` goes through here, so it is saved at least once.
    pub(crate) async fn finalize(
        mut self,
        end: Result<SessionEnd, ConductorError>,
    ) -> SessionReport {
        let (status, termination, error) = match end {
            Ok(SessionEnd::Terminated(reason)) => (reason.status(), Some(reason), None),
            Ok(SessionEnd::Cancelled) => (SessionStatus::Cancelled, None, None),
            Err(e) => {
                tracing::error!(
                    session_id = %self.session_id,
                    phase = self.phase.as_str(),
                    error = %e,
                    "Session aborted"
                );
                (SessionStatus::Error, None, Some(e))
            }
        };

        if let Err(e) = self.phase.advance(SchedulerPhase::Finished(status)) {
            tracing::warn!(session_id = %self.session_id, error = %e, "Phase already final");
        }
        if let Err(e) = self.counters.finish(status) {
            tracing::warn!(session_id = %self.session_id, error = %e, "Status already final");
        }

        let outcome = SessionOutcome {
            status,
            turn_count: self.counters.turn_count,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            termination,
            last_actor: self.counters.last_actor.clone(),
            error: error.clone().map(Into::into),
        };
        events::emit_session_finished(self.session_id.as_str(), &outcome);

        let transcript = self.log.snapshot();
        let persistence = self
            .sink
            .save_session(self.session_id.as_str(), &self.request, &transcript, &outcome)
            .await;
        match &persistence {
            Ok(handle) => events::emit_transcript_saved(self.session_id.as_str(), &handle.location),
            Err(e) => tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "Failed to persist transcript; keeping it in the report"
            ),
        }

        SessionReport {
            session_id: self.session_id,
            status,
            transcript,
            outcome,
            error,
            persistence,
        }
    }
}
