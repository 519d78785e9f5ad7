//! Scheduler lifecycle events
//!
//! Every event is a structured `tracing` record carrying a stable `topic`
//! field, so log pipelines can filter on `conductor.*` topics without parsing
//! message text.

use shared_types::{SessionOutcome, TerminationReason};

use crate::actors::conductor::policy::SelectionRule;

/// Emit session started event
pub fn emit_session_started(session_id: &str, request: &str, actor_count: usize) {
    tracing::info!(
        topic = shared_types::EVENT_TOPIC_SESSION_STARTED,
        session_id = %session_id,
        actor_count,
        request_chars = request.chars().count(),
        "Session started"
    );
}

/// Emit actor selected event
pub fn emit_turn_selected(session_id: &str, turn: u32, actor: &str, rule: SelectionRule) {
    tracing::info!(
        topic = shared_types::EVENT_TOPIC_TURN_SELECTED,
        session_id = %session_id,
        turn,
        actor = %actor,
        rule = rule.as_str(),
        "Actor selected"
    );
}

/// Emit turn dispatched to the completion provider
pub fn emit_turn_dispatched(session_id: &str, turn: u32, actor: &str, fingerprint: &str) {
    tracing::debug!(
        topic = shared_types::EVENT_TOPIC_TURN_DISPATCHED,
        session_id = %session_id,
        turn,
        actor = %actor,
        fingerprint = %fingerprint,
        "Turn dispatched"
    );
}

/// Emit cache hit event
pub fn emit_cache_hit(session_id: &str, turn: u32, actor: &str, fingerprint: &str) {
    tracing::info!(
        topic = shared_types::EVENT_TOPIC_TURN_CACHE_HIT,
        session_id = %session_id,
        turn,
        actor = %actor,
        fingerprint = %fingerprint,
        "Replaying cached completion"
    );
}

/// Emit turn failed event. Turn failures never end the session.
pub fn emit_turn_failed(session_id: &str, turn: u32, actor: &str, reason: &str) {
    tracing::warn!(
        topic = shared_types::EVENT_TOPIC_TURN_FAILED,
        session_id = %session_id,
        turn,
        actor = %actor,
        reason = %reason,
        "Turn failed"
    );
}

/// Emit message appended event
pub fn emit_turn_appended(session_id: &str, turn: u32, actor: &str, chars: usize, evicted: bool) {
    tracing::debug!(
        topic = shared_types::EVENT_TOPIC_TURN_APPENDED,
        session_id = %session_id,
        turn,
        actor = %actor,
        chars,
        evicted,
        "Message appended"
    );
}

/// Emit session finished event
pub fn emit_session_finished(session_id: &str, outcome: &SessionOutcome) {
    let termination = outcome
        .termination
        .as_ref()
        .map(describe_termination)
        .unwrap_or_default();
    tracing::info!(
        topic = shared_types::EVENT_TOPIC_SESSION_FINISHED,
        session_id = %session_id,
        status = outcome.status.as_str(),
        turn_count = outcome.turn_count,
        elapsed_ms = outcome.elapsed_ms,
        termination = %termination,
        "Session finished"
    );
}

/// Emit transcript saved event
pub fn emit_transcript_saved(session_id: &str, location: &str) {
    tracing::info!(
        topic = shared_types::EVENT_TOPIC_TRANSCRIPT_SAVED,
        session_id = %session_id,
        location = %location,
        "Transcript saved"
    );
}

fn describe_termination(reason: &TerminationReason) -> String {
    match reason {
        TerminationReason::TurnLimit => "turn_limit".to_string(),
        TerminationReason::ConsecutiveLimit => "consecutive_limit".to_string(),
        TerminationReason::Marker(marker) => format!("marker:{marker}"),
        TerminationReason::NoCandidate => "no_candidate".to_string(),
    }
}
