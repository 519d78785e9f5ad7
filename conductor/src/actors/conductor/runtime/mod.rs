//! Scheduler runtime: turn execution and session finalization.

pub(crate) mod finalize;
pub(crate) mod turn;
