pub mod conductor;
pub mod transcript_store;

pub use conductor::{SchedulerArguments, SessionReport, TurnScheduler};
pub use transcript_store::{
    TranscriptStoreActor, TranscriptStoreArguments, TranscriptStoreHandle, TranscriptStoreMsg,
};
