//! TranscriptStoreActor - persistence sink for finished sessions using ractor
//!
//! Each session is stored once as a [`StoredTranscript`]. Two backends:
//!
//! - `InMemory`: a map owned by the actor (tests, demo runs)
//! - `Directory`: one pretty-printed `<session_id>.json` file per session
//!
//! [`TranscriptStoreHandle`] wraps the actor reference and implements
//! [`TranscriptSink`], so a scheduler can hand its transcript to the store
//! without knowing about actors.
//!
//! # Example
//!
//! ```rust,ignore
//! let (store, _handle) =
//!     TranscriptStoreHandle::spawn(TranscriptStoreArguments::Directory("data/transcripts".into()))
//!         .await?;
//! let args = SchedulerArguments::new(request, registry, cache, Arc::new(store.clone()));
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{Message, SessionOutcome, StoredTranscript};
use tokio::task::JoinHandle;

use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::workers::{TranscriptHandle, TranscriptSink};

/// Actor that owns transcript storage
#[derive(Debug, Default)]
pub struct TranscriptStoreActor;

/// Arguments for spawning TranscriptStoreActor
#[derive(Debug, Clone)]
pub enum TranscriptStoreArguments {
    /// Keep transcripts in memory (for testing)
    InMemory,
    /// Write one JSON file per session into this directory
    Directory(PathBuf),
}

/// State for TranscriptStoreActor
pub enum TranscriptStoreState {
    InMemory(BTreeMap<String, StoredTranscript>),
    Directory(PathBuf),
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by TranscriptStoreActor
#[derive(Debug)]
pub enum TranscriptStoreMsg {
    /// Store a transcript, replying with its location
    Save {
        transcript: StoredTranscript,
        reply: RpcReplyPort<Result<String, TranscriptStoreError>>,
    },
    /// Load a transcript by session id
    Load {
        session_id: String,
        reply: RpcReplyPort<Result<Option<StoredTranscript>, TranscriptStoreError>>,
    },
    /// Session ids of every stored transcript, sorted
    List {
        reply: RpcReplyPort<Result<Vec<String>, TranscriptStoreError>>,
    },
}

/// Errors that can occur in TranscriptStoreActor
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TranscriptStoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Transcript already stored: {0}")]
    AlreadyStored(String),
}

impl From<std::io::Error> for TranscriptStoreError {
    fn from(e: std::io::Error) -> Self {
        TranscriptStoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TranscriptStoreError {
    fn from(e: serde_json::Error) -> Self {
        TranscriptStoreError::Serialization(e.to_string())
    }
}

/// Session ids become file names, so they must be a single plain path component.
fn validate_session_id(session_id: &str) -> Result<(), TranscriptStoreError> {
    let invalid = session_id.is_empty()
        || session_id.contains("..")
        || session_id.contains('/')
        || session_id.contains('\\');
    if invalid {
        return Err(TranscriptStoreError::InvalidSessionId(
            session_id.to_string(),
        ));
    }
    Ok(())
}

fn transcript_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.json"))
}

#[async_trait]
impl Actor for TranscriptStoreActor {
    type Msg = TranscriptStoreMsg;
    type State = TranscriptStoreState;
    type Arguments = TranscriptStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "TranscriptStoreActor starting"
        );

        let state = match args {
            TranscriptStoreArguments::InMemory => {
                tracing::info!("Using in-memory transcript store");
                TranscriptStoreState::InMemory(BTreeMap::new())
            }
            TranscriptStoreArguments::Directory(dir) => {
                tracing::info!(directory = %dir.display(), "Using directory transcript store");
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    ActorProcessingErr::from(format!(
                        "Failed to create transcript directory {}: {e}",
                        dir.display()
                    ))
                })?;
                TranscriptStoreState::Directory(dir)
            }
        };

        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TranscriptStoreMsg::Save { transcript, reply } => {
                let result = self.handle_save(transcript, state).await;
                let _ = reply.send(result);
            }
            TranscriptStoreMsg::Load { session_id, reply } => {
                let result = self.handle_load(&session_id, state).await;
                let _ = reply.send(result);
            }
            TranscriptStoreMsg::List { reply } => {
                let result = self.handle_list(state).await;
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "TranscriptStoreActor stopped"
        );
        Ok(())
    }
}

impl TranscriptStoreActor {
    async fn handle_save(
        &self,
        transcript: StoredTranscript,
        state: &mut TranscriptStoreState,
    ) -> Result<String, TranscriptStoreError> {
        validate_session_id(&transcript.session_id)?;
        let session_id = transcript.session_id.clone();
        let message_count = transcript.messages.len();

        let location = match state {
            TranscriptStoreState::InMemory(transcripts) => {
                if transcripts.contains_key(&session_id) {
                    return Err(TranscriptStoreError::AlreadyStored(session_id));
                }
                transcripts.insert(session_id.clone(), transcript);
                format!("memory://{session_id}")
            }
            TranscriptStoreState::Directory(dir) => {
                let path = transcript_path(dir, &session_id);
                if tokio::fs::try_exists(&path).await? {
                    return Err(TranscriptStoreError::AlreadyStored(session_id));
                }
                let body = serde_json::to_vec_pretty(&transcript)?;
                // Write then rename so a reader never sees a half-written file.
                let tmp = dir.join(format!(".{session_id}.json.tmp"));
                tokio::fs::write(&tmp, body).await?;
                tokio::fs::rename(&tmp, &path).await?;
                path.display().to_string()
            }
        };

        tracing::debug!(
            session_id = %session_id,
            location = %location,
            messages = message_count,
            "Transcript stored"
        );
        Ok(location)
    }

    async fn handle_load(
        &self,
        session_id: &str,
        state: &TranscriptStoreState,
    ) -> Result<Option<StoredTranscript>, TranscriptStoreError> {
        validate_session_id(session_id)?;
        match state {
            TranscriptStoreState::InMemory(transcripts) => Ok(transcripts.get(session_id).cloned()),
            TranscriptStoreState::Directory(dir) => {
                let path = transcript_path(dir, session_id);
                match tokio::fs::read(&path).await {
                    Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn handle_list(
        &self,
        state: &TranscriptStoreState,
    ) -> Result<Vec<String>, TranscriptStoreError> {
        match state {
            TranscriptStoreState::InMemory(transcripts) => Ok(transcripts.keys().cloned().collect()),
            TranscriptStoreState::Directory(dir) => {
                let mut ids = Vec::new();
                let mut entries = tokio::fs::read_dir(dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else {
                        continue;
                    };
                    if name.starts_with('.') {
                        continue;
                    }
                    if let Some(id) = name.strip_suffix(".json") {
                        ids.push(id.to_string());
                    }
                }
                ids.sort();
                Ok(ids)
            }
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable client for a running TranscriptStoreActor
#[derive(Debug, Clone)]
pub struct TranscriptStoreHandle {
    store: ActorRef<TranscriptStoreMsg>,
}

impl TranscriptStoreHandle {
    pub fn new(store: ActorRef<TranscriptStoreMsg>) -> Self {
        Self { store }
    }

    /// Spawn an unnamed store actor and wrap it.
    pub async fn spawn(
        args: TranscriptStoreArguments,
    ) -> Result<(Self, JoinHandle<()>), ractor::SpawnErr> {
        let (store, handle) = Actor::spawn(None, TranscriptStoreActor, args).await?;
        Ok((Self::new(store), handle))
    }

    pub fn actor(&self) -> &ActorRef<TranscriptStoreMsg> {
        &self.store
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<StoredTranscript>, ConductorError> {
        let session_id = session_id.to_string();
        ractor::call!(self.store, |reply| TranscriptStoreMsg::Load { session_id, reply })
            .map_err(|e| ConductorError::StoreUnavailable(e.to_string()))?
            .map_err(|e| ConductorError::Persistence(e.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<String>, ConductorError> {
        ractor::call!(self.store, |reply| TranscriptStoreMsg::List { reply })
            .map_err(|e| ConductorError::StoreUnavailable(e.to_string()))?
            .map_err(|e| ConductorError::Persistence(e.to_string()))
    }

    pub fn stop(&self) {
        self.store.stop(None);
    }
}

#[async_trait]
impl TranscriptSink for TranscriptStoreHandle {
    async fn save_session(
        &self,
        session_id: &str,
        original_request: &str,
        log: &[Message],
        outcome: &SessionOutcome,
    ) -> Result<TranscriptHandle, ConductorError> {
        let transcript = StoredTranscript {
            session_id: session_id.to_string(),
            original_request: original_request.to_string(),
            messages: log.to_vec(),
            outcome: outcome.clone(),
            saved_at: Utc::now(),
        };

        let location = ractor::call!(self.store, |reply| TranscriptStoreMsg::Save {
            transcript,
            reply
        })
        .map_err(|e| ConductorError::StoreUnavailable(e.to_string()))?
        .map_err(|e| ConductorError::Persistence(e.to_string()))?;

        Ok(TranscriptHandle {
            session_id: session_id.to_string(),
            location,
        })
    }
}
