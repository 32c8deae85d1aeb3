//! Session identity persistence
//!
//! The server assigns each client a session id on handshake. The id must
//! survive restarts so that a reconnecting participant keeps its role, so it
//! is written to disk before it is used again.
//!
//! Absence is a valid state (fresh install), never an error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::SessionId;
use crate::storage::persistence::{read_optional, remove_if_exists};
use crate::storage::{atomic_write, StorageError, StorageResult};

/// Read/write contract for the durable session identity
pub trait SessionStore {
    /// Load the stored id, or an empty id if none is stored
    fn load(&self) -> SessionId;

    /// Persist the id; durable once this returns `Ok`
    fn save(&mut self, id: &SessionId) -> StorageResult<()>;
}

/// On-disk layout: a single `sessionId -> string` pair
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    #[serde(rename = "sessionId")]
    session_id: SessionId,
}

/// Session store backed by a JSON file in the data directory
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the configured location (`{data_dir}/session.json`)
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.session_path())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load, surfacing read and parse failures
    pub fn try_load(&self) -> StorageResult<Option<SessionId>> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(None);
        };

        let file: SessionFile =
            serde_json::from_str(&content).map_err(|e| StorageError::InvalidFormat {
                path: self.path.clone(),
                details: e.to_string(),
            })?;

        if file.session_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(file.session_id))
    }

    /// Forget the stored identity
    pub fn clear(&mut self) -> StorageResult<()> {
        remove_if_exists(&self.path)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> SessionId {
        match self.try_load() {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("No stored session id at {:?}", self.path);
                SessionId::empty()
            }
            Err(e) => {
                warn!("Ignoring unreadable session file: {}", e);
                SessionId::empty()
            }
        }
    }

    fn save(&mut self, id: &SessionId) -> StorageResult<()> {
        let file = SessionFile {
            session_id: id.clone(),
        };
        let json = serde_json::to_vec(&file).map_err(|e| StorageError::InvalidFormat {
            path: self.path.clone(),
            details: e.to_string(),
        })?;
        atomic_write(&self.path, &json)?;
        debug!("Saved session id to {:?}", self.path);
        Ok(())
    }
}

/// In-process session store (tests, embedding without a data directory)
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    id: SessionId,
    saves: usize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            saves: 0,
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> SessionId {
        self.id.clone()
    }

    fn save(&mut self, id: &SessionId) -> StorageResult<()> {
        self.id = id.clone();
        self.saves += 1;
        Ok(())
    }
}
