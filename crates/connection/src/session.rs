//! Persisted authentication sessions.
//!
//! Each successful authentication yields a `{token, uuid}` pair the
//! teamserver may honour as a continuation hint on the next run. Sessions
//! are persisted per endpoint as JSON under the data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Errors from session persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A persisted authentication session for one endpoint identity.
///
/// Never mutated in place: each authentication either confirms or
/// replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub uuid: String,
    pub endpoint: String,
}

/// Disk-backed session store, one file per endpoint.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, endpoint: &str) -> PathBuf {
        self.dir.join(format!("{endpoint}.auth"))
    }

    /// Loads the prior session for an endpoint.
    ///
    /// Absence or a read/parse failure is "no prior session", never an
    /// error — authentication proceeds with an empty continuation hint.
    pub fn load(&self, endpoint: &str) -> Option<Session> {
        let path = self.path(endpoint);
        if !path.exists() {
            return None;
        }
        match read_session(&path) {
            Ok(session) => {
                debug!(endpoint, "loaded prior session");
                Some(session)
            }
            Err(e) => {
                warn!(endpoint, error = %e, "could not load prior session");
                None
            }
        }
    }

    /// Persists a session, overwriting any prior one for its endpoint.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(&session.endpoint);
        std::fs::write(&path, serde_json::to_string_pretty(session)?)?;
        debug!(endpoint = %session.endpoint, path = %path.display(), "session persisted");
        Ok(())
    }
}

fn read_session(path: &Path) -> Result<Session, SessionError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
