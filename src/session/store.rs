//! File-backed session store
//!
//! The store is a single JSON document keyed by identity. Writes go to a
//! temporary sibling file that is renamed over the original, so a crash
//! never leaves a half-written store behind.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// An authenticated identity and the token issued for it
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// On-disk record for one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    token: String,
    issued_at: DateTime<Utc>,
    /// Store-wide write counter; breaks ties between equal timestamps
    revision: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    sessions: BTreeMap<String, SessionRecord>,
}

impl StoreDocument {
    fn latest(&self) -> Option<(&String, &SessionRecord)> {
        self.sessions
            .iter()
            .max_by_key(|(_, record)| (record.issued_at, record.revision))
    }
}

fn to_session(identity: &str, record: &SessionRecord) -> Session {
    Session {
        identity: identity.to_string(),
        token: record.token.clone(),
        issued_at: record.issued_at,
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Store
// ─────────────────────────────────────────────────────────────────

/// Durable session storage, one record per identity
pub struct SessionStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl SessionStore {
    /// Open a store at `path`; the file is created on first save
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the session for `identity`, stamped with the current time
    pub fn save(&self, identity: &str, token: &str) -> Result<Session> {
        let _guard = self.lock.lock();
        let mut doc = self.read_document()?;

        doc.revision += 1;
        let record = SessionRecord {
            token: token.to_string(),
            issued_at: Utc::now(),
            revision: doc.revision,
        };
        let session = to_session(identity, &record);
        let replaced = doc.sessions.insert(identity.to_string(), record).is_some();

        self.write_document(&doc)?;

        info!(identity = %identity, replaced, "Session stored");
        Ok(session)
    }

    /// The session with the latest `issued_at`, or `None` when the store is empty
    pub fn load_latest(&self) -> Result<Option<Session>> {
        let _guard = self.lock.lock();
        let doc = self.read_document()?;
        Ok(doc.latest().map(|(identity, record)| to_session(identity, record)))
    }

    /// All stored sessions, most recent first
    pub fn list(&self) -> Result<Vec<Session>> {
        let _guard = self.lock.lock();
        let doc = self.read_document()?;

        let mut records: Vec<_> = doc.sessions.iter().collect();
        records.sort_by(|a, b| (b.1.issued_at, b.1.revision).cmp(&(a.1.issued_at, a.1.revision)));

        Ok(records
            .into_iter()
            .map(|(identity, record)| to_session(identity, record))
            .collect())
    }

    /// Remove the session for `identity`; returns whether one existed
    pub fn remove(&self, identity: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut doc = self.read_document()?;

        if doc.sessions.remove(identity).is_none() {
            return Ok(false);
        }

        self.write_document(&doc)?;
        info!(identity = %identity, "Session removed");
        Ok(true)
    }

    fn read_document(&self) -> Result<StoreDocument> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Session store does not exist yet");
                return Ok(StoreDocument::default());
            }
            Err(e) => {
                return Err(Error::IoRead {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| Error::SessionStoreCorrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn write_document(&self, doc: &StoreDocument) -> Result<()> {
        let write_err = |path: &Path, source| Error::IoWrite {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
        }

        let data = serde_json::to_vec_pretty(doc)?;
        let tmp_path = self.path.with_extension("json.tmp");

        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| write_err(&tmp_path, e))?;
            restrict_permissions(&file).map_err(|e| write_err(&tmp_path, e))?;
            file.write_all(&data).map_err(|e| write_err(&tmp_path, e))?;
            file.sync_all().map_err(|e| write_err(&tmp_path, e))?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| write_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
