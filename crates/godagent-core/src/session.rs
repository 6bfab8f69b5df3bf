//! Session persistence: one JSON file per session, written atomically.
//!
//! Sessions are keyed by UUIDv4 and persisted under `Config::sessions_dir()`.
//! Writes retry a bounded number of times on transient I/O failure before
//! giving up, and reads reject anything that fails to parse as a
//! well-formed [`Session`] rather than returning partially-trusted data.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GodagentError, GodagentResult};
use crate::types::{Session, SessionStatus};

/// Number of write attempts before giving up.
const WRITE_RETRIES: u32 = 3;
/// Backoff between write attempts.
const WRITE_BACKOFF: Duration = Duration::from_millis(100);
/// Sessions with no activity for this long are excluded from `list` by default.
const DEFAULT_MAX_AGE_SECS: i64 = 24 * 3600;

/// File-backed session store.
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `base_dir` (created lazily on first write).
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.json"))
    }

    /// Create a new running session and persist it. Returns the new session.
    pub fn create(&self) -> GodagentResult<Session> {
        let now = now();
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Running,
            phase: "init".to_string(),
            agent_index: None,
            completed_agents: Vec::new(),
            start_time: now,
            last_activity_time: now,
            errors: Vec::new(),
        };
        self.save(&session)?;
        Ok(session)
    }

    /// Write `session` to disk via a temp file + rename, retrying on
    /// transient I/O error with a fixed backoff.
    pub fn save(&self, session: &Session) -> GodagentResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        let final_path = self.path_for(&session.session_id);
        let temp_path = self.base_dir.join(format!("{}.tmp", session.session_id));
        let json = serde_json::to_vec_pretty(session)?;

        let mut last_err = None;
        for attempt in 0..WRITE_RETRIES {
            match write_and_rename(&temp_path, &final_path, &json) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < WRITE_RETRIES {
                        std::thread::sleep(WRITE_BACKOFF);
                    }
                }
            }
        }
        Err(GodagentError::SessionPersist {
            session_id: session.session_id.clone(),
            message: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Load a session by id, rejecting corrupt or schema-invalid files.
    pub fn load(&self, session_id: &str) -> GodagentResult<Session> {
        let path = self.path_for(session_id);
        let bytes = std::fs::read(&path).map_err(|_| GodagentError::NotFound {
            entity: format!("session {session_id}"),
        })?;
        let session: Session = serde_json::from_slice(&bytes)
            .map_err(|_| GodagentError::SessionCorrupted { session_id: session_id.to_string() })?;
        validate_schema(&session).map_err(|_| GodagentError::SessionCorrupted { session_id: session_id.to_string() })?;
        Ok(session)
    }

    /// List sessions, most-recently-active first, skipping any file that
    /// fails to parse or is older than `max_age_secs` (defaults to 24h).
    pub fn list(&self, max_age_secs: Option<i64>) -> Vec<Session> {
        let max_age = max_age_secs.unwrap_or(DEFAULT_MAX_AGE_SECS);
        let now = now();
        let Ok(read_dir) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };
        let mut sessions: Vec<Session> = read_dir
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|e| std::fs::read(e.path()).ok())
            .filter_map(|bytes| serde_json::from_slice::<Session>(&bytes).ok())
            .filter(|s| validate_schema(s).is_ok())
            .filter(|s| now - s.last_activity_time <= max_age)
            .collect();
        sessions.sort_by(|a, b| b.last_activity_time.cmp(&a.last_activity_time));
        sessions
    }

    /// Delete a session file. Returns whether a file was removed.
    pub fn delete(&self, session_id: &str) -> bool {
        std::fs::remove_file(self.path_for(session_id)).is_ok()
    }
}

fn write_and_rename(temp_path: &Path, final_path: &Path, json: &[u8]) -> std::io::Result<()> {
    {
        let mut file = std::fs::File::create(temp_path)?;
        std::io::Write::write_all(&mut file, json)?;
        file.sync_all()?;
    }
    std::fs::rename(temp_path, final_path)
}

fn validate_schema(session: &Session) -> Result<(), ()> {
    if session.session_id.is_empty() {
        return Err(());
    }
    if session.last_activity_time < session.start_time {
        return Err(());
    }
    Ok(())
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let session = store.create().unwrap();
        let loaded = store.load(&session.session_id).unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.status, SessionStatus::Running);
    }

    #[test]
    fn test_load_missing_session_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let err = store.load("missing").unwrap_err();
        assert!(matches!(err, GodagentError::NotFound { .. }));
    }

    #[test]
    fn test_load_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.json"), b"not json").unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let err = store.load("bad").unwrap_err();
        assert!(matches!(err, GodagentError::SessionCorrupted { .. }));
    }

    #[test]
    fn test_list_skips_corrupt_and_sorts_by_recency() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let mut s1 = store.create().unwrap();
        s1.last_activity_time = 100;
        store.save(&s1).unwrap();
        let mut s2 = store.create().unwrap();
        s2.last_activity_time = 200;
        store.save(&s2).unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"{not valid").unwrap();

        let sessions = store.list(None);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, s2.session_id);
    }

    #[test]
    fn test_list_filters_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let mut old = store.create().unwrap();
        old.start_time = 0;
        old.last_activity_time = 0;
        store.save(&old).unwrap();
        let sessions = store.list(Some(1));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let session = store.create().unwrap();
        assert!(store.delete(&session.session_id));
        assert!(store.load(&session.session_id).is_err());
    }
}
