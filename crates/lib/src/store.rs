//! Durable mirror of all sessions: one JSON file holding the full array.
//!
//! Every mutation rewrites the whole file, so after a successful save the
//! durable form equals the in-memory form. Read and write failures are
//! logged and degrade to "no data" / no-op; they never reach the user.

use crate::session::Session;
use std::path::{Path, PathBuf};

/// File-backed session store. All operations are synchronous and local.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every stored session in stored order. A missing file, unreadable
    /// file, or parse failure yields an empty list.
    pub fn load_all(&self) -> Vec<Session> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("session store not found: {}", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                log::warn!("reading session store {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("parsing session store {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Upsert one session by id (replace if present, append otherwise), then
    /// rewrite the whole collection.
    pub fn save(&self, session: &Session) {
        let mut sessions = self.load_all();
        match sessions.iter_mut().find(|s| s.id() == session.id()) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        self.write(&sessions);
    }

    /// Remove the session with the given id, if stored.
    pub fn delete(&self, id: &str) {
        let mut sessions = self.load_all();
        let before = sessions.len();
        sessions.retain(|s| s.id() != id);
        if sessions.len() != before {
            self.write(&sessions);
        }
    }

    /// Remove the whole store file.
    pub fn clear_all(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("removing session store {}: {}", self.path.display(), e),
        }
    }

    fn write(&self, sessions: &[Session]) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("creating store directory {}: {}", parent.display(), e);
                return;
            }
        }
        let json = match serde_json::to_string(sessions) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("serializing session store: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            log::warn!("writing session store {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatMessage, SessionIdentity};

    fn temp_store() -> SessionStore {
        let dir = std::env::temp_dir().join(format!("docent-store-test-{}", uuid::Uuid::new_v4()));
        SessionStore::new(dir.join("sessions.json"))
    }

    #[test]
    fn load_from_missing_file_is_empty() {
        assert!(temp_store().load_all().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = temp_store();
        let mut session = Session::new("Chat 1");
        session.messages.push(ChatMessage::user("hello"));
        store.save(&session);

        let loaded = store.load_all();
        assert_eq!(loaded, vec![session]);
    }

    #[test]
    fn save_upserts_by_id() {
        let store = temp_store();
        let mut a = Session::new("Chat 1");
        let b = Session::new("Chat 2");
        store.save(&a);
        store.save(&b);

        a.messages.push(ChatMessage::user("again"));
        store.save(&a);

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], a, "existing record replaced in place");
        assert_eq!(loaded[1], b);
    }

    #[test]
    fn delete_removes_only_the_given_id() {
        let store = temp_store();
        let a = Session::new("Chat 1");
        let b = Session::new("Chat 2");
        store.save(&a);
        store.save(&b);

        store.delete(a.id());
        let loaded = store.load_all();
        assert_eq!(loaded, vec![b]);
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let store = temp_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn clear_all_removes_the_file() {
        let store = temp_store();
        store.save(&Session::new("Chat 1"));
        store.clear_all();
        assert!(!store.path().exists());
        assert!(store.load_all().is_empty());
        // Idempotent on a missing file.
        store.clear_all();
    }

    #[test]
    fn pending_identity_round_trips_through_store() {
        let store = temp_store();
        let session = Session::new("Chat 1");
        store.save(&session);
        let loaded = store.load_all();
        assert!(matches!(loaded[0].identity, SessionIdentity::Pending(_)));
    }
}
