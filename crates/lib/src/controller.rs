//! Session controller: the authoritative in-memory session list and current
//! pointer, mediating between the local store and the backend.
//!
//! A query against a pending session promotes it to the backend-issued id
//! once the first answer arrives; the stale pending record is deleted from
//! the store in the same step. One request may be outstanding per session
//! (a second send is rejected), and switching sessions cancels the request
//! of the session being left.

use crate::backend::{BackendError, QueryBackend, QueryResponse};
use crate::session::{ChatMessage, Session, SessionIdentity};
use crate::store::SessionStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Reply shown in the thread when a query fails.
pub const FALLBACK_REPLY: &str =
    "Sorry, there was an error processing your request. Please try again.";

/// Reply shown in the thread when an in-flight query is cancelled.
pub const CANCELLED_REPLY: &str = "Request cancelled.";

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no session is selected")]
    NoSession,
    #[error("a request is already in flight for this session")]
    Busy,
}

#[derive(Debug, thiserror::Error)]
pub enum ClearError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

struct State {
    /// Most-recent-first.
    sessions: Vec<Session>,
    current_id: Option<String>,
    /// Session id -> cancellation signal for its outstanding query.
    in_flight: HashMap<String, watch::Sender<bool>>,
}

impl State {
    fn position(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id() == id)
    }

    /// Point `current_id` at `id`, cancelling any outstanding query of the
    /// session being left.
    fn switch_current(&mut self, id: String) {
        if let Some(prev) = self.current_id.as_deref() {
            if prev != id {
                if let Some(cancel) = self.in_flight.get(prev) {
                    let _ = cancel.send(true);
                }
            }
        }
        self.current_id = Some(id);
    }
}

/// Owns session state; shared between the UI thread(s) and workers via `Arc`.
pub struct SessionController {
    backend: Arc<dyn QueryBackend>,
    store: SessionStore,
    state: RwLock<State>,
    loading: Arc<AtomicUsize>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn QueryBackend>, store: SessionStore) -> Self {
        Self {
            backend,
            store,
            state: RwLock::new(State {
                sessions: Vec::new(),
                current_id: None,
                in_flight: HashMap::new(),
            }),
            loading: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Startup protocol: load the stored sessions (most recently stored
    /// becomes current) or create the first session when the store is empty.
    pub async fn start(&self) {
        let mut stored = self.store.load_all();
        let mut state = self.state.write().await;
        if stored.is_empty() {
            let session = create_session_locked(&mut state, &self.store);
            log::info!("no stored sessions, created {}", session.id());
            return;
        }
        // The store appends new records, so newest is last; in memory the
        // list is most-recent-first.
        stored.reverse();
        let current = stored[0].id().to_string();
        log::info!("loaded {} sessions, current {}", stored.len(), current);
        state.sessions = stored;
        state.current_id = Some(current);
    }

    /// Create a session under a fresh pending identity, make it current, and
    /// persist it. Always succeeds; returns a snapshot of the new session.
    pub async fn create_session(&self) -> Session {
        let mut state = self.state.write().await;
        create_session_locked(&mut state, &self.store)
    }

    /// Make `id` current. Unknown ids leave the state untouched and return
    /// false. Switching away from a session cancels its outstanding query.
    pub async fn select_session(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        if state.position(id).is_none() {
            log::warn!("select of unknown session {}", id);
            return false;
        }
        state.switch_current(id.to_string());
        true
    }

    /// Send one query on the current session.
    ///
    /// The user message is appended and persisted before any network I/O and
    /// is never retracted. Exactly one assistant message is appended per
    /// accepted call: the answer, or a fallback notice on failure or
    /// cancellation. Content must be non-empty; callers reject blank input.
    pub async fn send_message(&self, content: &str) -> Result<ChatMessage, SendError> {
        let (session_id, wire_id, was_pending, mut cancel_rx) = {
            let mut state = self.state.write().await;
            let current_id = state.current_id.clone().ok_or(SendError::NoSession)?;
            if state.in_flight.contains_key(&current_id) {
                return Err(SendError::Busy);
            }
            let i = state.position(&current_id).ok_or(SendError::NoSession)?;
            state.sessions[i].messages.push(ChatMessage::user(content));
            self.store.save(&state.sessions[i]);
            let wire_id = state.sessions[i].identity.wire_id().map(String::from);
            let was_pending = state.sessions[i].identity.is_pending();

            let (cancel_tx, cancel_rx) = watch::channel(false);
            state.in_flight.insert(current_id.clone(), cancel_tx);
            (current_id, wire_id, was_pending, cancel_rx)
        };

        let _loading = LoadingGuard::arm(&self.loading);
        let outcome = tokio::select! {
            res = self.backend.send_query(content, wire_id.as_deref()) => Some(res),
            _ = cancel_rx.changed() => None,
        };

        let mut state = self.state.write().await;
        state.in_flight.remove(&session_id);
        let reply = match outcome {
            Some(Ok(response)) if was_pending => self.promote(&mut state, &session_id, response),
            Some(Ok(response)) => {
                let reply = ChatMessage::assistant(response.response, response.sources);
                self.append_and_save(&mut state, &session_id, reply.clone());
                reply
            }
            Some(Err(e)) => {
                log::warn!("query on session {} failed: {}", session_id, e);
                let reply = ChatMessage::assistant_notice(FALLBACK_REPLY);
                self.append_and_save(&mut state, &session_id, reply.clone());
                reply
            }
            None => {
                log::info!("query on session {} cancelled", session_id);
                let reply = ChatMessage::assistant_notice(CANCELLED_REPLY);
                self.append_and_save(&mut state, &session_id, reply.clone());
                reply
            }
        };
        Ok(reply)
    }

    /// Rewrite the session's identity to the backend-issued id, everywhere it
    /// is referenced, and drop the stale pending record from the store.
    fn promote(&self, state: &mut State, old_id: &str, response: QueryResponse) -> ChatMessage {
        let reply = ChatMessage::assistant(response.response, response.sources);
        let Some(i) = state.position(old_id) else {
            log::warn!("promoted session {} vanished", old_id);
            return reply;
        };
        state.sessions[i].identity = SessionIdentity::Confirmed(response.session_id.clone());
        state.sessions[i].messages.push(reply.clone());
        let snapshot = state.sessions[i].clone();
        if state.current_id.as_deref() == Some(old_id) {
            state.current_id = Some(response.session_id.clone());
        }
        self.store.delete(old_id);
        self.store.save(&snapshot);
        log::info!("session {} promoted to {}", old_id, response.session_id);
        reply
    }

    fn append_and_save(&self, state: &mut State, id: &str, message: ChatMessage) {
        let Some(i) = state.position(id) else {
            log::warn!("session {} vanished before reply could be appended", id);
            return;
        };
        state.sessions[i].messages.push(message);
        self.store.save(&state.sessions[i]);
    }

    /// Empty the session's message sequence. Confirmed sessions clear the
    /// backend history first and abort on failure, leaving local state
    /// untouched; pending sessions never reach the backend.
    pub async fn clear_session(&self, id: &str) -> Result<(), ClearError> {
        let identity = {
            let state = self.state.read().await;
            state
                .position(id)
                .map(|i| state.sessions[i].identity.clone())
        }
        .ok_or_else(|| ClearError::UnknownSession(id.to_string()))?;

        if let Some(real_id) = identity.wire_id() {
            self.backend.clear_session(real_id).await?;
        }

        let mut state = self.state.write().await;
        if let Some(i) = state.position(id) {
            state.sessions[i].messages.clear();
            self.store.save(&state.sessions[i]);
        }
        Ok(())
    }

    /// Snapshot of all sessions, most-recent-first.
    pub async fn sessions(&self) -> Vec<Session> {
        self.state.read().await.sessions.clone()
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.state.read().await.current_id.clone()
    }

    /// Snapshot of the current session, if any.
    pub async fn current_session(&self) -> Option<Session> {
        let state = self.state.read().await;
        let id = state.current_id.as_deref()?;
        state.position(id).map(|i| state.sessions[i].clone())
    }

    pub async fn current_messages(&self) -> Vec<ChatMessage> {
        self.current_session()
            .await
            .map(|s| s.messages)
            .unwrap_or_default()
    }

    /// True while at least one query is outstanding.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Cancel every outstanding query (shutdown path).
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        for (id, cancel) in state.in_flight.drain() {
            log::debug!("cancelling in-flight query on session {}", id);
            let _ = cancel.send(true);
        }
    }
}

fn create_session_locked(state: &mut State, store: &SessionStore) -> Session {
    let session = Session::new(format!("Chat {}", state.sessions.len() + 1));
    state.sessions.insert(0, session.clone());
    state.switch_current(session.id().to_string());
    store.save(&session);
    session
}

/// Increments the loading counter; decrements on drop, so the flag clears on
/// every exit path of a send, including cancellation.
struct LoadingGuard(Arc<AtomicUsize>);

impl LoadingGuard {
    fn arm(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
