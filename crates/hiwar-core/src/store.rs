use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::config::HiwarConfig;
use crate::error::{CompletionError, Result};
use crate::export::{self, ExportFormat};
use crate::model::{Message, Role, Session};
use crate::persist::Persister;
use crate::storage::{self, Slot};
use crate::tokens;

struct StoreState {
    /// Most-recent-first: creation inserts at the front, a send bubbles
    /// its target to the front.
    sessions: Vec<Session>,
    /// Invariant: when set, names a session present in `sessions`.
    active: Option<Uuid>,
    last_error: Option<CompletionError>,
    loading: bool,
    /// Bumped per send; a response is only integrated when its generation
    /// is still current, which suppresses superseded requests.
    generation: u64,
    inflight: Option<CancellationToken>,
}

impl StoreState {
    fn new(sessions: Vec<Session>) -> Self {
        let active = sessions.first().map(|s| s.id);
        Self {
            sessions,
            active,
            last_error: None,
            loading: false,
            generation: 0,
            inflight: None,
        }
    }

    fn contains(&self, id: Uuid) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn bubble_to_front(&mut self, id: Uuid) {
        if let Some(pos) = self.sessions.iter().position(|s| s.id == id) {
            if pos != 0 {
                let session = self.sessions.remove(pos);
                self.sessions.insert(0, session);
            }
        }
    }
}

/// Owns all session state, mediates every mutation, and coordinates the
/// single outstanding call to the completion endpoint.
///
/// Cheap to clone; clones share state. All mutations serialize behind one
/// mutex with short critical sections. The remote call is awaited with
/// the lock released, so a concurrent `send_message` can supersede it.
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<Mutex<StoreState>>,
    client: CompletionClient,
    persister: Option<Arc<Persister>>,
}

impl SessionStore {
    /// Construct a store from configuration: build the completion client,
    /// open the configured slot, and load whatever session set it holds.
    /// Corrupted or missing stored data yields an empty set, never an error.
    pub fn new(config: &HiwarConfig) -> Result<Self> {
        let client = CompletionClient::from_config(&config.completion)?;
        let persister = if config.persistence.enabled {
            let slot = storage::create_backend(&config.persistence)?;
            Some(Arc::new(Persister::new(slot, &config.persistence)))
        } else {
            None
        };
        Ok(Self::assemble(client, persister))
    }

    /// Construct a store over an explicit slot, ignoring the configured
    /// backend and path. Used by tests and by hosts that manage storage
    /// themselves.
    pub fn with_backend(config: &HiwarConfig, slot: Slot) -> Result<Self> {
        let client = CompletionClient::from_config(&config.completion)?;
        let persister = Arc::new(Persister::new(slot, &config.persistence));
        Ok(Self::assemble(client, Some(persister)))
    }

    fn assemble(client: CompletionClient, persister: Option<Arc<Persister>>) -> Self {
        let sessions = persister
            .as_ref()
            .map(|p| p.load_sessions())
            .unwrap_or_default();
        Self {
            state: Arc::new(Mutex::new(StoreState::new(sessions))),
            client,
            persister,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, state: &StoreState) {
        if let Some(persister) = &self.persister {
            persister.schedule(state.sessions.clone());
        }
    }

    // ── session CRUD ───────────────────────────────────────────────────

    /// Create a session, insert it at the front, and mark it active.
    pub fn create_session(&self, title: Option<&str>) -> Session {
        let session = Session::new(title.unwrap_or(""));
        let mut state = self.lock();
        state.sessions.insert(0, session.clone());
        state.active = Some(session.id);
        self.persist(&state);
        session
    }

    /// Make `id` the active session. Unknown ids are ignored; on success
    /// the store-level error is cleared.
    pub fn select_session(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        if !state.contains(id) {
            return false;
        }
        state.active = Some(id);
        state.last_error = None;
        true
    }

    /// Remove a session. When the active session is deleted, the first
    /// remaining session becomes active, or none if the set is empty.
    pub fn delete_session(&self, id: Uuid) {
        let mut state = self.lock();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != id);
        if state.sessions.len() == before {
            return;
        }
        if state.active == Some(id) {
            state.active = state.sessions.first().map(|s| s.id);
        }
        self.persist(&state);
    }

    /// Empty a session's message list in place; the session stays in the set.
    pub fn clear_session(&self, id: Uuid) {
        let mut state = self.lock();
        if let Some(session) = state.find_mut(id) {
            session.clear();
            self.persist(&state);
        }
    }

    pub fn rename_session(&self, id: Uuid, title: &str) {
        let mut state = self.lock();
        if let Some(session) = state.find_mut(id) {
            session.rename(title);
            self.persist(&state);
        }
    }

    // ── send / cancel ──────────────────────────────────────────────────

    /// Append `content` as a user message and request a completion for the
    /// target session (explicit id, else the active session, else a newly
    /// created one).
    ///
    /// Returns the appended assistant message (on failure, one whose
    /// content is the classified user-facing error string), or `None` when
    /// the input was empty or the request was cancelled or superseded by a
    /// newer send. Remote failures never surface as panics or `Err`.
    pub async fn send_message(
        &self,
        content: &str,
        session_id: Option<Uuid>,
    ) -> Option<Message> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return None;
        }

        // Append the user message and arm the request before any network
        // activity.
        let (target_id, history, token, my_gen) = {
            let mut state = self.lock();
            let target_id = match session_id.filter(|id| state.contains(*id)).or(state.active) {
                Some(id) => id,
                None => {
                    let session = Session::new("");
                    let id = session.id;
                    state.sessions.insert(0, session);
                    id
                }
            };

            if let Some(session) = state.find_mut(target_id) {
                session.push_message(Message::new(Role::User, trimmed));
            }
            state.bubble_to_front(target_id);
            state.active = Some(target_id);
            state.loading = true;
            state.last_error = None;

            // One outstanding request per store: a new send supersedes any
            // pending one.
            if let Some(prev) = state.inflight.take() {
                prev.cancel();
            }
            let token = CancellationToken::new();
            state.inflight = Some(token.clone());
            state.generation += 1;
            let my_gen = state.generation;

            let history = state
                .find_mut(target_id)
                .map(|s| s.messages.clone())
                .unwrap_or_default();
            self.persist(&state);
            (target_id, history, token, my_gen)
        };

        // The only suspension point. The lock is released, so cancel() or
        // a newer send can interrupt the wait.
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            result = self.client.complete(&history) => Some(result),
        };

        let mut state = self.lock();
        if state.generation != my_gen {
            tracing::debug!("dropping superseded completion response");
            return None;
        }
        state.loading = false;
        state.inflight = None;

        let result = outcome?;

        let message = match result {
            Ok(completion) => {
                let mut message = Message::new(Role::Assistant, completion.content);
                if let Some(tokens) = completion.total_tokens {
                    message = message.with_token_count(tokens);
                }
                message
            }
            Err(e) => {
                tracing::warn!("completion failed: {e}");
                let message = Message::new(Role::Assistant, e.user_message());
                state.last_error = Some(e);
                message
            }
        };

        // The target may have been deleted while the request was in flight.
        let session = state.find_mut(target_id)?;
        session.push_message(message.clone());
        self.persist(&state);
        Some(message)
    }

    /// Cancel the in-flight request, if any, and clear the loading state.
    /// Cooperative: the superseded response is dropped when it arrives;
    /// the provider may still finish computing it.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if let Some(token) = state.inflight.take() {
            token.cancel();
        }
        state.loading = false;
    }

    // ── snapshots & metrics ────────────────────────────────────────────

    /// Full textual snapshot of a session; empty output for an unknown id.
    pub fn export_session(&self, id: Uuid, format: ExportFormat) -> String {
        let state = self.lock();
        state
            .sessions
            .iter()
            .find(|s| s.id == id)
            .map(|s| export::render(s, format))
            .unwrap_or_default()
    }

    /// Re-insert a session from its [`ExportFormat::Json`] snapshot.
    pub fn import_session(&self, payload: &str) -> Result<Uuid> {
        let session = export::parse(payload)?;
        let id = session.id;
        let mut state = self.lock();
        state.sessions.retain(|s| s.id != id);
        state.sessions.insert(0, session);
        if state.active.is_none() {
            state.active = Some(id);
        }
        self.persist(&state);
        Ok(id)
    }

    /// Sum of recorded token counts for one session, or all of them.
    /// Missing counts are zero.
    pub fn total_tokens_used(&self, session_id: Option<Uuid>) -> u64 {
        let state = self.lock();
        match session_id {
            Some(id) => state
                .sessions
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.total_tokens())
                .unwrap_or(0),
            None => state.sessions.iter().map(|s| s.total_tokens()).sum(),
        }
    }

    /// Estimated cost of a session under the configured model's unit price.
    pub fn session_cost(&self, id: Uuid) -> f64 {
        let state = self.lock();
        state
            .sessions
            .iter()
            .find(|s| s.id == id)
            .map(|s| tokens::session_cost(s, self.client.model()))
            .unwrap_or(0.0)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.lock().sessions.clone()
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        self.lock().active
    }

    pub fn active_session(&self) -> Option<Session> {
        let state = self.lock();
        state
            .active
            .and_then(|id| state.sessions.iter().find(|s| s.id == id).cloned())
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn last_error(&self) -> Option<CompletionError> {
        self.lock().last_error.clone()
    }

    /// Persist the current session set immediately, bypassing the debounce.
    pub fn flush(&self) {
        if let Some(persister) = &self.persister {
            let sessions = self.lock().sessions.clone();
            persister.flush(&sessions);
        }
    }
}
