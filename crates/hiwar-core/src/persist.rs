use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::PersistenceConfig;
use crate::model::Session;
use crate::storage::{Slot, SlotBackend, SESSIONS_KEY};

/// Best-effort, debounced writer for the session slot.
///
/// Every mutation schedules a write of the full session array; scheduling
/// again within the quiet period cancels the pending write and restarts
/// the clock, so rapid mutations coalesce into one write. Writes never
/// fail the caller: capacity errors trigger one truncate-and-retry, and
/// anything else is logged and swallowed.
pub struct Persister {
    slot: Arc<Slot>,
    debounce: Duration,
    max_retained: usize,
    pending: Mutex<Option<CancellationToken>>,
}

impl Persister {
    pub fn new(slot: Slot, config: &PersistenceConfig) -> Self {
        Self {
            slot: Arc::new(slot),
            debounce: Duration::from_millis(config.debounce_ms),
            max_retained: config.max_retained_sessions,
            pending: Mutex::new(None),
        }
    }

    /// Read the session array back from the slot. Missing or corrupted
    /// data resets to an empty set; initialization never fails on bad
    /// stored state.
    pub fn load_sessions(&self) -> Vec<Session> {
        let payload = match self.slot.load(SESSIONS_KEY) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("failed to read session slot, starting empty: {e}");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Session>>(&payload) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("corrupted session slot, resetting to empty: {e}");
                Vec::new()
            }
        }
    }

    /// Schedule a write of `sessions` after the quiet period, cancelling
    /// any write already pending. Outside a tokio runtime (or with a zero
    /// debounce) the write happens immediately.
    pub fn schedule(&self, sessions: Vec<Session>) {
        let token = self.replace_pending();

        if self.debounce.is_zero() || tokio::runtime::Handle::try_current().is_err() {
            write_now(&self.slot, self.max_retained, sessions);
            return;
        }

        let slot = Arc::clone(&self.slot);
        let max_retained = self.max_retained;
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(debounce) => write_now(&slot, max_retained, sessions),
            }
        });
    }

    /// Write immediately, cancelling any pending debounced write.
    pub fn flush(&self, sessions: &[Session]) {
        self.replace_pending().cancel();
        write_now(&self.slot, self.max_retained, sessions.to_vec());
    }

    /// Swap in a fresh cancellation token, cancelling the previous one.
    fn replace_pending(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = pending.replace(token.clone()) {
            prev.cancel();
        }
        token
    }
}

fn write_now(slot: &Slot, max_retained: usize, sessions: Vec<Session>) {
    let payload = match serde_json::to_string(&sessions) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("failed to serialize sessions, skipping persist: {e}");
            return;
        }
    };

    let Err(e) = slot.store(SESSIONS_KEY, &payload) else {
        return;
    };

    if !e.is_storage_full() {
        tracing::warn!("failed to persist sessions: {e}");
        return;
    }

    // Out of capacity: keep the most recent sessions and retry once.
    let trimmed = trim_for_retry(&sessions, max_retained);
    tracing::warn!(
        kept = trimmed.len(),
        dropped = sessions.len() - trimmed.len(),
        "storage full, retrying with most recent sessions only"
    );
    let payload = match serde_json::to_string(trimmed) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("failed to serialize trimmed sessions: {e}");
            return;
        }
    };
    if let Err(e) = slot.store(SESSIONS_KEY, &payload) {
        tracing::warn!("persist retry failed, giving up: {e}");
    }
}

/// The sessions kept on a capacity-failure retry: the first `keep`
/// entries, since the in-memory array is ordered most-recent-first.
fn trim_for_retry(sessions: &[Session], keep: usize) -> &[Session] {
    &sessions[..keep.min(sessions.len())]
}
