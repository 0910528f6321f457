use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{HiwarError, Result};
use crate::storage::SlotBackend;

/// SQLite-backed key-value slot.
///
/// Uses a single `Connection` behind `Arc<Mutex<>>` so it can be shared
/// across async tasks (the debounced writer runs on the Tokio pool).
pub struct SqliteSlot {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteSlot {
    /// Open (or create) a file-backed SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HiwarError::Storage(format!("failed to create slot dir: {e}")))?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| HiwarError::Storage(format!("failed to open SQLite database: {e}")))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            HiwarError::Storage(format!("failed to open in-memory SQLite database: {e}"))
        })?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared initialisation: pragmas + table creation.
    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        // WAL mode for better concurrent-read performance.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| HiwarError::Storage(format!("failed to set WAL mode: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS slots (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(|e| HiwarError::Storage(format!("failed to create slots table: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }
}

impl SlotBackend for SqliteSlot {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| HiwarError::Storage("slot connection poisoned".to_string()))?;

        let mut stmt = conn
            .prepare("SELECT value FROM slots WHERE key = ?1")
            .map_err(|e| HiwarError::Storage(format!("failed to prepare slot read: {e}")))?;

        let mut rows = stmt
            .query([key])
            .map_err(|e| HiwarError::Storage(format!("failed to read slot: {e}")))?;

        match rows
            .next()
            .map_err(|e| HiwarError::Storage(format!("failed to read slot row: {e}")))?
        {
            Some(row) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| HiwarError::Storage(format!("failed to decode slot value: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| HiwarError::Storage("slot connection poisoned".to_string()))?;

        conn.execute(
            "INSERT INTO slots (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| HiwarError::Storage(format!("failed to write slot: {e}")))?;

        Ok(())
    }
}
