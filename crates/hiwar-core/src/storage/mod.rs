mod json;
mod sqlite;

pub use json::JsonSlot;
pub use sqlite::SqliteSlot;

use crate::config::PersistenceConfig;
use crate::error::{HiwarError, Result};

/// The fixed key the serialized session array lives under.
pub const SESSIONS_KEY: &str = "sessions";

/// A durable key-value slot. One key, one serialized value; the engine
/// behind it is a backend concern.
pub trait SlotBackend {
    /// Read the value stored under `key`, or `None` when nothing has been
    /// written yet.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    fn store(&self, key: &str, value: &str) -> Result<()>;
}

/// Enum wrapper for slot backends. Dispatches to the concrete implementation.
pub enum Slot {
    Sqlite(SqliteSlot),
    Json(JsonSlot),
}

impl SlotBackend for Slot {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match self {
            Slot::Sqlite(s) => s.load(key),
            Slot::Json(s) => s.load(key),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        match self {
            Slot::Sqlite(s) => s.store(key, value),
            Slot::Json(s) => s.store(key, value),
        }
    }
}

/// Create a slot backend from the given configuration.
pub fn create_backend(config: &PersistenceConfig) -> Result<Slot> {
    match config.backend.as_str() {
        "sqlite" => {
            let path = match &config.path {
                Some(p) => std::path::PathBuf::from(p),
                None => default_slot_path("sessions.db")?,
            };
            Ok(Slot::Sqlite(SqliteSlot::open(&path)?))
        }
        "json" => {
            let path = match &config.path {
                Some(p) => std::path::PathBuf::from(p),
                None => default_slot_path("sessions.json")?,
            };
            Ok(Slot::Json(JsonSlot::new(path)))
        }
        other => Err(HiwarError::Config(format!(
            "unknown persistence backend: {other}"
        ))),
    }
}

/// Default slot path: `~/.config/hiwar/<file>`
fn default_slot_path(file: &str) -> Result<std::path::PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("hiwar").join(file))
        .ok_or_else(|| HiwarError::Config("cannot determine config directory".to_string()))
}
