use std::path::{Path, PathBuf};

use crate::error::{HiwarError, Result};
use crate::storage::SlotBackend;

/// Single-file JSON slot. The key selects a sibling file next to the
/// configured path, so one configured path still behaves as one slot
/// per key.
pub struct JsonSlot {
    path: PathBuf,
}

impl JsonSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, key: &str) -> PathBuf {
        // The primary key writes to the configured path; any other key gets
        // a derived sibling file.
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json");
        if key == crate::storage::SESSIONS_KEY {
            self.path.clone()
        } else {
            self.path.with_file_name(format!("{key}.{ext}"))
        }
    }
}

impl SlotBackend for JsonSlot {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let file = self.file_for(key);
        match std::fs::read_to_string(&file) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HiwarError::Storage(format!(
                "failed to read {}: {e}",
                file.display()
            ))),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        let file = self.file_for(key);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HiwarError::Storage(format!("failed to create slot dir: {e}")))?;
        }
        std::fs::write(&file, value).map_err(|e| {
            HiwarError::Storage(format!("failed to write {}: {e}", file.display()))
        })?;
        Ok(())
    }
}
