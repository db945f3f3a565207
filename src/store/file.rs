//! File-backed storage: one JSON document holding the session keys.
//!
//! Stored at `<cache_dir>/authgate/session.json` by default. Every
//! operation reads and rewrites the whole document; the handful of keys
//! involved makes that cheaper than managing partial updates.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::StorageBackend;

/// Application name used for the default storage directory
const APP_NAME: &str = "authgate";

/// Session file name in the storage directory
const SESSION_FILE: &str = "session.json";

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    /// Backend under the platform cache directory.
    pub fn default_location() -> Result<Self> {
        let cache_dir = dirs::cache_dir().context("Could not find cache directory")?;
        Ok(Self::new(cache_dir.join(APP_NAME)))
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn save(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
