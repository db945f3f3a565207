//! Failure-tolerant session storage.
//!
//! `SessionStore` wraps a [`StorageBackend`] and absorbs every fault the
//! backend can raise - quota, missing keychain, serialization - logging
//! at warn level and degrading to a no-op. The session layer keeps
//! functioning with in-memory-only state when persistence is unavailable,
//! so no error from this module ever reaches a caller.

pub mod file;
pub mod keychain;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

pub use file::FileBackend;
pub use keychain::KeychainBackend;
pub use memory::MemoryBackend;

/// Storage keys owned by the session domain.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const USER: &str = "user";
    pub const LOGGED_IN_AT: &str = "logged_in_at";

    pub(super) const ALL: &[&str] = &[ACCESS_TOKEN, REFRESH_TOKEN, USER, LOGGED_IN_AT];
}

/// Minimal persistent key-value interface the store runs against.
/// Implementations may fail freely; the store absorbs it.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Shared handle over a storage backend. Clone is cheap.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// In-memory store, used in tests and as the fallback when no
    /// persistent tier is available.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.read(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "storage read failed, treating as absent");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.write(key, value) {
            warn!(key, error = %e, "storage write failed, continuing in-memory");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!(key, error = %e, "storage remove failed");
        }
    }

    /// Remove every key owned by the session domain.
    pub fn clear_all(&self) {
        for key in keys::ALL {
            self.remove(key);
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "stored value failed to parse, treating as absent");
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw),
            Err(e) => warn!(key, error = %e, "value failed to serialize, skipping persist"),
        }
    }
}
