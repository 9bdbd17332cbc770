//! Persistent key → string backends.
//!
//! Two backends are available:
//!   - **JSON** (default): loads entirely into memory, every write persisted
//!     atomically via temp+rename.
//!   - **RocksDB** (behind `rocksdb` feature): write-through, durability via WAL.
//!
//! [`MemoryBackend`] keeps nothing on disk and is meant for ephemeral stores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{StoreError, StoreResult};

/// Storage primitive under [`crate::LocalStore`]. Values are opaque strings.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
    /// All keys, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

// ── JSON file backend ────────────────────────────────────────────────────────

/// In-memory map persisted to a single JSON file.
pub struct JsonFileBackend {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileBackend {
    /// Load or create a store file at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let open_err = |reason: String| StoreError::Open {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| open_err(format!("creating {}: {e}", parent.display())))?;
            }
        }

        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| open_err(format!("reading: {e}")))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| open_err(format!("parsing: {e}")))?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened JSON store");

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic write: write to temp file, then rename
    fn persist(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvBackend for JsonFileBackend {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.write();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.write();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.read().keys().cloned().collect())
    }
}

// ── Memory backend ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.keys().cloned().collect())
    }
}

// ── RocksDB backend ──────────────────────────────────────────────────────────

#[cfg(feature = "rocksdb")]
mod rocksdb_backend {
    use super::*;

    /// RocksDB-backed store. Writes go straight to the database.
    pub struct RocksDbBackend {
        db: rocksdb::DB,
    }

    impl RocksDbBackend {
        /// Open or create a RocksDB store at the given path.
        pub fn open(path: &Path) -> StoreResult<Self> {
            let mut opts = rocksdb::Options::default();
            opts.create_if_missing(true);

            let db = rocksdb::DB::open(&opts, path).map_err(|e| StoreError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Ok(Self { db })
        }
    }

    fn backend_err(e: rocksdb::Error) -> StoreError {
        StoreError::Backend(e.to_string())
    }

    impl KvBackend for RocksDbBackend {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            match self.db.get(key.as_bytes()).map_err(backend_err)? {
                Some(bytes) => String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| StoreError::Backend(format!("value for {key} is not UTF-8: {e}"))),
                None => Ok(None),
            }
        }

        fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.db
                .put(key.as_bytes(), value.as_bytes())
                .map_err(backend_err)
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            self.db.delete(key.as_bytes()).map_err(backend_err)
        }

        fn keys(&self) -> StoreResult<Vec<String>> {
            let mut keys = Vec::new();
            for item in self.db.iterator(rocksdb::IteratorMode::Start) {
                let (key, _) = item.map_err(backend_err)?;
                keys.push(String::from_utf8_lossy(&key).into_owned());
            }
            Ok(keys)
        }
    }
}

#[cfg(feature = "rocksdb")]
pub use rocksdb_backend::RocksDbBackend;

/// Open the appropriate backend based on path extension.
///
/// Paths ending in `.json` use the JSON backend; otherwise RocksDB (if compiled
/// with `rocksdb`).
pub fn open_backend(path: &Path) -> StoreResult<Arc<dyn KvBackend>> {
    let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);

    #[cfg(feature = "rocksdb")]
    if !is_json {
        return Ok(Arc::new(RocksDbBackend::open(path)?));
    }

    #[cfg(not(feature = "rocksdb"))]
    if !is_json {
        tracing::warn!(
            path = %path.display(),
            "RocksDB not compiled in (missing 'rocksdb' feature), falling back to JSON backend"
        );
    }

    Ok(Arc::new(JsonFileBackend::open(path)?))
}
