//! Key-value persistence backends
//!
//! Values are opaque strings (JSON documents in practice). `FileStore`
//! keeps one file per key and replaces it atomically; `MemoryStore` is
//! used by tests and ephemeral sessions.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Minimal string key-value store
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when the key has never been written
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// File Store
// ─────────────────────────────────────────────────────────────────

/// One `<key>.json` file per key under a data directory
pub struct FileStore {
    dir: PathBuf,
    /// Serializes writers sharing the temp file
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::IoWrite {
            path: dir.clone(),
            source: e,
        })?;
        debug!(dir = %dir.display(), "File store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoRead { path, source: e }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        let _write = self.write_lock.lock();
        let write_err = |e| Error::IoWrite {
            path: tmp_path.clone(),
            source: e,
        };

        let mut tmp = File::create(&tmp_path).map_err(write_err)?;
        tmp.write_all(value.as_bytes()).map_err(write_err)?;
        tmp.sync_all().map_err(write_err)?;
        drop(tmp);

        fs::rename(&tmp_path, &path).map_err(|e| Error::IoWrite {
            path: path.clone(),
            source: e,
        })?;
        trace!(key, bytes = value.len(), "Stored value");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IoWrite { path, source: e }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}
