//! Durable JSON record store.
//!
//! Records live one per file under `<root>/<collection>/<key>.json`. Writes go
//! to a temporary file that is synced and renamed over the old record, so a
//! crash leaves either the old or the new record, never a torn one.

use std::fs::{self, File};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};

/// A directory of JSON documents grouped into collections.
#[derive(Debug)]
pub struct RecordStore {
    root: PathBuf,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl RecordStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads a record, returning `None` if it has never been written.
    pub fn read<T: DeserializeOwned>(&self, collection: &str, key: &str) -> StoreResult<Option<T>> {
        let path = self.record_path(collection, key)?;

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Writes a record, replacing any previous version atomically.
    pub fn write<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> StoreResult<()> {
        let path = self.record_path(collection, key)?;
        let content = serde_json::to_vec_pretty(value)?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let dir = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let io_err = |source: io::Error| StoreError::Io {
            path: tmp.clone(),
            source,
        };
        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(&content).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }

    fn record_path(&self, collection: &str, key: &str) -> StoreResult<PathBuf> {
        let collection = sanitize(collection)?;
        let key = sanitize(key)?;
        Ok(self.root.join(collection).join(format!("{key}.json")))
    }
}

/// Maps a key onto a safe file name.
///
/// `[A-Za-z0-9.-]` pass through; every other byte, `_` included, becomes
/// `_XX` in upper-case hex. Distinct keys always get distinct file names.
fn sanitize(raw: &str) -> StoreResult<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-') {
            cleaned.push(char::from(byte));
        } else {
            // Writing to a String cannot fail
            let _ = write!(cleaned, "_{byte:02X}");
        }
    }

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(StoreError::InvalidKey(raw.to_string()));
    }
    Ok(cleaned)
}
