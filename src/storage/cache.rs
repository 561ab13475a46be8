//! Disk-backed response cache.
//!
//! Bodies are stored as flat blob files named by a random entry id. A JSON
//! index (`cache.json`) maps request keys to entries and is loaded once at
//! open and rewritten wholesale by [`CacheStore::persist`].
//!
//! # Features
//! - Atomic writes using temp file + rename (prevents torn blobs)
//! - Blob writes run on the blocking pool, off the request path
//! - Graceful degradation on missing/corrupt index
//!
//! Entries are never evicted, only superseded.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{FetchqError, Result};

/// Name of the index file inside the cache directory.
pub const INDEX_FILE: &str = "cache.json";

/// One cached response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Blob file name.
    pub id: String,
    /// Request key. Stored as the index member name, not in the record.
    #[serde(skip)]
    pub key: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expiry: DateTime<Utc>,
    pub etag: Option<String>,
}

impl CacheEntry {
    /// Whether the entry has passed its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    dirty: bool,
}

/// Response cache rooted at one directory.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    index: Mutex<CacheIndex>,
}

impl CacheStore {
    /// Open (or create) a cache in `dir`.
    ///
    /// A missing index is an empty cache. An unreadable or corrupt index is
    /// logged and also treated as empty.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let entries = load_index(&dir.join(INDEX_FILE));
        tracing::info!(dir = %dir.display(), entries = entries.len(), "Opened response cache");

        Ok(Self {
            dir,
            index: Mutex::new(CacheIndex {
                entries,
                dirty: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Path of the blob for `entry`.
    #[must_use]
    pub fn blob_path(&self, entry: &CacheEntry) -> PathBuf {
        self.dir.join(&entry.id)
    }

    /// Whether a cached copy of `key` must be re-fetched.
    #[must_use]
    pub fn is_stale(
        &self,
        key: &str,
        last_updated: Option<DateTime<Utc>>,
        etag: Option<&str>,
    ) -> bool {
        self.is_stale_at(key, last_updated, etag, Utc::now())
    }

    /// [`is_stale`](Self::is_stale) evaluated at a fixed instant.
    ///
    /// First match wins: no entry, expired, `last_updated` newer than the
    /// entry, etags present and different. A call with neither validator is
    /// always stale.
    #[must_use]
    pub fn is_stale_at(
        &self,
        key: &str,
        last_updated: Option<DateTime<Utc>>,
        etag: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let index = self.lock();
        let Some(entry) = index.entries.get(key) else {
            return true;
        };
        if entry.is_expired_at(now) {
            return true;
        }
        if last_updated.is_none() && etag.is_none() {
            return true;
        }
        if last_updated.is_some_and(|updated| updated > entry.created) {
            return true;
        }
        matches!((etag, entry.etag.as_deref()), (Some(hint), Some(stored)) if hint != stored)
    }

    /// Record `data` for `key` and write its blob in the background.
    ///
    /// The index is updated before returning. An existing entry keeps its
    /// id so the new blob replaces the old file. Empty bodies and calls
    /// without any validator are skipped.
    ///
    /// Returns the handle of the blob write, if one was started. Write
    /// failures are logged and never reported otherwise.
    pub fn save(
        &self,
        key: &str,
        data: Bytes,
        last_updated: Option<DateTime<Utc>>,
        expiry: DateTime<Utc>,
        etag: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        if data.is_empty() {
            tracing::debug!(key, "Not caching empty body");
            return None;
        }
        if last_updated.is_none() && etag.is_none() {
            tracing::debug!(key, "Not caching response without validators");
            return None;
        }

        let now = Utc::now();
        let entry = {
            let mut index = self.lock();
            let entry = index
                .entries
                .entry(key.to_string())
                .and_modify(|entry| {
                    entry.created = now;
                    entry.expiry = expiry;
                    entry.etag = etag.map(str::to_string);
                })
                .or_insert_with(|| CacheEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    key: key.to_string(),
                    created: now,
                    expiry,
                    etag: etag.map(str::to_string),
                })
                .clone();
            index.dirty = true;
            entry
        };

        tracing::debug!(key, id = %entry.id, bytes = data.len(), "Saving response to cache");

        let path = self.blob_path(&entry);
        let key = entry.key;
        let write = move || {
            if let Err(e) = write_atomic(&path, &data) {
                let err = FetchqError::CacheWriteFailed {
                    key,
                    message: e.to_string(),
                };
                tracing::warn!(error = %err, "Failed to write cache blob");
            }
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            Some(handle.spawn_blocking(write))
        } else {
            write();
            None
        }
    }

    /// Open the blob for a fresh entry.
    ///
    /// # Errors
    ///
    /// `EntryNotFound` if the index has no entry for `key`; an I/O error if
    /// the blob file is missing despite the entry.
    pub async fn get_stream(&self, key: &str) -> Result<tokio::fs::File> {
        let path = {
            let index = self.lock();
            let entry = index
                .entries
                .get(key)
                .ok_or_else(|| FetchqError::EntryNotFound {
                    key: key.to_string(),
                })?;
            self.blob_path(entry)
        };
        Ok(tokio::fs::File::open(&path).await?)
    }

    /// Rewrite the index file.
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be serialized or written.
    pub fn persist(&self) -> Result<()> {
        let (content, count) = {
            let mut index = self.lock();
            let sorted: BTreeMap<&String, &CacheEntry> = index.entries.iter().collect();
            let content = serde_json::to_vec_pretty(&sorted)?;
            let count = sorted.len();
            index.dirty = false;
            (content, count)
        };

        if let Err(e) = write_atomic(&self.index_path(), &content) {
            self.lock().dirty = true;
            return Err(e.into());
        }
        tracing::info!(
            entries = count,
            path = %self.index_path().display(),
            "Persisted cache index"
        );
        Ok(())
    }

    /// Whether the in-memory index has changes not yet persisted.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Snapshot of all entries sorted by key.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if self.is_dirty()
            && let Err(e) = self.persist()
        {
            tracing::warn!(error = %e, "Failed to persist cache index on drop");
        }
    }
}

fn load_index(path: &Path) -> HashMap<String, CacheEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read cache index, starting empty"
            );
            return HashMap::new();
        }
    };

    match serde_json::from_str::<HashMap<String, CacheEntry>>(&content) {
        Ok(mut entries) => {
            for (key, entry) in &mut entries {
                entry.key.clone_from(key);
            }
            entries
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Corrupt cache index, starting empty"
            );
            HashMap::new()
        }
    }
}

/// Write via a uniquely named temp file in the same directory, then rename.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("blob"),
        uuid::Uuid::new_v4().simple()
    ));

    let written = std::fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(content)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| std::fs::rename(&temp_path, path)) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
