//! Durable key-value store backed by JSON files
//!
//! Each key maps to one file in the cache directory holding a self-describing
//! envelope with the value and its expiry. Writes go to a temporary file that is
//! renamed over the target, so a reader in another process never observes a
//! half-written entry.
//!
//! A set is a directory with one file per member. Adding a member is a single
//! rename, so writers in separate processes never overwrite each other.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::store::{CacheError, KvStore};

/// Envelope stored on disk for a single value
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// The cached payload
    value: String,
    /// When the value was written
    cached_at: DateTime<Utc>,
    /// When the value stops being served
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// File stored on disk for one member of a set
#[derive(Debug, Serialize, Deserialize)]
struct SetMember {
    member: String,
    expires_at: DateTime<Utc>,
}

/// Sequence for temporary file names, shared by every store in the process
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// `KvStore` that persists entries as JSON files
///
/// Uses `~/.cache/flightwatch/` on Linux (or the platform equivalent) unless a
/// directory is given explicitly.
#[derive(Debug)]
pub struct FileStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Maps a namespaced key such as `airport:data:KJFK` to a portable file stem
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl FileStore {
    /// Creates a store in the XDG cache directory
    ///
    /// Returns `None` if the directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "flightwatch")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a store rooted at `cache_dir`
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", file_stem(key)))
    }

    fn set_dir(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.set", file_stem(key)))
    }

    fn io_error(key: &str, source: std::io::Error) -> CacheError {
        CacheError::Io {
            key: key.to_string(),
            source,
        }
    }

    /// Writes `contents` to `path` through a temporary file and a rename
    async fn write_atomic(&self, key: &str, path: &Path, contents: String) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(key, e))?;
        }

        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), seq));

        fs::write(&tmp, contents)
            .await
            .map_err(|e| Self::io_error(key, e))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Self::io_error(key, e));
        }
        Ok(())
    }

    /// Reads a file, mapping "not found" to `None`
    async fn read_file(&self, key: &str, path: &Path) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(key, e)),
        }
    }

    /// Reads the members of a set directory, expired ones included
    async fn read_members(&self, key: &str, dir: &Path) -> Result<Vec<(PathBuf, SetMember)>, CacheError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(key, e)),
        };

        let mut members = Vec::new();
        while let Some(item) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error(key, e))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            // Another process may purge the member between listing and reading
            let Some(content) = self.read_file(key, &path).await? else {
                continue;
            };
            match serde_json::from_str::<SetMember>(&content) {
                Ok(member) => members.push((path, member)),
                Err(e) => warn!(key, error = %e, "skipping unreadable set member"),
            }
        }
        Ok(members)
    }

    /// Removes expired members of one set directory, returning how many went
    async fn purge_set(&self, dir: &Path, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let dir_key = dir.display().to_string();
        let mut removed = 0;
        for (path, member) in self.read_members(&dir_key, dir).await? {
            if member.expires_at <= now && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes expired and unreadable entries from the cache directory
    ///
    /// Returns the number of files removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let dir_key = self.cache_dir.display().to_string();
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Self::io_error(&dir_key, e)),
        };

        let now = Utc::now();
        let mut removed = 0;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| Self::io_error(&dir_key, e))?
        {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".set") {
                removed += self.purge_set(&path, now).await?;
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path).await else {
                continue;
            };

            let stale = serde_json::from_str::<CacheEntry>(&content)
                .map(|entry| entry.is_expired(now))
                .unwrap_or(true);

            if stale && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        debug!(removed, dir = %self.cache_dir.display(), "purged expired cache entries");
        Ok(removed)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.value_path(key);
        let Some(content) = self.read_file(key, &path).await? else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache file");
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if entry.is_expired(Utc::now()) {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Utc::now();
        let entry = CacheEntry {
            value: value.to_string(),
            cached_at: now,
            expires_at: expiry_after(now, ttl),
        };

        let json = serde_json::to_string_pretty(&entry).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.write_atomic(key, &self.value_path(key), json).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.value_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Self::io_error(key, e)),
        }
        match fs::remove_dir_all(self.set_dir(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(key, e)),
        }
    }

    async fn add_to_set(
        &self,
        set_key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = SetMember {
            member: member.to_string(),
            expires_at: expiry_after(Utc::now(), ttl),
        };
        let json = serde_json::to_string_pretty(&entry).map_err(|source| CacheError::Encode {
            key: set_key.to_string(),
            source,
        })?;
        let path = self
            .set_dir(set_key)
            .join(format!("{}.json", file_stem(member)));
        self.write_atomic(set_key, &path, json).await
    }

    async fn set_members(&self, set_key: &str) -> Result<HashSet<String>, CacheError> {
        let now = Utc::now();
        let members = self.read_members(set_key, &self.set_dir(set_key)).await?;

        Ok(members
            .into_iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(_, entry)| entry.member)
            .collect())
    }
}
