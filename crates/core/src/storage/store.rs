//! Key–value store contract for shard persistence.
//!
//! The manager only needs five operations over opaque byte values; anything
//! that can satisfy [`ShardStore`] can hold a collection. Two minimal
//! implementations ship with the crate: [`MemoryStore`] for tests and
//! ephemeral embeddings, and [`FsStore`] mapping each key to one file in a
//! directory with atomic temp-file + rename writes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Byte-oriented key–value storage for shard images.
///
/// All operations may fail; failures propagate to the caller of the
/// triggering manager operation. The store is shared state: two managers
/// over the same key namespace must be serialized by the caller.
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Writes (or replaces) the value under `key`.
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Reads the value under `key`, or `None` if absent.
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Deletes the value under `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> io::Result<bool>;

    /// Lists all keys, in no particular order.
    async fn list(&self) -> io::Result<Vec<String>>;

    /// Returns whether a value exists under `key`.
    async fn exists(&self, key: &str) -> io::Result<bool>;
}

impl std::fmt::Debug for dyn ShardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ShardStore")
    }
}

/// In-memory store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShardStore for MemoryStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> io::Result<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    async fn exists(&self, key: &str) -> io::Result<bool> {
        Ok(self.entries.lock().await.contains_key(key))
    }
}

/// Filesystem store: one file per key inside a root directory.
///
/// Writes go to a temp file first and are renamed into place, so a crash
/// mid-write never leaves a half-written shard under its key.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (creating if needed) a store rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ShardStore for FsStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.key_path(key);
        let tmp = self.root.join(format!("{key}.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> io::Result<bool> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> io::Result<bool> {
        Ok(self.key_path(key).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.read("k").await.unwrap().is_none());
        assert!(!store.exists("k").await.unwrap());

        store.write("k", b"payload").await.unwrap();
        assert_eq!(store.read("k").await.unwrap().unwrap(), b"payload");
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec!["k".to_string()]);

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        store.write("shard-000000", b"abc").await.unwrap();
        store.write("shard-000001", b"def").await.unwrap();
        assert_eq!(
            store.read("shard-000000").await.unwrap().unwrap(),
            b"abc"
        );

        let mut keys = store.list().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["shard-000000", "shard-000001"]);

        assert!(store.delete("shard-000000").await.unwrap());
        assert!(!store.exists("shard-000000").await.unwrap());
        assert!(store.read("shard-000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_store_overwrite_is_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.write("k", b"one").await.unwrap();
        store.write("k", b"two").await.unwrap();
        assert_eq!(store.read("k").await.unwrap().unwrap(), b"two");
        // No stray temp files left behind
        assert_eq!(store.list().await.unwrap(), vec!["k".to_string()]);
    }
}
