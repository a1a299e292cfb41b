//! Object store abstraction
//!
//! The engine only talks to storage through [`ObjectStore`]:
//! - `MemoryStore` (in-process, tests and dry runs)
//! - `LocalStore` (a directory, for `file://` repositories)
//!
//! Remote stores (`s3://`) plug in behind the same trait.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use super::config::RepoUrl;
use super::error::{RepoError, Result};

/// Failures reported by an object store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                key: key.to_string(),
            }
        } else {
            StorageError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

/// A listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Upload hints passed through to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Canned ACL (e.g. "private", "public-read")
    pub acl: Option<String>,

    /// MIME type of the object
    pub content_type: Option<String>,
}

/// Trait for object store backends
///
/// Keys are `/`-separated and relative to the store root. Session and
/// credential setup happen before a store is handed to the engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite an object
    async fn put(&self, key: &str, options: &PutOptions, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Remove an object
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lazily list every object whose key starts with `prefix`
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectInfo, StorageError>>;

    /// Backend identifier for logging
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    options: PutOptions,
}

/// In-memory object store
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without going through [`ObjectStore::put`]
    pub async fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(
            key.into(),
            StoredObject {
                bytes: bytes.into(),
                options: PutOptions::default(),
            },
        );
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).map(|o| o.bytes.clone())
    }

    /// Options the object was last uploaded with
    pub async fn get_options(&self, key: &str) -> Option<PutOptions> {
        self.objects.read().await.get(key).map(|o| o.options.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key).await.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    async fn put(&self, key: &str, options: &PutOptions, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                options: options.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectInfo, StorageError>> {
        // One key per step, resuming after the last key yielded
        let start = Some(Bound::Included(prefix.to_string()));

        stream::unfold(start, move |lower| async move {
            let lower = lower?;
            let objects = self.objects.read().await;
            let (key, object) = objects.range((lower, Bound::Unbounded)).next()?;
            if !key.starts_with(prefix) {
                return None;
            }

            let info = ObjectInfo {
                key: key.clone(),
                size: object.bytes.len() as u64,
            };
            Some((Ok(info), Some(Bound::Excluded(key.clone()))))
        })
        .boxed()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Listed entries buffered ahead of the consumer by [`LocalStore`]
const LIST_BUFFER: usize = 64;

/// Directory-backed object store
///
/// ACL and content type hints have no filesystem equivalent and are
/// ignored.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if key.is_empty() || escapes {
            return Err(StorageError::Io {
                key: key.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "key must be a relative path inside the repository",
                ),
            });
        }

        Ok(self.root.join(relative))
    }

    /// Walk the root and send each matching file as it is found
    ///
    /// Stops at the first error or once the receiver is dropped.
    fn scan(root: &Path, prefix: &str, tx: &mpsc::Sender<Result<ObjectInfo, StorageError>>) {
        if !root.exists() {
            return;
        }

        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let listed = match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }

                    let Ok(relative) = entry.path().strip_prefix(root) else {
                        continue;
                    };
                    let key = relative
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");

                    if !key.starts_with(prefix) {
                        continue;
                    }

                    match entry.metadata() {
                        Ok(metadata) => Ok(ObjectInfo {
                            key,
                            size: metadata.len(),
                        }),
                        Err(e) => Err(StorageError::Io {
                            key,
                            source: e.into(),
                        }),
                    }
                }
                Err(e) => Err(StorageError::Io {
                    key: prefix.to_string(),
                    source: e.into(),
                }),
            };

            let failed = listed.is_err();
            if tx.blocking_send(listed).is_err() || failed {
                return;
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn put(&self, key: &str, options: &PutOptions, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }

        trace!(
            "Writing {} ({} bytes, content type {:?})",
            path.display(),
            bytes.len(),
            options.content_type
        );
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectInfo, StorageError>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        // The walk starts on first poll and runs ahead by at most LIST_BUFFER entries
        stream::once(async move {
            let (tx, rx) = mpsc::channel(LIST_BUFFER);
            tokio::task::spawn_blocking(move || Self::scan(&root, &prefix, &tx));

            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|listed| (listed, rx)) })
        })
        .flatten()
        .boxed()
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Open the store backing a repository URL
pub fn store_for(url: &RepoUrl) -> Result<Arc<dyn ObjectStore>> {
    match url.scheme() {
        "file" => {
            debug!("Using local store at {}", url.location());
            Ok(Arc::new(LocalStore::new(url.location())))
        }
        other => Err(RepoError::usage(format!(
            "No object store client is configured for '{other}://' repositories.\n\nUse a file:// repository, or drive the library with your own ObjectStore implementation."
        ))),
    }
}

#[cfg(test)]
mod storage_tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let options = PutOptions {
            acl: Some("public-read".to_string()),
            content_type: Some("application/gzip".to_string()),
        };

        store.put("charts/a.tgz", &options, b"abc".to_vec()).await.unwrap();

        assert_eq!(store.fetch("charts/a.tgz").await.unwrap(), b"abc");
        assert_eq!(store.get_options("charts/a.tgz").await.unwrap(), options);

        store.delete("charts/a.tgz").await.unwrap();
        assert!(matches!(
            store.fetch("charts/a.tgz").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(store.delete("charts/a.tgz").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_list_prefix() {
        let store = MemoryStore::new();
        store.insert("charts/a.tgz", b"a".to_vec()).await;
        store.insert("charts/b.tgz", b"bb".to_vec()).await;
        store.insert("other/c.tgz", b"c".to_vec()).await;

        let listed: Vec<ObjectInfo> = store.list("charts/").try_collect().await.unwrap();
        assert_eq!(
            listed,
            vec![
                ObjectInfo { key: "charts/a.tgz".to_string(), size: 1 },
                ObjectInfo { key: "charts/b.tgz".to_string(), size: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_store_list_is_lazy() {
        let store = MemoryStore::new();
        store.insert("charts/a.tgz", b"a".to_vec()).await;
        store.insert("charts/c.tgz", b"c".to_vec()).await;

        let mut listing = store.list("charts/");
        let first = listing.next().await.unwrap().unwrap();
        assert_eq!(first.key, "charts/a.tgz");

        // Keys added behind the cursor before the next step are still seen
        store.insert("charts/b.tgz", b"b".to_vec()).await;
        let rest: Vec<String> = listing.map_ok(|o| o.key).try_collect().await.unwrap();
        assert_eq!(rest, vec!["charts/b.tgz", "charts/c.tgz"]);
    }

    #[tokio::test]
    async fn test_local_store_list_streams_and_stops_early() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..200 {
            std::fs::write(temp_dir.path().join(format!("chart-{i:03}.tgz")), b"x").unwrap();
        }
        let store = LocalStore::new(temp_dir.path());

        let first: Vec<ObjectInfo> = store.list("").take(2).try_collect().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].key, "chart-000.tgz");

        let all: Vec<ObjectInfo> = store.list("chart-1").try_collect().await.unwrap();
        assert_eq!(all.len(), 100);
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path());

        store
            .put("nested/a.tgz", &PutOptions::default(), b"abc".to_vec())
            .await
            .unwrap();
        store
            .put("index.yaml", &PutOptions::default(), b"apiVersion: v1\n".to_vec())
            .await
            .unwrap();

        assert_eq!(store.fetch("nested/a.tgz").await.unwrap(), b"abc");

        let mut keys: Vec<String> = store
            .list("")
            .map_ok(|o| o.key)
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["index.yaml", "nested/a.tgz"]);

        store.delete("nested/a.tgz").await.unwrap();
        assert!(matches!(
            store.fetch("nested/a.tgz").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path());

        assert!(store.fetch("../secret").await.is_err());
        assert!(store.fetch("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_local_store_missing_root_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path().join("missing"));

        let listed: Vec<ObjectInfo> = store.list("").try_collect().await.unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_store_for_scheme() {
        let url = RepoUrl::parse("file:///tmp/charts").unwrap();
        assert_eq!(store_for(&url).unwrap().name(), "local");

        let url = RepoUrl::parse("s3://bucket/charts").unwrap();
        assert!(store_for(&url).is_err());
    }
}
