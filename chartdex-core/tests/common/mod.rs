//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern.

#![allow(dead_code)]

use async_trait::async_trait;
use chartdex_core::repo::{MemoryStore, ObjectInfo, ObjectStore, PutOptions, StorageError};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Build a gzip-compressed tarball from `(path, content)` pairs
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let encoder = GzEncoder::new(&mut bytes, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }
    bytes
}

/// A packaged chart with a minimal `Chart.yaml`
pub fn chart_archive(name: &str, version: &str) -> Vec<u8> {
    let descriptor = format!(
        "apiVersion: v2\nname: {name}\nversion: {version}\ndescription: {name} test chart\n"
    );
    let path = format!("{name}/Chart.yaml");
    tarball(&[
        (path.as_str(), descriptor.as_str()),
        (format!("{name}/values.yaml").as_str(), "replicas: 1\n"),
    ])
}

/// Store wrapper that counts every call reaching the backend
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    fetches: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.fetches() + self.puts() + self.deletes() + self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(key).await
    }

    async fn put(&self, key: &str, options: &PutOptions, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, options, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<ObjectInfo, StorageError>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(prefix)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
