//! Rebuilding an index from the objects actually in storage
//!
//! ```text
//!  list(prefix) ──► producer ──── items (bounded) ────► consumer
//!                   fetch, digest,                      add_or_replace,
//!                   read Chart.yaml                     sort_entries
//!                      │                                   │
//!                      └─ failures ──► caller ◄── index ───┘
//! ```
//!
//! Chart metadata comes from the `Chart.yaml` embedded in each archive, never
//! from the object key. One bad object does not stop the others; every
//! failure is reported and the caller decides whether a partial index is
//! acceptable.
//!
//! Objects finish in any order. When two archives declare the same chart
//! name and version, the one with the lowest key wins regardless of which
//! fetch completed last.

use futures::future;
use futures::stream::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chart::{load_chart_metadata, parse_version, ChartMetadata, CHART_EXTENSION};
use super::digest::digest;
use super::error::{RepoError, Result};
use super::index::RepoIndex;
use super::storage::{ObjectInfo, ObjectStore, StorageError};

/// Objects fetched concurrently unless configured otherwise
pub const DEFAULT_CONCURRENCY: usize = 4;

/// A successfully read chart object
#[derive(Debug, Clone)]
pub struct ChartItem {
    pub metadata: ChartMetadata,

    /// File name relative to the traversal prefix
    pub file_name: String,

    /// Full storage key
    pub key: String,

    pub digest: String,
}

/// An object that could not be indexed
#[derive(Debug)]
pub struct TraverseFailure {
    pub key: String,
    pub error: RepoError,
}

/// Result of a full traversal
#[derive(Debug)]
pub struct Reindexed {
    /// Index covering every object that was read successfully
    pub index: RepoIndex,

    /// One record per failed object (plus one if cancelled)
    pub failures: Vec<TraverseFailure>,

    /// Chart objects processed, successful or not
    pub scanned: usize,
}

impl Reindexed {
    /// Whether every listed chart made it into the index
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f.error, RepoError::Cancelled))
    }

    /// The outcome as a `Result`, failing on cancellation or any failed object
    pub fn into_index(self) -> Result<RepoIndex> {
        if self.was_cancelled() {
            return Err(RepoError::Cancelled);
        }

        if !self.failures.is_empty() {
            return Err(RepoError::PartialTraversal {
                failed: self.failures.len(),
                total: self.scanned,
            });
        }

        Ok(self.index)
    }
}

/// Walk every chart archive under `prefix` and fold them into a fresh index
///
/// Locations are `base_url` joined with each object's key relative to
/// `prefix`; an empty `base_url` yields relative locations.
pub async fn traverse(
    store: Arc<dyn ObjectStore>,
    prefix: &str,
    base_url: &str,
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<Reindexed> {
    let concurrency = concurrency.max(1);
    let (item_tx, mut item_rx) = mpsc::channel::<ChartItem>(concurrency * 2);
    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<TraverseFailure>();

    let producer = {
        let failure_tx = failure_tx.clone();
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            let mut scanned = 0usize;

            let work = store
                .list(&prefix)
                .try_filter(|info| future::ready(is_chart_key(&info.key)))
                .map(|listed| {
                    let store = Arc::clone(&store);
                    let prefix = prefix.clone();
                    async move {
                        match listed {
                            Ok(info) => index_object(store.as_ref(), &prefix, info).await,
                            Err(error) => Err(TraverseFailure {
                                key: prefix,
                                error: error.into(),
                            }),
                        }
                    }
                })
                .buffer_unordered(concurrency);
            tokio::pin!(work);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        warn!("Traversal of '{}' cancelled after {} object(s)", prefix, scanned);
                        let _ = failure_tx.send(TraverseFailure {
                            key: prefix.clone(),
                            error: RepoError::Cancelled,
                        });
                        break;
                    }

                    next = work.next() => match next {
                        Some(Ok(item)) => {
                            scanned += 1;
                            debug!("Read {} {} from {}", item.metadata.name, item.metadata.version, item.key);
                            if item_tx.send(item).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(failure)) => {
                            scanned += 1;
                            warn!("Skipping {}: {}", failure.key, failure.error);
                            let _ = failure_tx.send(failure);
                        }
                        None => break,
                    },
                }
            }

            scanned
        })
    };

    let consumer = {
        let failure_tx = failure_tx.clone();
        let base_url = base_url.to_string();

        tokio::spawn(async move {
            let mut index = RepoIndex::new();
            // (name, version) -> key of the object currently indexed for it
            let mut owners: HashMap<(String, String), String> = HashMap::new();

            while let Some(item) = item_rx.recv().await {
                let slot = (item.metadata.name.clone(), canonical_version(&item.metadata.version));

                if let Some(owner) = owners.get(&slot) {
                    if owner.as_str() < item.key.as_str() {
                        warn!(
                            "Ignoring {}: {} {} is already indexed from {}",
                            item.key, slot.0, slot.1, owner
                        );
                        continue;
                    }
                    warn!(
                        "{} {} is declared by both {} and {}; keeping {}",
                        slot.0, slot.1, owner, item.key, item.key
                    );
                }

                match index.add_or_replace(item.metadata, &item.file_name, &base_url, &item.digest) {
                    Ok(()) => {
                        owners.insert(slot, item.key);
                    }
                    Err(error) => {
                        warn!("Skipping {}: {}", item.key, error);
                        let _ = failure_tx.send(TraverseFailure {
                            key: item.key,
                            error,
                        });
                    }
                }
            }

            index.sort_entries();
            index
        })
    };

    // Only the tasks hold senders now; the channel closes when both finish.
    drop(failure_tx);

    let mut failures = Vec::new();
    while let Some(failure) = failure_rx.recv().await {
        failures.push(failure);
    }

    let scanned = producer.await.map_err(|e| task_failed(prefix, e))?;
    let index = consumer.await.map_err(|e| task_failed(prefix, e))?;

    info!(
        "Traversed {} chart object(s) under '{}': {} version(s), {} failure(s)",
        scanned,
        prefix,
        index.version_count(),
        failures.len()
    );

    Ok(Reindexed {
        index,
        failures,
        scanned,
    })
}

/// Only packaged charts take part in a traversal
pub fn is_chart_key(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .and_then(|name| name.strip_suffix(CHART_EXTENSION))
        .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
}

/// Versions that compare equal share one slot (`v1.0.0` and `1.0.0`)
fn canonical_version(version: &str) -> String {
    parse_version(version)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| version.to_string())
}

async fn index_object(
    store: &dyn ObjectStore,
    prefix: &str,
    info: ObjectInfo,
) -> std::result::Result<ChartItem, TraverseFailure> {
    let bytes = match store.fetch(&info.key).await {
        Ok(bytes) => bytes,
        Err(error) => {
            return Err(TraverseFailure {
                key: info.key,
                error: error.into(),
            })
        }
    };

    let metadata = match load_chart_metadata(&info.key, &bytes) {
        Ok(metadata) => metadata,
        Err(error) => {
            return Err(TraverseFailure {
                key: info.key,
                error,
            })
        }
    };

    let file_name = info
        .key
        .strip_prefix(prefix)
        .unwrap_or(&info.key)
        .trim_start_matches('/')
        .to_string();

    Ok(ChartItem {
        metadata,
        file_name,
        digest: digest(&bytes),
        key: info.key,
    })
}

fn task_failed(prefix: &str, error: tokio::task::JoinError) -> RepoError {
    RepoError::Storage(StorageError::Io {
        key: prefix.to_string(),
        source: std::io::Error::other(error),
    })
}
