//! Chart repository index engine
//!
//! Keeps a repository's `index.yaml` in step with the chart archives
//! actually present in its object store.
//!
//! # Overview
//!
//! - Publish and delete single charts with a fetch, merge, republish cycle
//! - Rebuild the whole index from storage when it drifts or is lost
//! - Read and write both the legacy and the current index layouts
//! - Manage named repositories and their local index caches
//!
//! # Architecture
//!
//! ```text
//! Object store (s3://bucket/prefix, file:///dir)
//!     │
//!     ├── index.yaml   ← RepoIndex, encoded by IndexSchema
//!     └── *.tgz        ← Chart archives, Chart.yaml inside
//!            │
//!            ▼
//!     Repository (publish / delete / reindex)
//!            │
//!            ▼
//!     <home>/cache/<name>-index.yaml ← Local copy of the last index written
//! ```

mod cache;
mod chart;
mod codec;
mod config;
mod digest;
mod error;
mod index;
mod storage;
mod sync;
mod traverse;

pub use cache::{write_local_cache, DEFAULT_CACHE_MODE};
pub use chart::{load_chart_metadata, parse_version, ChartMetadata, CHART_DESCRIPTOR, CHART_EXTENSION};
pub use codec::IndexSchema;
pub use config::{home_dir, CatalogConfig, RepoCatalog, RepoEntry, RepoUrl, HOME_ENV};
pub use digest::{digest, DIGEST_ALGORITHM};
pub use error::{ErrorKind, RepoError, Result};
pub use index::{join_location, zero_time, CreatedPolicy, IndexEntry, RepoIndex, INDEX_API_VERSION, INDEX_FILE};
pub use storage::{store_for, LocalStore, MemoryStore, ObjectInfo, ObjectStore, PutOptions, StorageError};
pub use sync::{
    ChartUpload, InitOptions, PublishOptions, PublishOutcome, ReindexOptions, Repository,
    DEFAULT_CHART_CONTENT_TYPE, INDEX_CONTENT_TYPE,
};
pub use traverse::{is_chart_key, traverse, ChartItem, Reindexed, TraverseFailure, DEFAULT_CONCURRENCY};
