//! Fetch, mutate and republish a repository index
//!
//! Every single-chart operation runs one cycle: fetch the remote index,
//! apply exactly one merge, touch the chart object, then upload the index
//! and refresh the local cache. Steps run strictly in that order and the
//! first failure aborts the rest.
//!
//! The remote index is updated last-writer-wins. Two operators publishing
//! at once can lose one update; `reindex` rebuilds the index from storage
//! and is the recovery path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{write_local_cache, DEFAULT_CACHE_MODE};
use super::chart::{load_chart_metadata, ChartMetadata};
use super::codec::IndexSchema;
use super::config::RepoUrl;
use super::digest::digest;
use super::error::{RepoError, Result};
use super::index::{CreatedPolicy, IndexEntry, RepoIndex};
use super::storage::{ObjectStore, PutOptions, StorageError};
use super::traverse::{traverse, DEFAULT_CONCURRENCY};

/// Content type of uploaded chart archives unless overridden
pub const DEFAULT_CHART_CONTENT_TYPE: &str = "application/gzip";

/// Content type of the uploaded index
pub const INDEX_CONTENT_TYPE: &str = "application/x-yaml";

/// Options for [`Repository::init`]
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Replace an existing index with an empty one
    pub force: bool,
    pub acl: Option<String>,
}

/// Options for [`Repository::publish`]
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Replace an already published version
    pub force: bool,

    /// Succeed without changes when the version is already published
    pub ignore_if_exists: bool,

    /// Record the location relative to the index instead of absolute
    pub relative: bool,

    /// Run every check but upload nothing
    pub dry_run: bool,

    /// ACL hint for uploaded objects
    pub acl: Option<String>,

    /// Content type of the chart archive
    pub content_type: String,

    /// How `created` is set when a version is replaced
    pub created_policy: CreatedPolicy,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            force: false,
            ignore_if_exists: false,
            relative: false,
            dry_run: false,
            acl: None,
            content_type: DEFAULT_CHART_CONTENT_TYPE.to_string(),
            created_policy: CreatedPolicy::default(),
        }
    }
}

impl PublishOptions {
    pub fn validate(&self) -> Result<()> {
        if self.force && self.ignore_if_exists {
            return Err(RepoError::usage(
                "The --force and --ignore-if-exists flags are mutually exclusive and cannot be specified together.",
            ));
        }
        Ok(())
    }
}

/// Options for [`Repository::reindex`]
#[derive(Debug, Clone)]
pub struct ReindexOptions {
    /// Record locations relative to the index instead of absolute
    pub relative: bool,

    pub acl: Option<String>,

    /// Objects fetched concurrently
    pub concurrency: usize,

    /// Upload the rebuilt index even if some objects failed
    pub publish_partial: bool,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            relative: false,
            acl: None,
            concurrency: DEFAULT_CONCURRENCY,
            publish_partial: false,
        }
    }
}

/// A chart ready to publish
#[derive(Debug, Clone)]
pub struct ChartUpload {
    pub metadata: ChartMetadata,

    /// File name the archive is stored under
    pub file_name: String,

    pub digest: String,

    pub bytes: Vec<u8>,
}

impl ChartUpload {
    /// Read metadata from the archive itself and digest its bytes
    pub fn from_archive(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let file_name = file_name.into();
        let metadata = load_chart_metadata(&file_name, &bytes)?;

        Ok(Self {
            metadata,
            digest: digest(&bytes),
            file_name,
            bytes,
        })
    }
}

/// What a publish did
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Chart uploaded and index republished
    Published(IndexEntry),

    /// Version already present and `ignore_if_exists` was set; nothing changed
    AlreadyExists,

    /// Dry run; this entry would have been written
    DryRun(IndexEntry),
}

/// A chart repository: an object store plus the index describing it
pub struct Repository {
    url: RepoUrl,
    store: Arc<dyn ObjectStore>,
    schema: IndexSchema,
    cache_path: Option<PathBuf>,
    cache_mode: u32,
}

impl Repository {
    pub fn new(url: RepoUrl, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            url,
            store,
            schema: IndexSchema::default(),
            cache_path: None,
            cache_mode: DEFAULT_CACHE_MODE,
        }
    }

    pub fn with_schema(mut self, schema: IndexSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Also write every republished index to this local file
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn url(&self) -> &RepoUrl {
        &self.url
    }

    /// Upload an empty index
    pub async fn init(&self, options: &InitOptions) -> Result<()> {
        if !options.force {
            match self.store.fetch(&self.url.index_key()).await {
                Ok(_) => {
                    return Err(RepoError::usage(format!(
                        "The repository at {} is already initialized.\n\nTo replace its index with an empty one, use --force.",
                        self.url
                    )))
                }
                Err(StorageError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut index = RepoIndex::new();
        self.republish(&mut index, options.acl.clone()).await?;

        info!("Initialized repository {}", self.url);
        Ok(())
    }

    /// The remote index exactly as stored
    pub async fn fetch_raw_index(&self) -> Result<Vec<u8>> {
        let key = self.url.index_key();
        debug!("Fetching index {} from {} store", key, self.store.name());

        self.store.fetch(&key).await.map_err(|e| match e {
            StorageError::NotFound { .. } => RepoError::IndexNotFound {
                url: self.url.index_url(),
                repo_url: self.url.to_string(),
            },
            other => other.into(),
        })
    }

    pub async fn fetch_index(&self) -> Result<RepoIndex> {
        let bytes = self.fetch_raw_index().await?;
        self.schema.decode(&bytes)
    }

    /// Publish one chart
    pub async fn publish(&self, chart: ChartUpload, options: &PublishOptions) -> Result<PublishOutcome> {
        options.validate()?;

        let mut index = self.fetch_index().await?;
        let name = chart.metadata.name.clone();
        let version = chart.metadata.version.clone();

        if index.contains(&name, &version) {
            if options.ignore_if_exists {
                info!("{} {} already exists in {}, skipping", name, version, self.url);
                return Ok(PublishOutcome::AlreadyExists);
            }
            if !options.force {
                return Err(RepoError::Conflict { name, version });
            }
            debug!("Overwriting {} {} in {}", name, version, self.url);
        }

        let base_url = if options.relative { "" } else { self.url.as_str() };
        index.add_or_replace_with(
            chart.metadata,
            &chart.file_name,
            base_url,
            &chart.digest,
            options.created_policy,
        )?;

        let entry = index
            .get_version(&name, &version)
            .cloned()
            .ok_or_else(|| RepoError::ChartNotFound {
                name: name.clone(),
                version: version.clone(),
            })?;

        if options.dry_run {
            info!("Dry run: {} {} would be published to {}", name, version, self.url);
            return Ok(PublishOutcome::DryRun(entry));
        }

        let put_options = PutOptions {
            acl: options.acl.clone(),
            content_type: Some(options.content_type.clone()),
        };
        self.store
            .put(&self.url.key(&chart.file_name), &put_options, chart.bytes)
            .await?;

        self.republish(&mut index, options.acl.clone()).await?;

        info!("Published {} {} to {}", name, version, self.url);
        Ok(PublishOutcome::Published(entry))
    }

    /// Publish a packaged chart from the local filesystem
    pub async fn publish_file(&self, path: &Path, options: &PublishOptions) -> Result<PublishOutcome> {
        options.validate()?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RepoError::usage(format!("Invalid chart path {}", path.display())))?
            .to_string();

        let bytes = tokio::fs::read(path).await.map_err(|e| RepoError::Chart {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;

        self.publish(ChartUpload::from_archive(file_name, bytes)?, options)
            .await
    }

    /// Remove one chart version and its object, returning its location
    ///
    /// An object already missing from storage is logged and tolerated. An
    /// entry with no recorded location only leaves the index.
    pub async fn delete(&self, name: &str, version: &str, acl: Option<String>) -> Result<String> {
        let mut index = self.fetch_index().await?;
        let location = index.delete(name, version)?;

        if location.is_empty() {
            warn!("{} {} has no recorded location; no object to delete", name, version);
        } else {
            let key = self.url.object_key(&location)?;
            match self.store.delete(&key).await {
                Ok(()) => {}
                Err(StorageError::NotFound { .. }) => {
                    warn!("Chart object {} was already gone from storage", key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.republish(&mut index, acl).await?;

        info!("Deleted {} {} from {}", name, version, self.url);
        Ok(location)
    }

    /// Rebuild the index from the chart objects in storage and publish it
    ///
    /// Any object that could not be indexed fails the operation with
    /// `PartialTraversal`; with `publish_partial` the incomplete index is
    /// uploaded first. A cancelled rebuild never publishes.
    pub async fn reindex(&self, options: &ReindexOptions, cancel: CancellationToken) -> Result<RepoIndex> {
        let prefix = match self.url.prefix() {
            "" => String::new(),
            prefix => format!("{prefix}/"),
        };
        let base_url = if options.relative { "" } else { self.url.as_str() };

        let reindexed = traverse(
            Arc::clone(&self.store),
            &prefix,
            base_url,
            options.concurrency,
            cancel,
        )
        .await?;

        if reindexed.was_cancelled() || reindexed.is_complete() || !options.publish_partial {
            let mut index = reindexed.into_index()?;
            self.republish(&mut index, options.acl.clone()).await?;
            info!("Reindexed {}: {} version(s)", self.url, index.version_count());
            return Ok(index);
        }

        warn!(
            "Publishing partial index for {}: {} object(s) failed",
            self.url,
            reindexed.failures.len()
        );
        let failed = reindexed.failures.len();
        let total = reindexed.scanned;
        let mut index = reindexed.index;
        self.republish(&mut index, options.acl.clone()).await?;

        Err(RepoError::PartialTraversal { failed, total })
    }

    async fn republish(&self, index: &mut RepoIndex, acl: Option<String>) -> Result<()> {
        index.sort_entries();
        let bytes = self.schema.encode(index)?;

        let options = PutOptions {
            acl,
            content_type: Some(INDEX_CONTENT_TYPE.to_string()),
        };
        self.store
            .put(&self.url.index_key(), &options, bytes.clone())
            .await?;

        if let Some(path) = &self.cache_path {
            write_local_cache(path, &bytes, self.cache_mode)?;
        }

        Ok(())
    }
}
