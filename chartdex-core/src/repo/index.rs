//! Repository index model and merge operations
//!
//! The index (`index.yaml`) lists every published chart version in a
//! repository together with its download locations and content digest.
//! All mutation happens in memory; encoding lives in [`super::codec`].

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::chart::{parse_version, ChartMetadata};
use super::error::{RepoError, Result};

/// Schema marker written into new indexes
pub const INDEX_API_VERSION: &str = "v1";

/// File name of the index inside a repository
pub const INDEX_FILE: &str = "index.yaml";

/// How `created` is treated when an existing version is replaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreatedPolicy {
    /// A replacement is a fresh publish and gets a new timestamp
    #[default]
    Refresh,
    /// Keep the timestamp of the first publish
    Preserve,
}

/// A repository index
#[derive(Debug, Clone, PartialEq)]
pub struct RepoIndex {
    /// Schema marker
    pub api_version: String,

    /// When the index was last mutated
    pub generated: DateTime<Utc>,

    /// Chart versions keyed by chart name
    pub entries: BTreeMap<String, Vec<IndexEntry>>,

    /// Top-level fields this crate does not interpret (e.g. `serverInfo`),
    /// carried through every read-modify-write
    pub extra: BTreeMap<String, serde_yaml_ng::Value>,
}

/// One published version of one chart
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Chart metadata (name, version, descriptive fields)
    pub metadata: ChartMetadata,

    /// Download locations, primary first
    pub urls: Vec<String>,

    /// Content digest of the archive
    pub digest: String,

    /// When this version was published
    pub created: DateTime<Utc>,
}

/// The zero timestamp, `0001-01-01T00:00:00Z`
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(-62_135_596_800, 0).unwrap_or_default()
}

/// Join a base URL and a file name into a chart location
///
/// An empty base yields a location relative to the index itself.
pub fn join_location(base_url: &str, file_name: &str) -> String {
    if base_url.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), file_name)
    }
}

impl Default for RepoIndex {
    fn default() -> Self {
        Self {
            api_version: INDEX_API_VERSION.to_string(),
            generated: zero_time(),
            entries: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl RepoIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chart version, replacing an existing entry with the same version
    pub fn add_or_replace(
        &mut self,
        metadata: ChartMetadata,
        file_name: &str,
        base_url: &str,
        digest: &str,
    ) -> Result<()> {
        self.add_or_replace_with(metadata, file_name, base_url, digest, CreatedPolicy::Refresh)
    }

    /// [`RepoIndex::add_or_replace`] with an explicit `created` policy
    ///
    /// Replacement keeps the entry's position; call
    /// [`RepoIndex::sort_entries`] before encoding.
    pub fn add_or_replace_with(
        &mut self,
        metadata: ChartMetadata,
        file_name: &str,
        base_url: &str,
        digest: &str,
        policy: CreatedPolicy,
    ) -> Result<()> {
        let version = metadata.validate()?;
        let now = Utc::now();

        let entry = IndexEntry {
            urls: vec![join_location(base_url, file_name)],
            digest: digest.to_string(),
            created: now,
            metadata,
        };

        let versions = self.entries.entry(entry.metadata.name.clone()).or_default();

        match versions.iter_mut().find(|e| same_version(e, &version)) {
            Some(existing) => {
                tracing::debug!(
                    "Replacing {} {} in index",
                    entry.metadata.name,
                    entry.metadata.version
                );
                let created = match policy {
                    CreatedPolicy::Refresh => now,
                    CreatedPolicy::Preserve => existing.created,
                };
                *existing = IndexEntry { created, ..entry };
            }
            None => versions.push(entry),
        }

        self.generated = now;
        Ok(())
    }

    /// Remove one chart version and return its primary location
    ///
    /// The chart's key is dropped when its last version goes.
    pub fn delete(&mut self, name: &str, version: &str) -> Result<String> {
        let not_found = || RepoError::ChartNotFound {
            name: name.to_string(),
            version: version.to_string(),
        };

        let parsed = parse_version(version).ok();
        let versions = self.entries.get_mut(name).ok_or_else(not_found)?;
        let position = versions
            .iter()
            .position(|e| match &parsed {
                Some(v) => same_version(e, v),
                None => e.metadata.version == version,
            })
            .ok_or_else(not_found)?;

        let removed = versions.remove(position);
        if versions.is_empty() {
            self.entries.remove(name);
        }

        self.generated = Utc::now();
        Ok(removed.urls.into_iter().next().unwrap_or_default())
    }

    /// Order every chart's versions newest-first
    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| compare_versions(b, a));
        }
    }

    /// Get all versions of a chart
    pub fn get_versions(&self, name: &str) -> Option<&Vec<IndexEntry>> {
        self.entries.get(name)
    }

    /// Get the first listed version of a chart (newest once sorted)
    pub fn get_latest(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name).and_then(|v| v.first())
    }

    /// Get a specific version of a chart
    pub fn get_version(&self, name: &str, version: &str) -> Option<&IndexEntry> {
        let parsed = parse_version(version).ok();
        self.entries.get(name).and_then(|versions| {
            versions.iter().find(|e| match &parsed {
                Some(v) => same_version(e, v),
                None => e.metadata.version == version,
            })
        })
    }

    /// Whether a chart version is listed
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.get_version(name, version).is_some()
    }

    /// Number of distinct charts
    pub fn chart_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of versions across all charts
    pub fn version_count(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }
}

impl IndexEntry {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Get the primary download URL if available
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }
}

fn same_version(entry: &IndexEntry, version: &semver::Version) -> bool {
    match parse_version(&entry.metadata.version) {
        Ok(v) => v == *version,
        Err(_) => false,
    }
}

fn compare_versions(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    match (
        parse_version(&a.metadata.version),
        parse_version(&b.metadata.version),
    ) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        // Versions loaded from foreign indexes may not parse
        _ => a.metadata.version.cmp(&b.metadata.version),
    }
}
