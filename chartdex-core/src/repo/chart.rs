//! Chart metadata and chart archive reading
//!
//! A chart archive is a gzip-compressed tarball whose single top-level
//! directory holds a `Chart.yaml` descriptor. The descriptor, not the
//! archive's file name, is the authoritative source of name and version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Component;

use super::error::{RepoError, Result};

/// Name of the descriptor inside a chart archive
pub const CHART_DESCRIPTOR: &str = "Chart.yaml";

/// File extension of packaged charts
pub const CHART_EXTENSION: &str = "tgz";

/// Chart metadata as declared in `Chart.yaml`
///
/// Known fields are typed; every other field is carried through unchanged
/// in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name
    #[serde(default)]
    pub name: String,

    /// Semantic version of the chart
    #[serde(default)]
    pub version: String,

    /// Chart API version ("v1" or "v2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Version of the packaged application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// One-line description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Remaining descriptive fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml_ng::Value>,
}

impl ChartMetadata {
    /// Metadata with only a name and version set
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            api_version: None,
            app_version: None,
            description: None,
            extra: BTreeMap::new(),
        }
    }

    /// Parse metadata from `Chart.yaml` content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content).map_err(|e| RepoError::Chart {
            file: CHART_DESCRIPTOR.to_string(),
            reason: e.to_string(),
        })
    }

    /// Check the fields the index depends on and return the parsed version
    pub fn validate(&self) -> Result<semver::Version> {
        if self.name.trim().is_empty() {
            return Err(RepoError::usage("Chart name is required"));
        }

        if self.name.contains('/') || self.name.contains('\\') {
            return Err(RepoError::usage(format!(
                "Chart name '{}' cannot contain path separators",
                self.name
            )));
        }

        parse_version(&self.version).map_err(|source| RepoError::VersionParse {
            name: self.name.clone(),
            version: self.version.clone(),
            source,
        })
    }

    /// Conventional archive file name, `<name>-<version>.tgz`
    pub fn archive_file_name(&self) -> String {
        format!("{}-{}.{}", self.name, self.version, CHART_EXTENSION)
    }
}

/// Parse a chart version, tolerating a leading `v`
pub fn parse_version(version: &str) -> std::result::Result<semver::Version, semver::Error> {
    let trimmed = version.trim();
    semver::Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))
}

/// Read and validate the metadata embedded in a chart archive
///
/// `file` is only used in error messages.
pub fn load_chart_metadata(file: &str, bytes: &[u8]) -> Result<ChartMetadata> {
    let chart_err = |reason: String| RepoError::Chart {
        file: file.to_string(),
        reason,
    };

    let gz_decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(gz_decoder);

    let entries = archive
        .entries()
        .map_err(|e| chart_err(format!("not a gzip-compressed tar archive: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| chart_err(format!("corrupt archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| chart_err(format!("unreadable entry path: {e}")))?
            .into_owned();

        if !is_top_level_descriptor(&path) {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| chart_err(format!("failed to read {CHART_DESCRIPTOR}: {e}")))?;

        let metadata = ChartMetadata::from_yaml(&content)
            .map_err(|e| chart_err(format!("invalid {CHART_DESCRIPTOR}: {e}")))?;
        metadata.validate()?;

        return Ok(metadata);
    }

    Err(chart_err(format!("no {CHART_DESCRIPTOR} found in archive")))
}

/// Matches `<chart>/Chart.yaml`, ignoring deeper dependency descriptors
fn is_top_level_descriptor(path: &std::path::Path) -> bool {
    let components: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    components.len() == 2
        && matches!(components[1], Component::Normal(name) if name == CHART_DESCRIPTOR)
}
