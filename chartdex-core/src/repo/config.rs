//! Repository URLs and the local repository catalog
//!
//! Named repositories live in `repositories.yaml` under the chartdex home
//! directory, next to a `cache/` directory holding the last index written
//! for each repository.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{RepoError, Result};
use super::index::{join_location, INDEX_FILE};

/// Environment variable overriding the chartdex home directory
pub const HOME_ENV: &str = "CHARTDEX_HOME";

/// URL schemes a repository may use
pub const SUPPORTED_SCHEMES: &[&str] = &["file", "s3"];

/// A parsed repository URL such as `s3://bucket/charts` or `file:///srv/charts`
///
/// For `s3` URLs the host is the bucket and the path is the key prefix.
/// For `file` URLs the path is the repository root and keys have no prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    url: String,
    scheme: String,
    location: String,
    prefix: String,
}

impl RepoUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim().trim_end_matches('/');

        let (scheme, rest) = url.split_once("://").ok_or_else(|| {
            RepoError::usage(format!(
                "Repository URL '{url}' must start with one of: {}",
                SUPPORTED_SCHEMES
                    .iter()
                    .map(|s| format!("{s}://"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        if !SUPPORTED_SCHEMES.contains(&scheme) {
            return Err(RepoError::usage(format!(
                "Unsupported repository scheme '{scheme}://' in '{url}'"
            )));
        }

        let (location, prefix) = match scheme {
            "file" => (rest.to_string(), String::new()),
            _ => match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
                None => (rest.to_string(), String::new()),
            },
        };

        if location.is_empty() {
            return Err(RepoError::usage(format!(
                "Repository URL '{url}' has no bucket or path"
            )));
        }

        Ok(Self {
            url: url.to_string(),
            scheme: scheme.to_string(),
            location,
            prefix,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Bucket name (`s3`) or root directory (`file`)
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Key prefix under which the repository's objects live
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// URL of the repository's index file
    pub fn index_url(&self) -> String {
        format!("{}/{}", self.url, INDEX_FILE)
    }

    /// Absolute location of a file stored in the repository
    pub fn join(&self, file_name: &str) -> String {
        join_location(&self.url, file_name)
    }

    /// Storage key of the index file
    pub fn index_key(&self) -> String {
        self.key(INDEX_FILE)
    }

    /// Storage key for a file stored in the repository
    pub fn key(&self, file_name: &str) -> String {
        let file_name = file_name.trim_start_matches('/');
        if self.prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    /// Map an index location (absolute or relative) back to a storage key
    pub fn object_key(&self, location: &str) -> Result<String> {
        if !location.contains("://") {
            return Ok(self.key(location));
        }

        location
            .strip_prefix(&self.url)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .map(|rest| self.key(rest))
            .ok_or_else(|| {
                RepoError::usage(format!(
                    "Chart location '{location}' is outside repository {}",
                    self.url
                ))
            })
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// A named repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
    /// Repository name (e.g., "stable", "mycompany")
    pub name: String,

    /// Repository URL
    pub url: String,
}

/// Repository catalog file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Configured repositories
    #[serde(default)]
    pub repositories: Vec<RepoEntry>,
}

/// Manages named repositories and their local index caches
pub struct RepoCatalog {
    config: CatalogConfig,
    home: PathBuf,
}

impl RepoCatalog {
    /// Load the catalog from the default home directory
    pub fn load() -> Result<Self> {
        Self::load_from_home(home_dir()?)
    }

    /// Load the catalog from a specific home directory
    pub fn load_from_home(home: PathBuf) -> Result<Self> {
        let config_path = home.join("repositories.yaml");

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| config_error(&config_path, e))?;
            serde_yaml_ng::from_str(&content).map_err(|e| config_error(&config_path, e))?
        } else {
            CatalogConfig::default()
        };

        Ok(Self { config, home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("repositories.yaml")
    }

    /// Save the current configuration
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path();
        let content =
            serde_yaml_ng::to_string(&self.config).map_err(|e| config_error(&config_path, e))?;

        std::fs::create_dir_all(&self.home).map_err(|e| config_error(&self.home, e))?;
        std::fs::write(&config_path, content).map_err(|e| config_error(&config_path, e))?;

        Ok(())
    }

    /// Get all configured repositories
    pub fn repositories(&self) -> &[RepoEntry] {
        &self.config.repositories
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&RepoEntry> {
        self.config.repositories.iter().find(|r| r.name == name)
    }

    /// Add a new repository
    pub fn add_repository(&mut self, name: &str, url: &str) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(RepoError::usage(format!("Invalid repository name '{name}'")));
        }

        if self.get(name).is_some() {
            return Err(RepoError::usage(format!("Repository '{name}' already exists")));
        }

        let url = RepoUrl::parse(url)?;

        self.config.repositories.push(RepoEntry {
            name: name.to_string(),
            url: url.as_str().to_string(),
        });

        Ok(())
    }

    /// Remove a repository by name
    pub fn remove_repository(&mut self, name: &str) -> Result<()> {
        let initial_len = self.config.repositories.len();
        self.config.repositories.retain(|r| r.name != name);

        if self.config.repositories.len() == initial_len {
            return Err(RepoError::usage(format!("Repository '{name}' not found")));
        }

        Ok(())
    }

    /// Local index cache file for a named repository
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.home.join("cache").join(format!("{name}-{INDEX_FILE}"))
    }

    /// Resolve a repository name or a raw URL
    ///
    /// Raw URLs have no local cache file.
    pub fn resolve(&self, name_or_url: &str) -> Result<(RepoUrl, Option<PathBuf>)> {
        if name_or_url.contains("://") {
            return Ok((RepoUrl::parse(name_or_url)?, None));
        }

        let entry = self.get(name_or_url).ok_or_else(|| {
            RepoError::usage(format!(
                "Repository '{name_or_url}' not found.\n\nTo add it, run:\n  chartdex repo add {name_or_url} <url>"
            ))
        })?;

        Ok((RepoUrl::parse(&entry.url)?, Some(self.cache_path(&entry.name))))
    }
}

/// The chartdex home directory
///
/// `CHARTDEX_HOME` wins over the platform config directory.
pub fn home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    directories::ProjectDirs::from("dev", "chartdex", "chartdex")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .or_else(|| dirs::config_dir().map(|d| d.join("chartdex")))
        .ok_or_else(|| RepoError::Config {
            path: PathBuf::from(HOME_ENV),
            reason: "could not determine config directory; set CHARTDEX_HOME".to_string(),
        })
}

fn config_error(path: &Path, reason: impl ToString) -> RepoError {
    RepoError::Config {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
