//! Local index cache
//!
//! After every successful publish the encoded index is also written to a
//! local file so clients can read it without touching the object store.

use std::io::Write;
use std::path::Path;

use super::error::{RepoError, Result};

/// Permissions applied to cache files
pub const DEFAULT_CACHE_MODE: u32 = 0o644;

/// Overwrite the cache file at `path` with `bytes`
///
/// The bytes land in a temporary file in the same directory first and are
/// then renamed over the destination, so readers never see a partial file.
pub fn write_local_cache(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(RepoError::usage("required destination path is missing"));
    }

    let cache_err = |source: std::io::Error| RepoError::CacheWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(cache_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(cache_err)?;
    temp.write_all(bytes).map_err(cache_err)?;
    temp.flush().map_err(cache_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(mode))
            .map_err(cache_err)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp.persist(path).map_err(|e| cache_err(e.error))?;

    tracing::debug!("Wrote index cache to {}", path.display());
    Ok(())
}
