//! Content digests for chart archives
//!
//! Digests are `algorithm:hex` strings. The index treats them as opaque
//! change markers and only ever compares them for equality.

use sha2::{Digest, Sha256};

/// Algorithm prefix used for every digest this crate produces
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Compute the SHA-256 digest of `bytes` as `sha256:<hex>`
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{DIGEST_ALGORITHM}:{}", hex::encode(hasher.finalize()))
}
