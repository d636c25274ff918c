//! Content hashing for staleness checks.
//!
//! Cached files are compared to their remote counterparts through a
//! SHA-1 digest. Remote digests live in `.sha1` sidecar files next to
//! the resource (40 lowercase hex characters, optionally followed by
//! whitespace or a filename, in the style of `sha1sum` output).

use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::uri::ResourceId;

/// Suffix appended to a resource identifier to locate its digest
/// sidecar.
pub const SIDECAR_SUFFIX: &str = ".sha1";

const CHUNK_SIZE: usize = 8192;

/// Streaming SHA-1 of a local file, returned as lowercase hex.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-1 of an in-memory buffer, as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Identifier of the digest sidecar for `uri`.
pub fn sidecar_id(uri: &ResourceId) -> ResourceId {
    uri.with_suffix(SIDECAR_SUFFIX)
}

/// Extract a digest from sidecar content. Takes the first
/// whitespace-delimited token and validates it as 40 hex characters.
pub fn parse_sidecar(content: &str) -> Option<String> {
    let token = content.split_whitespace().next()?;
    if token.len() == 40 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token.to_ascii_lowercase())
    } else {
        None
    }
}

/// Case-insensitive digest comparison.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
