//! Content digests and guarded file I/O.
//!
//! Single source of truth for reading untrusted bytes: every artifact and
//! config read goes through the symlink-checked, size-bounded helpers here.
//! Digests operate on raw bytes only — never on a text-decoded
//! representation — so identical content hashes identically regardless of
//! platform line endings or encoding.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::{Read, Write},
    path::Path,
};

/// Conservative cap for a single artifact. Larger payloads should be split
/// upstream; raising this is a controlled-release decision.
pub const MAX_ARTIFACT_SIZE: u64 = 2 * 1024 * 1024 * 1024; // 2GB

/// Computes the lowercase hex SHA-256 digest of a byte slice.
///
/// Pure and deterministic: identical bytes always produce identical output.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Streams a file through SHA-256, returning `(hex_digest, byte_length)`.
///
/// Refuses symlinks and files over [`MAX_ARTIFACT_SIZE`]. I/O errors are
/// surfaced to the caller, never swallowed: an unreadable artifact must end
/// the operation as not-admitted.
pub fn digest_file(path: &Path) -> Result<(String, u64)> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        return Err(anyhow!("Refusing to hash symlink: {}", path.display()));
    }
    let len = meta.len();
    if len > MAX_ARTIFACT_SIZE {
        return Err(anyhow!(
            "Artifact too large: {} ({} bytes, max {} bytes)",
            path.display(),
            len,
            MAX_ARTIFACT_SIZE
        ));
    }

    let mut f = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut h = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok((hex::encode(h.finalize()), len))
}

/// Reads a file after verifying it is not a symlink and is within `max_bytes`.
///
/// NOTE: narrow TOCTOU window between `symlink_metadata()` and `fs::read()`.
/// Closing it fully requires `O_NOFOLLOW` or `fstat` on the fd. The check
/// still catches accidental symlinks and raises the bar for exploitation.
pub fn read_validated(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        return Err(anyhow!("Refusing to read symlink: {}", path.display()));
    }
    if meta.len() > max_bytes {
        return Err(anyhow!(
            "File too large: {} ({} bytes, max {max_bytes} bytes)",
            path.display(),
            meta.len(),
        ));
    }
    fs::read(path).with_context(|| format!("read {}", path.display()))
}

/// Writes `bytes` to `path` through a temp-file-then-rename, so concurrent
/// readers observe either the previous content or the new content in full.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

    let tmp = path.with_extension("tmp");
    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}
