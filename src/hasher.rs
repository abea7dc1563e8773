//! Per-file content digests with memoization, plus path normalization.
//!
//! Fingerprints are built from file digests, so every source file of a
//! target is hashed once per run. The memo is keyed by the requested path,
//! not the resolved one; fingerprint computation runs with one stable
//! source root per target, so the same relative path never resolves into
//! two different roots within a run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use regex_lite::Regex;

/// Errors for digest operations
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("file not found: {path} (also tried under source root)")]
    NotFound { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Memoizing file hasher. One instance lives in the per-run context.
#[derive(Debug, Default)]
pub struct FileHasher {
    memo: HashMap<PathBuf, String>,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest of the file at `path`. If `path` does not exist, retries
    /// under `srcroot/path` before failing. The result is memoized by the
    /// requested path.
    pub fn digest(
        &mut self,
        path: &Path,
        srcroot: Option<&Path>,
    ) -> Result<String, HashError> {
        if let Some(hit) = self.memo.get(path) {
            return Ok(hit.clone());
        }

        let resolved = if path.is_file() {
            path.to_path_buf()
        } else {
            match srcroot {
                Some(root) if root.join(path).is_file() => root.join(path),
                _ => {
                    return Err(HashError::NotFound {
                        path: path.to_path_buf(),
                    })
                }
            }
        };

        let digest = hash_file(&resolved).map_err(|source| HashError::Io {
            path: resolved.clone(),
            source,
        })?;
        self.memo.insert(path.to_path_buf(), digest.clone());
        Ok(digest)
    }

    /// Number of memoized entries.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

/// Hex MD5 of a file's contents, streamed.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex MD5 of a byte string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Make `s` independent of the working directory: occurrences of `{cwd}/`
/// are removed, and `{cwd}` followed by a non-word character collapses to
/// that character.
pub fn strip_pwd(cwd: &Path, s: &str) -> String {
    let cwd = cwd.to_string_lossy();
    let with_slash = format!("{}/", cwd);
    let out = s.replace(&with_slash, "");

    // regex_lite has no lookaround; capture the boundary character instead.
    let pattern = format!("{}(\\W)", regex_escape(&cwd));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(&out, "$1").into_owned(),
        Err(_) => out,
    }
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}
