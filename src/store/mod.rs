//! The on-disk cache of built products.
//!
//! Each entry is a directory `{target_name}-{target_md5}-{epoch_ms}`
//! holding the product archive, the stripped context, and the fingerprint
//! pre-image. Entries found without their required files, or whose
//! recorded digests no longer match, are deleted on encounter and the
//! lookup falls through to a miss.

pub mod archive;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;

use crate::context::{ContextError, StoredContext};
use crate::hasher::hash_file;

/// Product archive file inside an entry.
pub const PRODUCT_TAR: &str = "product.tar";

/// Stripped context file inside an entry.
pub const CONTEXT_YML: &str = "context.yml";

/// Fingerprint pre-image file inside an entry.
pub const MESSAGE_TXT: &str = "message.txt";

/// Candidates examined per lookup when entries carry dependencies.
const MAX_CANDIDATES: usize = 10;

/// Errors for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("context error: {0}")]
    Context(#[from] ContextError),
}

/// A valid cache entry yielded by lookup.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub dir: PathBuf,
    pub context: StoredContext,
}

impl CacheEntry {
    pub fn product_tar(&self) -> PathBuf {
        self.dir.join(PRODUCT_TAR)
    }
}

/// The cache root directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    cache_count: usize,
}

impl CacheStore {
    pub fn new(root: PathBuf, cache_count: usize) -> Self {
        Self { root, cache_count }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the entire cache root.
    pub fn clear(&self) -> Result<(), StoreError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Create a new entry from an archived product. The staging archive
    /// is moved, not copied. Returns the entry directory.
    pub fn insert(
        &self,
        context: &StoredContext,
        message: &str,
        archive_path: &Path,
    ) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        // The millisecond suffix disambiguates same-fingerprint entries;
        // bump it until the name is free.
        let mut stamp = Utc::now().timestamp_millis();
        let dir = loop {
            let dir = self.root.join(format!(
                "{}-{}-{}",
                context.target_name, context.target_md5, stamp
            ));
            if !dir.exists() {
                break dir;
            }
            stamp += 1;
        };

        fs::create_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        move_file(archive_path, &dir.join(PRODUCT_TAR)).map_err(|source| StoreError::Io {
            path: archive_path.to_path_buf(),
            source,
        })?;
        context.store(&dir.join(CONTEXT_YML))?;
        fs::write(dir.join(MESSAGE_TXT), message).map_err(|source| StoreError::Io {
            path: dir.join(MESSAGE_TXT),
            source,
        })?;

        Ok(dir)
    }

    /// Valid entries for a fingerprint, newest first.
    ///
    /// Corrupt entries encountered along the way are deleted. When the
    /// newest valid entry records no dependencies it is the unique
    /// answer; otherwise up to `MAX_CANDIDATES` are returned and the
    /// caller arbitrates against its dependency state.
    pub fn candidates(
        &self,
        target_name: &str,
        target_md5: &str,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let prefix = format!("{}-{}-", target_name, target_md5);
        let mut dirs: Vec<(PathBuf, SystemTime)> = Vec::new();

        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        for entry in fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) || !entry.path().is_dir() {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            dirs.push((entry.path(), mtime));
        }
        dirs.sort_by(|a, b| b.1.cmp(&a.1));

        let mut out = Vec::new();
        for (dir, _) in dirs {
            match self.validate(&dir, target_md5) {
                Some(entry) => {
                    let standalone = entry.context.dependent_targets.is_empty();
                    out.push(entry);
                    if standalone || out.len() >= MAX_CANDIDATES {
                        break;
                    }
                }
                None => {
                    log::error!("removing corrupt cache entry {}", dir.display());
                    let _ = fs::remove_dir_all(&dir);
                }
            }
        }
        Ok(out)
    }

    /// `Some(entry)` when the entry is complete and its digests match.
    fn validate(&self, dir: &Path, target_md5: &str) -> Option<CacheEntry> {
        let tar = dir.join(PRODUCT_TAR);
        let context_path = dir.join(CONTEXT_YML);
        if !tar.is_file() || !context_path.is_file() {
            return None;
        }

        let context = StoredContext::load(&context_path).ok()?;
        if context.target_md5 != target_md5 {
            return None;
        }
        let actual = hash_file(&tar).ok()?;
        if actual != context.product_md5 {
            return None;
        }

        Some(CacheEntry {
            dir: dir.to_path_buf(),
            context,
        })
    }

    /// Refresh an entry's mtime so eviction sees it as recently used.
    pub fn touch(entry_dir: &Path) -> Result<(), StoreError> {
        let file = File::open(entry_dir).map_err(|source| StoreError::Io {
            path: entry_dir.to_path_buf(),
            source,
        })?;
        file.set_modified(SystemTime::now())
            .map_err(|source| StoreError::Io {
                path: entry_dir.to_path_buf(),
                source,
            })
    }

    /// Drop the oldest entries beyond the configured count.
    pub fn evict(&self) -> Result<usize, StoreError> {
        if !self.root.is_dir() {
            return Ok(0);
        }

        let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((entry.path(), mtime));
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = 0;
        for (dir, _) in entries.iter().skip(self.cache_count) {
            fs::remove_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Rename, with a copy-and-delete fallback for cross-device moves.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stored_context(name: &str, md5: &str, product_md5: &str) -> StoredContext {
        StoredContext {
            target_name: name.to_string(),
            target_md5: md5.to_string(),
            product_md5: product_md5.to_string(),
            full_product_name: format!("{}.framework", name),
            build_product_dir: format!("Release-iphoneos/{}", name),
            build_intermediate_dir: format!("Pods.build/{}.build", name),
            modulemap_file: None,
            dependent_targets: BTreeMap::new(),
        }
    }

    fn insert_entry(store: &CacheStore, staging: &Path, name: &str, md5: &str) -> PathBuf {
        let archive = staging.join(format!("{}.tar", name));
        fs::write(&archive, format!("tar-bytes-{}", name)).unwrap();
        let product_md5 = hash_file(&archive).unwrap();
        store
            .insert(
                &stored_context(name, md5, &product_md5),
                "pre-image",
                &archive,
            )
            .unwrap()
    }

    #[test]
    fn test_insert_creates_complete_entry() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 10);

        let md5 = "a".repeat(32);
        let dir = insert_entry(&store, staging.path(), "AFNetworking", &md5);

        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("AFNetworking-{}-", md5)));
        assert!(dir.join(PRODUCT_TAR).is_file());
        assert!(dir.join(CONTEXT_YML).is_file());
        assert_eq!(fs::read_to_string(dir.join(MESSAGE_TXT)).unwrap(), "pre-image");
        // The staging archive was moved, not copied.
        assert!(!staging.path().join("AFNetworking.tar").exists());
    }

    #[test]
    fn test_candidates_newest_first_single_winner() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 10);
        let md5 = "b".repeat(32);

        let first = insert_entry(&store, staging.path(), "Masonry", &md5);
        thread::sleep(Duration::from_millis(20));
        let second = insert_entry(&store, staging.path(), "Masonry", &md5);
        assert_ne!(first, second);

        let found = store.candidates("Masonry", &md5).unwrap();
        // Dependency-free entries short-circuit at the newest.
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dir, second);
    }

    #[test]
    fn test_candidates_ignore_other_fingerprints() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 10);

        insert_entry(&store, staging.path(), "Masonry", &"c".repeat(32));
        let found = store.candidates("Masonry", &"d".repeat(32)).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_corrupt_archive_self_heals() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 10);
        let md5 = "e".repeat(32);

        let dir = insert_entry(&store, staging.path(), "Masonry", &md5);
        fs::write(dir.join(PRODUCT_TAR), "tampered").unwrap();

        let found = store.candidates("Masonry", &md5).unwrap();
        assert!(found.is_empty());
        assert!(!dir.exists(), "corrupt entry must be deleted on encounter");
    }

    #[test]
    fn test_incomplete_entry_self_heals() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 10);
        let md5 = "f".repeat(32);

        let dir = insert_entry(&store, staging.path(), "Masonry", &md5);
        fs::remove_file(dir.join(CONTEXT_YML)).unwrap();

        assert!(store.candidates("Masonry", &md5).unwrap().is_empty());
        assert!(!dir.exists());
    }

    #[test]
    fn test_evict_keeps_newest_by_mtime() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 2);

        let oldest = insert_entry(&store, staging.path(), "A", &"1".repeat(32));
        thread::sleep(Duration::from_millis(20));
        let middle = insert_entry(&store, staging.path(), "B", &"2".repeat(32));
        thread::sleep(Duration::from_millis(20));
        let newest = insert_entry(&store, staging.path(), "C", &"3".repeat(32));

        assert_eq!(store.evict().unwrap(), 1);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn test_touch_refreshes_lru_position() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let store = CacheStore::new(root.path().to_path_buf(), 1);

        let first = insert_entry(&store, staging.path(), "A", &"4".repeat(32));
        thread::sleep(Duration::from_millis(20));
        let second = insert_entry(&store, staging.path(), "B", &"5".repeat(32));

        thread::sleep(Duration::from_millis(20));
        CacheStore::touch(&first).unwrap();
        assert_eq!(store.evict().unwrap(), 1);

        assert!(first.exists(), "touched entry must survive eviction");
        assert!(!second.exists());
    }

    #[test]
    fn test_clear_removes_root() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let cache_root = root.path().join("XcodeCache");
        let store = CacheStore::new(cache_root.clone(), 10);

        insert_entry(&store, staging.path(), "A", &"6".repeat(32));
        store.clear().unwrap();
        assert!(!cache_root.exists());
        // Clearing an absent root is fine.
        store.clear().unwrap();
    }
}
