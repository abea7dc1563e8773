//! Product archives.
//!
//! A cached product is a plain tar of the product directory, created in
//! the directory's parent so member paths are relative to that parent.
//! Symlinks are followed on write so the archive is self-contained; for
//! static-library targets, nested `*.bundle` and `*.framework` trees are
//! excluded (they belong to other targets' products).

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tar::{Archive, Builder};
use walkdir::WalkDir;

use crate::hasher::hash_file;

/// Suffix of the staging archive before it moves into a cache entry.
const STAGING_SUFFIX: &str = ".xcodecache.tar";

/// Errors for archive operations
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("product directory {0} has no parent")]
    NoParent(PathBuf),

    #[error("walk error under {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A packed product archive.
#[derive(Debug)]
pub struct PackedArchive {
    /// Staging location of the tar (inside the product dir's parent)
    pub tar_path: PathBuf,

    /// Hex digest of the tar bytes
    pub product_md5: String,
}

/// Archive `product_dir` into its parent directory.
pub fn pack(product_dir: &Path, exclude_nested_products: bool) -> Result<PackedArchive, ArchiveError> {
    let parent = product_dir
        .parent()
        .ok_or_else(|| ArchiveError::NoParent(product_dir.to_path_buf()))?;
    let root_name = product_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "product".to_string());

    let tar_path = parent.join(format!("{}{}", root_name, STAGING_SUFFIX));
    let file = File::create(&tar_path).map_err(|source| ArchiveError::Io {
        path: tar_path.clone(),
        source,
    })?;

    let mut builder = Builder::new(file);
    builder.follow_symlinks(true);

    for entry in WalkDir::new(product_dir).follow_links(true) {
        let entry = entry.map_err(|source| ArchiveError::Walk {
            path: product_dir.to_path_buf(),
            source,
        })?;
        let rel = match entry.path().strip_prefix(product_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        if exclude_nested_products && is_nested_product(rel) {
            continue;
        }

        let archived = Path::new(&root_name).join(rel);
        builder
            .append_path_with_name(entry.path(), &archived)
            .map_err(|source| ArchiveError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
    }

    builder
        .into_inner()
        .and_then(|f| f.sync_all())
        .map_err(|source| ArchiveError::Io {
            path: tar_path.clone(),
            source,
        })?;

    let product_md5 = hash_file(&tar_path).map_err(|source| ArchiveError::Io {
        path: tar_path.clone(),
        source,
    })?;

    Ok(PackedArchive {
        tar_path,
        product_md5,
    })
}

/// Unpack an archive into `dest_dir`.
pub fn unpack(tar_path: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(dest_dir).map_err(|source| ArchiveError::Io {
        path: dest_dir.to_path_buf(),
        source,
    })?;
    let file = File::open(tar_path).map_err(|source| ArchiveError::Io {
        path: tar_path.to_path_buf(),
        source,
    })?;
    Archive::new(file)
        .unpack(dest_dir)
        .map_err(|source| ArchiveError::Io {
            path: dest_dir.to_path_buf(),
            source,
        })
}

/// Erase each modulemap's own absolute location from its contents so the
/// archived product extracts cleanly into any build directory.
pub fn rewrite_modulemaps(product_dir: &Path) -> Result<usize, ArchiveError> {
    let mut rewritten = 0;

    for entry in WalkDir::new(product_dir).follow_links(true) {
        let entry = entry.map_err(|source| ArchiveError::Walk {
            path: product_dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("modulemap") {
            continue;
        }
        let Some(parent) = path.parent() else { continue };

        let content = fs::read_to_string(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let prefix = format!("{}/", parent.display());
        if !content.contains(&prefix) {
            continue;
        }

        fs::write(path, content.replace(&prefix, "")).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        rewritten += 1;
    }

    Ok(rewritten)
}

/// True when any component of `rel` is another target's product tree.
fn is_nested_product(rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.ends_with(".bundle") || name.ends_with(".framework")
        }
        _ => false,
    })
}
