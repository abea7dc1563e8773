//! The `extract` stage.
//!
//! Injected as the sole remaining build phase of a hit target; runs with
//! the build tool's environment and materializes the cached product where
//! the compiler would have put it. When the build redirects the product
//! into a separate `TARGET_BUILD_DIR`, the product is moved there and a
//! symlink is left in `CONFIGURATION_BUILD_DIR`, matching what the build
//! tool itself does.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::{archive, CacheStore, PRODUCT_TAR};

use super::StageError;

/// Run the stage for one hit target.
///
/// `cache_dir` is the bound cache entry; the relative directories are
/// carried from the entry for diagnostics, while the authoritative
/// locations come from the build environment.
pub fn run(
    cache_dir: &Path,
    relative_product_dir: &str,
    relative_intermediate_dir: &str,
    env: &BTreeMap<String, String>,
) -> Result<(), StageError> {
    let required = |key: &'static str| {
        env.get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(StageError::MissingEnv(key))
    };

    let _symroot = required("SYMROOT")?;
    let configuration_build_dir = PathBuf::from(required("CONFIGURATION_BUILD_DIR")?);
    let _objroot = required("OBJROOT")?;
    let _target_temp_dir = required("TARGET_TEMP_DIR")?;
    let _srcroot = required("SRCROOT")?;
    let full_product_name = required("FULL_PRODUCT_NAME")?;

    let target_build_dir = env
        .get("TARGET_BUILD_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| configuration_build_dir.clone());

    log::debug!(
        "extracting {} ({} / {})",
        cache_dir.display(),
        relative_product_dir,
        relative_intermediate_dir
    );

    if let Err(err) = CacheStore::touch(cache_dir) {
        log::warn!("could not refresh {}: {}", cache_dir.display(), err);
    }

    let tar = cache_dir.join(PRODUCT_TAR);
    let unpack_root = configuration_build_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    archive::unpack(&tar, &unpack_root)?;

    if target_build_dir != configuration_build_dir {
        let extracted = configuration_build_dir.join(&full_product_name);
        let destination = target_build_dir.join(&full_product_name);

        if destination.exists() {
            remove_any(&destination)?;
        }
        fs::create_dir_all(&target_build_dir).map_err(|source| StageError::Io {
            path: target_build_dir.clone(),
            source,
        })?;
        fs::rename(&extracted, &destination).map_err(|source| StageError::Io {
            path: extracted.clone(),
            source,
        })?;
        std::os::unix::fs::symlink(&destination, &extracted).map_err(|source| {
            StageError::Io {
                path: extracted.clone(),
                source,
            }
        })?;
    }

    log::info!("extracted {} from cache", full_product_name);
    Ok(())
}

fn remove_any(path: &Path) -> Result<(), StageError> {
    let meta = fs::symlink_metadata(path).map_err(|source| StageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|source| StageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
