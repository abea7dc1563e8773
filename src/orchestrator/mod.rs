//! The four-stage orchestration protocol.
//!
//! `pre` fingerprints every cacheable target and mutates the projects so
//! the build either short-circuits into `extract` (hit) or reports its
//! environment through `printenv` (miss); `post` archives what was built
//! and restores the projects; `clean` is the unconditional rollback.
//! Each stage runs as its own process, serialized by the build tool's
//! job graph.

pub mod clean;
pub mod extract;
pub mod post;
pub mod pre;
pub mod printenv;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{CacheConfig, ConfigError};
use crate::context::{ContextError, SIDECAR_SUFFIX};
use crate::fingerprint::FingerprintError;
use crate::hasher::FileHasher;
use crate::lockfile::{LockfileError, SpecChecksums};
use crate::project::{mutator, ProjectError};
use crate::store::archive::ArchiveError;
use crate::store::{CacheStore, StoreError};

/// Errors aborting a stage
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("a -configuration (or --configuration) argument with a value is required")]
    MissingConfigurationArg,

    #[error("required build environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("project error: {0}")]
    Project(#[from] ProjectError),

    #[error("lockfile error: {0}")]
    Lockfile(#[from] LockfileError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    /// Exit code for the process wrapper.
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::MissingConfigurationArg => 2,
            StageError::MissingEnv(_) => 2,
            StageError::Config(_) => 2,
            StageError::Project(_) => 10,
            StageError::Lockfile(_) => 10,
            StageError::Store(_) => 20,
            StageError::Archive(_) => 20,
            StageError::Context(_) => 30,
            StageError::Fingerprint(_) => 30,
            StageError::Io { .. } => 1,
        }
    }
}

/// Per-run state threaded through the stages. Holds what the historical
/// tool kept in process globals: the digest memo, the working directory,
/// and the parsed lockfile.
pub struct RunContext {
    pub config: CacheConfig,
    pub cwd: PathBuf,
    pub hasher: FileHasher,
    pub checksums: SpecChecksums,
}

impl RunContext {
    /// Context rooted at the process working directory.
    pub fn from_process(config: CacheConfig) -> Result<Self, StageError> {
        let cwd = std::env::current_dir().map_err(|source| StageError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Self::at(config, cwd)
    }

    /// Context rooted at an explicit workspace directory.
    pub fn at(config: CacheConfig, cwd: PathBuf) -> Result<Self, StageError> {
        let checksums = SpecChecksums::load(&cwd)?;
        Ok(Self {
            config,
            cwd,
            hasher: FileHasher::new(),
            checksums,
        })
    }

    pub fn store(&self) -> CacheStore {
        CacheStore::new(self.config.cache_root.clone(), self.config.cache_count)
    }
}

/// Value of the `-configuration`/`--configuration` argument, if any.
pub fn parse_configuration(args: &[String]) -> Option<String> {
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        if arg == "-configuration" || arg == "--configuration" {
            return it.next().filter(|v| !v.is_empty()).cloned();
        }
    }
    None
}

/// Snapshot the build-environment variables the stages consume.
pub fn capture_build_env(vars: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    crate::context::BUILD_ENV_VARS
        .iter()
        .filter_map(|key| vars.get(*key).map(|v| (key.to_string(), v.clone())))
        .filter(|(_, v)| !v.is_empty())
        .collect()
}

/// Every `.xcodeproj` directory under the workspace's `Pods` tree.
pub fn find_project_dirs(cwd: &Path) -> Vec<PathBuf> {
    let pods = cwd.join("Pods");
    if !pods.is_dir() {
        return Vec::new();
    }

    WalkDir::new(&pods)
        .max_depth(4)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_dir()
                && e.path().extension().and_then(|x| x.to_str()) == Some("xcodeproj")
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Roll one project directory back to its pristine state: restore the
/// backup over the mutated project, drop any leftover backup, and remove
/// target sidecars.
pub fn cleanup_project_dir(project_dir: &Path) -> Result<bool, StageError> {
    let restored = mutator::restore(project_dir).map_err(|source| StageError::Io {
        path: project_dir.to_path_buf(),
        source,
    })?;
    mutator::clean_backup(project_dir).map_err(|source| StageError::Io {
        path: project_dir.to_path_buf(),
        source,
    })?;

    for entry in std::fs::read_dir(project_dir)
        .map_err(|source| StageError::Io {
            path: project_dir.to_path_buf(),
            source,
        })?
        .filter_map(Result::ok)
    {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(SIDECAR_SUFFIX) {
            std::fs::remove_file(entry.path()).map_err(|source| StageError::Io {
                path: entry.path(),
                source,
            })?;
        }
    }
    Ok(restored)
}
