//! Per-target context passed between stages.
//!
//! A target moves through MISS → MISS_READY (miss path, environment
//! captured by the build) or straight to HIT (a cache entry was bound).
//! In memory the context is a sum over those states so each carries
//! exactly the fields its state requires; on disk it is a flat YAML
//! record with a `status` field, written as a sidecar next to the
//! project file.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hasher::strip_pwd;

/// Sidecar file suffix under the project directory.
pub const SIDECAR_SUFFIX: &str = ".xcodecache_target_context.yml";

/// Build-environment variables captured from the running build.
pub const BUILD_ENV_VARS: &[&str] = &[
    "SYMROOT",
    "CONFIGURATION_BUILD_DIR",
    "OBJROOT",
    "TARGET_TEMP_DIR",
    "TARGET_BUILD_DIR",
    "PODS_XCFRAMEWORKS_BUILD_DIR",
    "MODULEMAP_FILE",
    "SRCROOT",
    "FULL_PRODUCT_NAME",
];

/// The subset that must be present before a product can be archived or
/// extracted.
pub const REQUIRED_BUILD_ENV_VARS: &[&str] = &[
    "SYMROOT",
    "CONFIGURATION_BUILD_DIR",
    "OBJROOT",
    "TARGET_TEMP_DIR",
    "SRCROOT",
    "FULL_PRODUCT_NAME",
];

/// Errors for context serialization and validation
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed context {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("context for {target} missing field {field} in state {status}")]
    MissingField {
        target: String,
        field: &'static str,
        status: &'static str,
    },
}

/// Fields shared by the miss-path states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissContext {
    pub target_name: String,
    pub target_md5: String,
    /// Pre-image of the fingerprint, kept for drift diagnostics
    pub target_md5_content: String,
    pub configuration: String,
    pub source_files: Vec<String>,
    /// Dependent target name → fingerprint recorded for it
    pub dependent_targets: BTreeMap<String, String>,
}

/// A miss whose build environment has been captured by `printenv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissReadyContext {
    pub miss: MissContext,
    /// Observed values of `BUILD_ENV_VARS` (absent variables omitted)
    pub build_env: BTreeMap<String, String>,
}

/// A target bound to a cache entry in `pre`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitContext {
    pub target_name: String,
    pub target_md5: String,
    pub hit_target_cache_dir: String,
    pub build_product_dir: String,
    pub build_intermediate_dir: String,
    pub modulemap_file: Option<String>,
    pub dependent_targets: BTreeMap<String, String>,
}

/// Per-target context, tagged by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawTargetContext", try_from = "RawTargetContext")]
pub enum TargetContext {
    Miss(MissContext),
    MissReady(MissReadyContext),
    Hit(HitContext),
}

impl TargetContext {
    pub fn target_name(&self) -> &str {
        match self {
            TargetContext::Miss(c) => &c.target_name,
            TargetContext::MissReady(c) => &c.miss.target_name,
            TargetContext::Hit(c) => &c.target_name,
        }
    }

    pub fn target_md5(&self) -> &str {
        match self {
            TargetContext::Miss(c) => &c.target_md5,
            TargetContext::MissReady(c) => &c.miss.target_md5,
            TargetContext::Hit(c) => &c.target_md5,
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            TargetContext::Miss(_) => "MISS",
            TargetContext::MissReady(_) => "MISS_READY",
            TargetContext::Hit(_) => "HIT",
        }
    }

    /// Sidecar path for a target under a project directory.
    pub fn sidecar_path(project_path: &Path, target_name: &str) -> PathBuf {
        project_path.join(format!("{}{}", target_name, SIDECAR_SUFFIX))
    }

    /// Load a sidecar.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        let raw = fs::read_to_string(path).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ContextError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write a sidecar.
    pub fn store(&self, path: &Path) -> Result<(), ContextError> {
        let raw = serde_yaml::to_string(self).map_err(|source| ContextError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, raw).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Flat on-disk schema. Field presence is validated against `status` when
/// converting back to the sum type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTargetContext {
    status: String,
    target_name: String,
    target_md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_md5_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build_env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hit_target_cache_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build_product_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build_intermediate_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modulemap_file: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dependent_targets: BTreeMap<String, String>,
}

impl From<TargetContext> for RawTargetContext {
    fn from(ctx: TargetContext) -> Self {
        match ctx {
            TargetContext::Miss(c) => RawTargetContext {
                status: "MISS".to_string(),
                target_name: c.target_name,
                target_md5: c.target_md5,
                target_md5_content: Some(c.target_md5_content),
                configuration: Some(c.configuration),
                source_files: Some(c.source_files),
                build_env: None,
                hit_target_cache_dir: None,
                build_product_dir: None,
                build_intermediate_dir: None,
                modulemap_file: None,
                dependent_targets: c.dependent_targets,
            },
            TargetContext::MissReady(c) => RawTargetContext {
                status: "MISS_READY".to_string(),
                target_name: c.miss.target_name,
                target_md5: c.miss.target_md5,
                target_md5_content: Some(c.miss.target_md5_content),
                configuration: Some(c.miss.configuration),
                source_files: Some(c.miss.source_files),
                build_env: Some(c.build_env),
                hit_target_cache_dir: None,
                build_product_dir: None,
                build_intermediate_dir: None,
                modulemap_file: None,
                dependent_targets: c.miss.dependent_targets,
            },
            TargetContext::Hit(c) => RawTargetContext {
                status: "HIT".to_string(),
                target_name: c.target_name,
                target_md5: c.target_md5,
                target_md5_content: None,
                configuration: None,
                source_files: None,
                build_env: None,
                hit_target_cache_dir: Some(c.hit_target_cache_dir),
                build_product_dir: Some(c.build_product_dir),
                build_intermediate_dir: Some(c.build_intermediate_dir),
                modulemap_file: c.modulemap_file,
                dependent_targets: c.dependent_targets,
            },
        }
    }
}

impl TryFrom<RawTargetContext> for TargetContext {
    type Error = ContextError;

    fn try_from(raw: RawTargetContext) -> Result<Self, Self::Error> {
        let missing = |field: &'static str, status: &'static str| ContextError::MissingField {
            target: raw.target_name.clone(),
            field,
            status,
        };

        match raw.status.as_str() {
            "MISS" | "MISS_READY" => {
                let status: &'static str = if raw.status == "MISS" { "MISS" } else { "MISS_READY" };
                let miss = MissContext {
                    target_name: raw.target_name.clone(),
                    target_md5: raw.target_md5.clone(),
                    target_md5_content: raw
                        .target_md5_content
                        .clone()
                        .ok_or_else(|| missing("target_md5_content", status))?,
                    configuration: raw
                        .configuration
                        .clone()
                        .ok_or_else(|| missing("configuration", status))?,
                    source_files: raw
                        .source_files
                        .clone()
                        .ok_or_else(|| missing("source_files", status))?,
                    dependent_targets: raw.dependent_targets.clone(),
                };
                if status == "MISS" {
                    Ok(TargetContext::Miss(miss))
                } else {
                    Ok(TargetContext::MissReady(MissReadyContext {
                        miss,
                        build_env: raw
                            .build_env
                            .clone()
                            .ok_or_else(|| missing("build_env", status))?,
                    }))
                }
            }
            "HIT" => Ok(TargetContext::Hit(HitContext {
                target_name: raw.target_name.clone(),
                target_md5: raw.target_md5.clone(),
                hit_target_cache_dir: raw
                    .hit_target_cache_dir
                    .clone()
                    .ok_or_else(|| missing("hit_target_cache_dir", "HIT"))?,
                build_product_dir: raw
                    .build_product_dir
                    .clone()
                    .ok_or_else(|| missing("build_product_dir", "HIT"))?,
                build_intermediate_dir: raw
                    .build_intermediate_dir
                    .clone()
                    .ok_or_else(|| missing("build_intermediate_dir", "HIT"))?,
                modulemap_file: raw.modulemap_file.clone(),
                dependent_targets: raw.dependent_targets.clone(),
            })),
            _ => Err(ContextError::MissingField {
                target: raw.target_name.clone(),
                field: "status",
                status: "unknown",
            }),
        }
    }
}

/// The stripped context persisted inside a cache entry as `context.yml`.
///
/// Status, the pre-image, and every absolute build path are dropped;
/// product and intermediate directories are kept relative to `SYMROOT`
/// and `OBJROOT` so the entry extracts into any checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContext {
    pub target_name: String,
    pub target_md5: String,
    pub product_md5: String,
    pub full_product_name: String,
    pub build_product_dir: String,
    pub build_intermediate_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulemap_file: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependent_targets: BTreeMap<String, String>,
}

impl StoredContext {
    /// Strip a readied miss context for persistence.
    pub fn from_miss_ready(
        ready: &MissReadyContext,
        product_md5: String,
        modulemap_file: Option<String>,
        cwd: &Path,
    ) -> Result<Self, ContextError> {
        let env = |key: &'static str| {
            ready.build_env.get(key).cloned().ok_or_else(|| {
                ContextError::MissingField {
                    target: ready.miss.target_name.clone(),
                    field: key,
                    status: "MISS_READY",
                }
            })
        };

        let symroot = env("SYMROOT")?;
        let objroot = env("OBJROOT")?;
        let product = env("CONFIGURATION_BUILD_DIR")?;
        let intermediate = env("TARGET_TEMP_DIR")?;

        Ok(Self {
            target_name: ready.miss.target_name.clone(),
            target_md5: ready.miss.target_md5.clone(),
            product_md5,
            full_product_name: env("FULL_PRODUCT_NAME")?,
            build_product_dir: strip_root(&product, &symroot),
            build_intermediate_dir: strip_root(&intermediate, &objroot),
            modulemap_file: modulemap_file.map(|m| strip_pwd(cwd, &m)),
            dependent_targets: ready.miss.dependent_targets.clone(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ContextError> {
        let raw = fs::read_to_string(path).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ContextError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn store(&self, path: &Path) -> Result<(), ContextError> {
        let raw = serde_yaml::to_string(self).map_err(|source| ContextError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, raw).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `{root}/{rest}` → `{rest}`; anything else passes through unchanged.
fn strip_root(path: &str, root: &str) -> String {
    let prefix = format!("{}/", root.trim_end_matches('/'));
    path.strip_prefix(&prefix).unwrap_or(path).to_string()
}
