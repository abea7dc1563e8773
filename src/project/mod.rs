//! Project reading, resolution, and mutation.
//!
//! `Project` wraps one on-disk `.xcodeproj` container; `Workspace` opens
//! the root pods project and every nested sub-project. Mutation (backup,
//! phase removal, script injection) lives in `mutator`.

pub mod model;
pub mod mutator;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub use model::{
    BuildConfiguration, BuildFile, BuildPhase, FileReference, NativeTarget, ProductType,
    ProjectData, ProjectReference,
};

/// File name of the serialized project inside the container.
pub const PBXPROJ_FILE: &str = "project.pbxproj";

/// Sibling backup name used while the project is mutated.
pub const BACKUP_FILE: &str = "project.xcodecache_backup_pbxproj";

/// Errors for project operations
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed project {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no such target {target} in {project}")]
    NoSuchTarget { target: String, project: PathBuf },
}

/// One opened project container.
#[derive(Debug, Clone)]
pub struct Project {
    /// Path of the `.xcodeproj` directory
    pub path: PathBuf,

    /// Deserialized project body
    pub data: ProjectData,

    /// Set when the in-memory body diverged from disk
    dirty: bool,
}

impl Project {
    /// Open the project at the given `.xcodeproj` path.
    pub fn open(path: &Path) -> Result<Self, ProjectError> {
        let pbxproj = path.join(PBXPROJ_FILE);
        let raw = fs::read_to_string(&pbxproj).map_err(|source| ProjectError::Io {
            path: pbxproj.clone(),
            source,
        })?;
        let data = serde_json::from_str(&raw).map_err(|source| ProjectError::Malformed {
            path: pbxproj,
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            data,
            dirty: false,
        })
    }

    /// Write the project body back to disk.
    pub fn save(&self) -> Result<(), ProjectError> {
        let pbxproj = self.pbxproj_path();
        let raw = serde_json::to_string_pretty(&self.data).map_err(|source| {
            ProjectError::Malformed {
                path: pbxproj.clone(),
                source,
            }
        })?;
        fs::write(&pbxproj, raw).map_err(|source| ProjectError::Io {
            path: pbxproj,
            source,
        })
    }

    /// Project name: the container's file stem.
    pub fn name(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("project")
    }

    /// Path of the serialized project file.
    pub fn pbxproj_path(&self) -> PathBuf {
        self.path.join(PBXPROJ_FILE)
    }

    /// Path of the backup sibling.
    pub fn backup_path(&self) -> PathBuf {
        self.path.join(BACKUP_FILE)
    }

    /// Directory that file-reference paths are relative to.
    pub fn container_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Mark the in-memory body as diverged from disk.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mutable handle to a target by name.
    pub fn target_mut(&mut self, name: &str) -> Result<&mut NativeTarget, ProjectError> {
        let path = self.path.clone();
        self.data
            .targets
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or(ProjectError::NoSuchTarget {
                target: name.to_string(),
                project: path,
            })
    }

    /// Build-setting lookup: the target configuration wins, the project
    /// configuration is the fallback.
    pub fn resolved_setting(
        &self,
        target: &NativeTarget,
        configuration: &str,
        key: &str,
    ) -> Option<String> {
        target
            .configuration(configuration)
            .and_then(|c| c.setting(key))
            .or_else(|| {
                self.data
                    .configuration(configuration)
                    .and_then(|c| c.setting(key))
            })
            .map(str::to_string)
    }

    /// Absolute path of a configuration's base xcconfig file, if set.
    pub fn xcconfig_path(&self, configuration: &BuildConfiguration) -> Option<PathBuf> {
        configuration
            .base_configuration
            .as_ref()
            .map(|rel| self.container_dir().join(rel))
    }

    /// Resolve a file-reference path against the container directory.
    pub fn resolve_file_path(&self, reference_path: &str) -> PathBuf {
        let path = Path::new(reference_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.container_dir().join(path)
        }
    }
}

/// The opened workspace: the root pods project plus every nested
/// sub-project, deduplicated by absolute path.
#[derive(Debug)]
pub struct Workspace {
    pub projects: Vec<Project>,
}

impl Workspace {
    /// Relative location of the root pods project under the checkout.
    pub const PODS_PROJECT: &'static str = "Pods/Pods.xcodeproj";

    /// Open the workspace rooted at `root` (the checkout directory).
    pub fn open(root: &Path) -> Result<Self, ProjectError> {
        let root_path = root.join(Self::PODS_PROJECT);
        let root_project = Project::open(&root_path)?;

        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        seen.insert(absolutize(&root_path));

        let mut projects = vec![root_project];
        let mut cursor = 0;
        while cursor < projects.len() {
            let refs: Vec<PathBuf> = projects[cursor]
                .data
                .project_references
                .iter()
                .filter(|r| r.is_subproject())
                .map(|r| projects[cursor].container_dir().join(&r.path))
                .collect();
            cursor += 1;

            for sub_path in refs {
                if !seen.insert(absolutize(&sub_path)) {
                    continue;
                }
                projects.push(Project::open(&sub_path)?);
            }
        }

        Ok(Self { projects })
    }

    /// Indices of every cacheable target, paired with its project index.
    pub fn cacheable_targets(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (pi, project) in self.projects.iter().enumerate() {
            for (ti, target) in project.data.targets.iter().enumerate() {
                if target.is_cacheable() {
                    out.push((pi, ti));
                }
            }
        }
        out
    }
}

fn absolutize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Every real source file of a target: the union of the files referenced
/// by its sources, headers, and resources phases, with directory
/// references expanded to their contained regular files.
pub fn target_source_files(project: &Project, target: &NativeTarget) -> Vec<PathBuf> {
    let mut out: BTreeSet<PathBuf> = BTreeSet::new();

    for phase in target.build_phases.iter().filter(|p| p.is_file_phase()) {
        for build_file in phase.files() {
            for member in build_file.file_ref.member_paths() {
                let resolved = project.resolve_file_path(member);
                if resolved.is_dir() {
                    for entry in WalkDir::new(&resolved)
                        .follow_links(false)
                        .into_iter()
                        .filter_map(Result::ok)
                    {
                        if entry.file_type().is_file() {
                            out.insert(entry.path().to_path_buf());
                        }
                    }
                } else if resolved.is_file() {
                    out.insert(resolved);
                }
            }
        }
    }

    out.into_iter().collect()
}
