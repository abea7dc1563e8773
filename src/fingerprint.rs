//! Target fingerprints.
//!
//! A target's fingerprint identifies its input equivalence class: the
//! digest of a newline-joined document covering the build arguments, the
//! pod spec checksum, the project and target configurations, per-file
//! build settings, and the digest of every source file. Unchanged inputs
//! produce a byte-identical document on any machine, because absolute
//! paths are relativized and search-path settings are excluded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::hasher::{hash_bytes, strip_pwd, FileHasher, HashError};
use crate::lockfile::SpecChecksums;
use crate::project::{BuildConfiguration, NativeTarget, Project};

/// Bump to invalidate every existing cache entry.
pub const CACHE_VERSION: &str = "xcodecache-cache-v1";

/// Build-setting lines excluded from hashed xcconfig contents. Search
/// paths churn with DerivedData relocation without changing outputs.
const SEARCH_PATHS_MARKER: &str = "_SEARCH_PATHS";

/// Arguments dropped from the vector together with their value.
const VALUED_ARGS: &[&str] = &[
    "-derivedDataPath",
    "-archivePath",
    "--derived_data_path",
    "--archive_path",
    "--build_path",
];

/// Argument prefixes dropped outright.
const PREFIXED_ARGS: &[&str] = &["DSTROOT=", "OBJROOT=", "SYMROOT="];

/// Errors for fingerprint computation
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("hashing {target}: {source}")]
    Hash {
        target: String,
        #[source]
        source: HashError,
    },

    #[error("reading xcconfig {path}: {source}")]
    Xcconfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything the fingerprint of one target is derived from.
pub struct FingerprintInputs<'a> {
    pub project: &'a Project,
    pub target: &'a NativeTarget,
    pub configuration: &'a str,
    pub build_args: &'a [String],
    pub source_files: &'a [PathBuf],
    pub checksums: &'a SpecChecksums,
    /// Working directory used for path relativization
    pub cwd: &'a Path,
    /// Source root used for digest fallback resolution
    pub srcroot: Option<&'a Path>,
    /// Whether the target's module map digest joins the document
    pub detect_modulemap: bool,
}

/// A computed fingerprint: the digest plus its pre-image, kept for the
/// cache entry's `message.txt` and for drift diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub target_md5: String,
    pub target_md5_content: String,
}

/// Compute a target's fingerprint.
pub fn compute(
    inputs: &FingerprintInputs<'_>,
    hasher: &mut FileHasher,
) -> Result<Fingerprint, FingerprintError> {
    let content = build_document(inputs, hasher)?;
    Ok(Fingerprint {
        target_md5: hash_bytes(content.as_bytes()),
        target_md5_content: content,
    })
}

/// Assemble the pre-image document. Section order is fixed; every section
/// is deterministic on unchanged inputs.
pub fn build_document(
    inputs: &FingerprintInputs<'_>,
    hasher: &mut FileHasher,
) -> Result<String, FingerprintError> {
    let mut sections: Vec<String> = Vec::new();

    sections.push(CACHE_VERSION.to_string());
    sections.extend(filter_build_args(inputs.build_args));
    sections.extend(spec_checksum_lines(inputs));
    sections.push(
        inputs
            .project
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );

    // Project configuration and xcconfig.
    if let Some(config) = inputs.project.data.configuration(inputs.configuration) {
        sections.push(config.settings_text());
        sections.push(xcconfig_text(inputs.project, config)?);
    }

    // Target configuration and xcconfig, same treatment.
    if let Some(config) = inputs.target.configuration(inputs.configuration) {
        sections.push(config.settings_text());
        sections.push(xcconfig_text(inputs.project, config)?);
    }

    sections.push(per_file_settings_text(inputs.target));
    sections.extend(file_digest_lines(inputs, hasher)?);

    if inputs.detect_modulemap {
        if let Some(line) = modulemap_digest_line(inputs, hasher)? {
            sections.push(line);
        }
    }

    Ok(sections.join("\n"))
}

/// Drop arguments that vary with the build location but not the output.
pub fn filter_build_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut skip_value = false;
    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        if VALUED_ARGS.contains(&arg.as_str()) {
            skip_value = true;
            continue;
        }
        if PREFIXED_ARGS.iter().any(|p| arg.starts_with(p)) {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

/// Candidate spec names for a target, in deterministic order.
pub fn candidate_spec_names(inputs: &FingerprintInputs<'_>) -> Vec<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    let resolved = |key: &str| {
        inputs
            .project
            .resolved_setting(inputs.target, inputs.configuration, key)
    };

    if let Some(name) = resolved("PRODUCT_NAME") {
        names.insert(name);
    }
    if let Some(name) = resolved("IBSC_MODULE") {
        names.insert(name);
    }
    for key in ["CONFIGURATION_BUILD_DIR", "PODS_TARGET_SRCROOT"] {
        if let Some(value) = resolved(key) {
            if let Some(base) = Path::new(&value).file_name() {
                names.insert(base.to_string_lossy().into_owned());
            }
        }
    }

    names.into_iter().collect()
}

fn spec_checksum_lines(inputs: &FingerprintInputs<'_>) -> Vec<String> {
    let lines: Vec<String> = candidate_spec_names(inputs)
        .into_iter()
        .filter_map(|name| {
            inputs
                .checksums
                .get(&name)
                .map(|sum| format!("{}: {}", name, sum))
        })
        .collect();

    if lines.len() != 1 {
        log::warn!(
            "target {} matched {} spec checksums (expected exactly 1)",
            inputs.target.name,
            lines.len()
        );
    }
    lines
}

/// Contents of a configuration's base xcconfig with search-path lines
/// excluded, lexicographically sorted.
fn xcconfig_text(
    project: &Project,
    configuration: &BuildConfiguration,
) -> Result<String, FingerprintError> {
    let Some(path) = project.xcconfig_path(configuration) else {
        return Ok(String::new());
    };
    if !path.is_file() {
        return Ok(String::new());
    }

    let raw = std::fs::read_to_string(&path).map_err(|source| FingerprintError::Xcconfig {
        path: path.clone(),
        source,
    })?;
    let mut lines: Vec<&str> = raw
        .lines()
        .filter(|line| !line.contains(SEARCH_PATHS_MARKER))
        .collect();
    lines.sort_unstable();
    Ok(lines.join("\n"))
}

/// Per-file settings of the sources phase only, flattened to member
/// files, deduplicated and sorted.
fn per_file_settings_text(target: &NativeTarget) -> String {
    let mut entries: BTreeSet<String> = BTreeSet::new();

    if let Some(phase) = target.sources_phase() {
        for build_file in phase.files() {
            if !build_file.has_settings() {
                continue;
            }
            let settings = build_file.settings_text();
            for member in build_file.file_ref.member_paths() {
                let basename = member.rsplit('/').next().unwrap_or(member);
                entries.insert(format!("{}\n{}", basename, settings));
            }
        }
    }

    entries.into_iter().collect::<Vec<_>>().join("\n")
}

fn file_digest_lines(
    inputs: &FingerprintInputs<'_>,
    hasher: &mut FileHasher,
) -> Result<Vec<String>, FingerprintError> {
    let files: BTreeSet<&PathBuf> = inputs.source_files.iter().collect();
    let mut lines = Vec::with_capacity(files.len());
    for file in files {
        let digest = hasher
            .digest(file, inputs.srcroot)
            .map_err(|source| FingerprintError::Hash {
                target: inputs.target.name.clone(),
                source,
            })?;
        lines.push(format!(
            "{} : {}",
            strip_pwd(inputs.cwd, &file.to_string_lossy()),
            digest
        ));
    }
    Ok(lines)
}

/// The module map is a compiler input not covered by any build phase;
/// with detection on it joins the document like a source file.
fn modulemap_digest_line(
    inputs: &FingerprintInputs<'_>,
    hasher: &mut FileHasher,
) -> Result<Option<String>, FingerprintError> {
    let Some(value) =
        inputs
            .project
            .resolved_setting(inputs.target, inputs.configuration, "MODULE_MAP_FILE")
    else {
        return Ok(None);
    };

    let path = PathBuf::from(strip_pwd(inputs.cwd, &value));
    match hasher.digest(&path, inputs.srcroot) {
        Ok(digest) => Ok(Some(format!(
            "{} : {}",
            strip_pwd(inputs.cwd, &path.to_string_lossy()),
            digest
        ))),
        Err(HashError::NotFound { .. }) => Ok(None),
        Err(source) => Err(FingerprintError::Hash {
            target: inputs.target.name.clone(),
            source,
        }),
    }
}
