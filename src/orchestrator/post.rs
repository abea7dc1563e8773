//! The `post` stage.
//!
//! Runs after the build tool exits: archives the product of every target
//! that reached MISS_READY, restores the projects from their backups,
//! and evicts the cache down to its bound. Per-target validation
//! failures skip that target only; the rest of the pipeline proceeds.

use std::path::{Path, PathBuf};

use crate::context::{
    MissReadyContext, TargetContext, REQUIRED_BUILD_ENV_VARS,
};
use crate::fingerprint::{self, FingerprintInputs};
use crate::hasher::strip_pwd;
use crate::project::{NativeTarget, ProductType, Project, Workspace};
use crate::store::{archive, CacheStore};

use super::{cleanup_project_dir, find_project_dirs, parse_configuration, RunContext, StageError};

/// Aggregate counts reported by `post`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PostReport {
    /// New cache entries inserted
    pub archived: usize,
    /// Hit targets whose sidecar was verified
    pub hits: usize,
    /// Targets skipped by per-target validation
    pub skipped: usize,
    /// Entries removed by eviction
    pub evicted: usize,
}

enum Outcome {
    Archived,
    Skipped(String),
}

/// Run the stage. `build_args` must match what `pre` received.
pub fn run(ctx: &mut RunContext, build_args: &[String]) -> Result<PostReport, StageError> {
    parse_configuration(build_args).ok_or(StageError::MissingConfigurationArg)?;

    let workspace = Workspace::open(&ctx.cwd)?;
    let store = ctx.store();
    let mut report = PostReport::default();

    for (pi, ti) in workspace.cacheable_targets() {
        let project = &workspace.projects[pi];
        let target = &project.data.targets[ti];
        let sidecar = TargetContext::sidecar_path(&project.path, &target.name);
        if !sidecar.exists() {
            continue;
        }

        let context = match TargetContext::load(&sidecar) {
            Ok(context) => context,
            Err(err) => {
                log::warn!("unreadable sidecar for {}: {}", target.name, err);
                report.skipped += 1;
                continue;
            }
        };

        match context {
            TargetContext::Hit(hit) => {
                if let Some(modulemap) = &hit.modulemap_file {
                    if !ctx.cwd.join(modulemap).exists() {
                        log::warn!(
                            "{}: recorded modulemap {} is gone from the working tree",
                            hit.target_name,
                            modulemap
                        );
                    }
                }
                report.hits += 1;
            }
            TargetContext::Miss(_) => {
                log::warn!(
                    "{}: never captured a build environment; the build may have skipped it",
                    target.name
                );
                report.skipped += 1;
            }
            TargetContext::MissReady(ready) => {
                match archive_target(ctx, project, target, &ready, build_args, &store)? {
                    Outcome::Archived => report.archived += 1,
                    Outcome::Skipped(reason) => {
                        log::warn!("not caching {}: {}", target.name, reason);
                        report.skipped += 1;
                    }
                }
            }
        }
    }

    for project_dir in find_project_dirs(&ctx.cwd) {
        cleanup_project_dir(&project_dir)?;
    }

    report.evicted = store.evict()?;
    log::info!(
        "post: {} archived, {} hit(s) verified, {} skipped, {} evicted",
        report.archived,
        report.hits,
        report.skipped,
        report.evicted
    );
    Ok(report)
}

/// Validate a readied miss and insert its product into the store.
fn archive_target(
    ctx: &mut RunContext,
    project: &Project,
    target: &NativeTarget,
    ready: &MissReadyContext,
    build_args: &[String],
    store: &CacheStore,
) -> Result<Outcome, StageError> {
    for key in REQUIRED_BUILD_ENV_VARS {
        if !ready.build_env.contains_key(*key) {
            return Ok(Outcome::Skipped(format!(
                "build environment is missing {}",
                key
            )));
        }
    }
    let env = |key: &str| ready.build_env.get(key).cloned().unwrap_or_default();
    let srcroot = PathBuf::from(env("SRCROOT"));

    // Guard against environment drift: the inputs archived must be the
    // inputs fingerprinted in pre.
    let source_files: Vec<PathBuf> = ready.miss.source_files.iter().map(PathBuf::from).collect();
    let inputs = FingerprintInputs {
        project,
        target,
        configuration: &ready.miss.configuration,
        build_args,
        source_files: &source_files,
        checksums: &ctx.checksums,
        cwd: &ctx.cwd,
        srcroot: Some(&srcroot),
        detect_modulemap: ctx.config.detect_modulemap_dependency,
    };
    let recomputed = match fingerprint::compute(&inputs, &mut ctx.hasher) {
        Ok(fingerprint) => fingerprint,
        Err(err) => return Ok(Outcome::Skipped(format!("fingerprint recomputation: {}", err))),
    };
    if recomputed.target_md5 != ready.miss.target_md5 {
        return Ok(Outcome::Skipped(format!(
            "inputs changed during the build ({} != {})",
            recomputed.target_md5, ready.miss.target_md5
        )));
    }

    let modulemap_file = match resolve_modulemap(ctx, &srcroot, &env("MODULEMAP_FILE")) {
        Ok(modulemap) => modulemap,
        Err(reason) => return Ok(Outcome::Skipped(reason)),
    };

    let product_dir = PathBuf::from(env("CONFIGURATION_BUILD_DIR"));
    if !product_dir.is_dir() {
        return Ok(Outcome::Skipped(format!(
            "product directory {} does not exist",
            product_dir.display()
        )));
    }

    archive::rewrite_modulemaps(&product_dir)?;
    let packed = archive::pack(
        &product_dir,
        target.product_type == ProductType::StaticLibrary,
    )?;
    let stored = crate::context::StoredContext::from_miss_ready(
        ready,
        packed.product_md5,
        modulemap_file,
        &ctx.cwd,
    )?;
    let entry = store.insert(&stored, &ready.miss.target_md5_content, &packed.tar_path)?;

    log::info!("cached {} at {}", target.name, entry.display());
    Ok(Outcome::Archived)
}

/// Re-root the captured `MODULEMAP_FILE` through `SRCROOT` and make it
/// working-directory relative. `Err` carries the skip reason.
fn resolve_modulemap(
    ctx: &RunContext,
    srcroot: &Path,
    raw: &str,
) -> Result<Option<String>, String> {
    if raw.is_empty() {
        return Ok(None);
    }

    let relative = strip_pwd(&ctx.cwd, raw);
    let rooted = if Path::new(&relative).is_absolute() {
        PathBuf::from(&relative)
    } else {
        srcroot.join(&relative)
    };
    if !rooted.exists() {
        return Err(format!(
            "modulemap {} not found under {}",
            relative,
            srcroot.display()
        ));
    }

    Ok(Some(strip_pwd(&ctx.cwd, &rooted.to_string_lossy())))
}
