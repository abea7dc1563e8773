//! The `pre` stage.
//!
//! Runs before the build tool: fingerprints every cacheable target,
//! binds cache candidates, and mutates the projects so hit targets
//! extract instead of compiling and miss targets report their build
//! environment. Projects are backed up before the mutated body is saved;
//! a crashed run is recovered by the stale-state cleanup at the top of
//! the next `pre`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::context::{HitContext, MissContext, TargetContext};
use crate::fingerprint::{self, Fingerprint, FingerprintInputs};
use crate::project::{self, mutator, Workspace};
use crate::store::{CacheEntry, CacheStore};

use super::{cleanup_project_dir, find_project_dirs, parse_configuration, RunContext, StageError};

/// Aggregate counts reported by `pre`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreReport {
    pub hits: usize,
    pub misses: usize,
    /// Cacheable targets below the source-file threshold
    pub skipped: usize,
}

#[derive(Debug)]
enum Resolution {
    Unresolved,
    Hit(CacheEntry),
    Miss,
}

struct PendingTarget {
    project_idx: usize,
    target_name: String,
    fingerprint: Fingerprint,
    source_files: Vec<PathBuf>,
    /// Cacheable dependency name → its fingerprint (tracking only)
    dependencies: BTreeMap<String, String>,
    candidates: Vec<CacheEntry>,
    resolution: Resolution,
}

/// Run the stage. `build_args` is the raw argument vector handed to the
/// build tool.
pub fn run(ctx: &mut RunContext, build_args: &[String]) -> Result<PreReport, StageError> {
    let configuration =
        parse_configuration(build_args).ok_or(StageError::MissingConfigurationArg)?;

    let store = ctx.store();
    if ctx.config.clear_all {
        log::info!("clear-all requested; removing cache root {}", store.root().display());
        store.clear()?;
    }

    // Recover from any earlier run that died between pre and post.
    for project_dir in find_project_dirs(&ctx.cwd) {
        if cleanup_project_dir(&project_dir)? {
            log::warn!("restored stale backup under {}", project_dir.display());
        }
    }

    let mut workspace = Workspace::open(&ctx.cwd)?;
    let mut report = PreReport::default();
    let mut pending = collect_pending(ctx, &workspace, &configuration, build_args, &store, &mut report)?;

    resolve(&mut pending);

    // Mutate projects and write sidecars.
    let invocation = mutator::ToolInvocation::from_env();
    for (pi, project) in workspace.projects.iter_mut().enumerate() {
        let project_path = project.path.clone();

        for target_plan in pending.iter().filter(|t| t.project_idx == pi) {
            let sidecar = TargetContext::sidecar_path(&project_path, &target_plan.target_name);
            match &target_plan.resolution {
                Resolution::Hit(entry) => {
                    let target = project.target_mut(&target_plan.target_name)?;
                    mutator::disable_and_inject_extract(
                        target,
                        &invocation,
                        &entry.dir,
                        &entry.context.build_product_dir,
                        &entry.context.build_intermediate_dir,
                    );
                    project.mark_dirty();

                    if let Err(err) = CacheStore::touch(&entry.dir) {
                        log::warn!("could not refresh {}: {}", entry.dir.display(), err);
                    }

                    TargetContext::Hit(HitContext {
                        target_name: target_plan.target_name.clone(),
                        target_md5: target_plan.fingerprint.target_md5.clone(),
                        hit_target_cache_dir: entry.dir.display().to_string(),
                        build_product_dir: entry.context.build_product_dir.clone(),
                        build_intermediate_dir: entry.context.build_intermediate_dir.clone(),
                        modulemap_file: entry.context.modulemap_file.clone(),
                        dependent_targets: entry.context.dependent_targets.clone(),
                    })
                    .store(&sidecar)?;
                    report.hits += 1;
                }
                Resolution::Miss | Resolution::Unresolved => {
                    let target = project.target_mut(&target_plan.target_name)?;
                    mutator::inject_printenv(target, &invocation, &project_path);
                    project.mark_dirty();

                    TargetContext::Miss(MissContext {
                        target_name: target_plan.target_name.clone(),
                        target_md5: target_plan.fingerprint.target_md5.clone(),
                        target_md5_content: target_plan.fingerprint.target_md5_content.clone(),
                        configuration: configuration.clone(),
                        source_files: target_plan
                            .source_files
                            .iter()
                            .map(|p| p.to_string_lossy().into_owned())
                            .collect(),
                        dependent_targets: target_plan.dependencies.clone(),
                    })
                    .store(&sidecar)?;
                    report.misses += 1;
                }
            }
        }

        if project.is_dirty() {
            mutator::backup(project).map_err(|source| StageError::Io {
                path: project.backup_path(),
                source,
            })?;
            project.save()?;
        } else {
            mutator::clean_backup(&project_path).map_err(|source| StageError::Io {
                path: project_path.clone(),
                source,
            })?;
        }
    }

    log::info!(
        "pre: {} hit(s), {} miss(es), {} skipped",
        report.hits,
        report.misses,
        report.skipped
    );
    Ok(report)
}

/// Fingerprint every cacheable target and gather its cache candidates.
fn collect_pending(
    ctx: &mut RunContext,
    workspace: &Workspace,
    configuration: &str,
    build_args: &[String],
    store: &CacheStore,
    report: &mut PreReport,
) -> Result<Vec<PendingTarget>, StageError> {
    let mut pending = Vec::new();

    for (pi, ti) in workspace.cacheable_targets() {
        let project = &workspace.projects[pi];
        let target = &project.data.targets[ti];

        let source_files = project::target_source_files(project, target);
        if source_files.len() < ctx.config.min_source_file_count {
            log::info!(
                "skipping {} ({} source file(s), need {})",
                target.name,
                source_files.len(),
                ctx.config.min_source_file_count
            );
            report.skipped += 1;
            continue;
        }

        let srcroot = project
            .resolved_setting(target, configuration, "PODS_TARGET_SRCROOT")
            .map(PathBuf::from)
            .map(|p| if p.is_absolute() { p } else { ctx.cwd.join(p) })
            .unwrap_or_else(|| project.container_dir());

        let inputs = FingerprintInputs {
            project,
            target,
            configuration,
            build_args,
            source_files: &source_files,
            checksums: &ctx.checksums,
            cwd: &ctx.cwd,
            srcroot: Some(&srcroot),
            detect_modulemap: ctx.config.detect_modulemap_dependency,
        };
        let fingerprint = fingerprint::compute(&inputs, &mut ctx.hasher)?;
        let candidates = store.candidates(&target.name, &fingerprint.target_md5)?;

        pending.push(PendingTarget {
            project_idx: pi,
            target_name: target.name.clone(),
            fingerprint,
            source_files,
            dependencies: BTreeMap::new(),
            candidates,
            resolution: Resolution::Unresolved,
        });
    }

    if ctx.config.track_target_dependencies {
        record_dependencies(workspace, &mut pending);
    }
    Ok(pending)
}

/// Dependency edges between cacheable targets, keyed by fingerprint.
fn record_dependencies(workspace: &Workspace, pending: &mut [PendingTarget]) {
    let fingerprints: BTreeMap<String, String> = pending
        .iter()
        .map(|t| (t.target_name.clone(), t.fingerprint.target_md5.clone()))
        .collect();

    for target_plan in pending.iter_mut() {
        let project = &workspace.projects[target_plan.project_idx];
        let Some(target) = project
            .data
            .targets
            .iter()
            .find(|t| t.name == target_plan.target_name)
        else {
            continue;
        };
        target_plan.dependencies = target
            .dependencies
            .iter()
            .filter_map(|dep| fingerprints.get(dep).map(|md5| (dep.clone(), md5.clone())))
            .collect();
    }
}

/// Fixed-point promotion.
///
/// A candidate binds only when every dependency it recorded is already
/// HIT with the fingerprint the candidate saw. Dependency-free entries
/// bind in the first iteration; chains settle over subsequent ones;
/// members of a dependency cycle never bind and fall out as MISS when
/// an iteration makes no transitions.
fn resolve(pending: &mut [PendingTarget]) {
    for target_plan in pending.iter_mut() {
        if target_plan.candidates.is_empty() {
            target_plan.resolution = Resolution::Miss;
        }
    }

    let mut bound: BTreeMap<String, String> = BTreeMap::new();
    loop {
        let mut changed = false;

        for target_plan in pending.iter_mut() {
            if !matches!(target_plan.resolution, Resolution::Unresolved) {
                continue;
            }
            let usable = target_plan.candidates.iter().position(|c| {
                c.context
                    .dependent_targets
                    .iter()
                    .all(|(dep, md5)| bound.get(dep) == Some(md5))
            });
            if let Some(idx) = usable {
                bound.insert(
                    target_plan.target_name.clone(),
                    target_plan.fingerprint.target_md5.clone(),
                );
                target_plan.resolution = Resolution::Hit(target_plan.candidates[idx].clone());
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    for target_plan in pending.iter_mut() {
        if matches!(target_plan.resolution, Resolution::Unresolved) {
            log::info!(
                "{}: candidates present but dependencies unresolved; treating as miss",
                target_plan.target_name
            );
            target_plan.resolution = Resolution::Miss;
        }
    }
}
