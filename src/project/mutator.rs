//! Project mutation: backup/restore of the serialized project and
//! injection of the cache's shell-script build phases.
//!
//! Mutation is bracketed: `pre` backs up and saves, `post` restores,
//! `clean` is the unconditional rollback. All operations are idempotent
//! across repeated `pre` calls as long as `post` or `clean` ran between.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::model::{BuildPhase, NativeTarget};
use super::{Project, BACKUP_FILE, PBXPROJ_FILE};

/// Shell used for injected phases.
const SHELL_PATH: &str = "/bin/sh";

/// Name prefix of the injected extract phase.
pub const EXTRACT_PHASE_PREFIX: &str = "xcodecache_extract_";

/// Name prefix of the injected printenv phase.
pub const PRINTENV_PHASE_PREFIX: &str = "xcodecache_printenv_";

/// Copy the serialized project to its backup sibling.
pub fn backup(project: &Project) -> io::Result<()> {
    fs::copy(project.pbxproj_path(), project.backup_path()).map(|_| ())
}

/// If a backup exists under `project_dir`, rename it back over the
/// serialized project. Returns whether a restore happened.
pub fn restore(project_dir: &Path) -> io::Result<bool> {
    let backup = project_dir.join(BACKUP_FILE);
    if !backup.exists() {
        return Ok(false);
    }
    fs::rename(&backup, project_dir.join(PBXPROJ_FILE))?;
    Ok(true)
}

/// Remove the backup under `project_dir` if present.
pub fn clean_backup(project_dir: &Path) -> io::Result<()> {
    let backup = project_dir.join(BACKUP_FILE);
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    Ok(())
}

/// How injected scripts call back into this tool.
///
/// When the tool runs under a bundler-managed environment (both the bin
/// path and the gemfile variables are exported), the injected command must
/// re-enter through the bundler shim: the build tool's shell does not
/// inherit the shim's PATH. Otherwise the tool's own executable path is
/// used directly.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    base: String,
}

impl ToolInvocation {
    /// Build from explicit values. `bundle_bin_path` and `bundle_gemfile`
    /// are the observed `BUNDLE_BIN_PATH` / `BUNDLE_GEMFILE` values.
    pub fn new(
        program_path: &Path,
        bundle_bin_path: Option<&str>,
        bundle_gemfile: Option<&str>,
    ) -> Self {
        let bundler_root = match (bundle_bin_path, bundle_gemfile) {
            (Some(bin), Some(gemfile)) if !bin.is_empty() && !gemfile.is_empty() => {
                Path::new(gemfile).parent().map(Path::to_path_buf)
            }
            _ => None,
        };

        let base = match bundler_root {
            Some(root) => format!(
                "source ~/.bash_profile; cd \"{}\" && bundle exec xcodecache",
                root.display()
            ),
            None => format!("\"{}\"", program_path.display()),
        };
        Self { base }
    }

    /// Build from the process environment.
    pub fn from_env() -> Self {
        let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("xcodecache"));
        let bin = std::env::var("BUNDLE_BIN_PATH").ok();
        let gemfile = std::env::var("BUNDLE_GEMFILE").ok();
        Self::new(&program, bin.as_deref(), gemfile.as_deref())
    }

    /// Render a full shell command for the given stage arguments.
    pub fn command(&self, args: &[&str]) -> String {
        let mut out = self.base.clone();
        for arg in args {
            out.push_str(&format!(" \"{}\"", arg));
        }
        out
    }
}

/// Replace a hit target's file phases with a single extract phase.
///
/// All sources, headers, and resources phases are removed so the compiler
/// never runs; the appended script phase restores the product from the
/// cache entry at build time.
pub fn disable_and_inject_extract(
    target: &mut NativeTarget,
    invocation: &ToolInvocation,
    cache_dir: &Path,
    relative_product_dir: &str,
    relative_intermediate_dir: &str,
) {
    target.build_phases.retain(|p| !p.is_file_phase());

    let cache_dir = cache_dir.display().to_string();
    target.build_phases.push(BuildPhase::ShellScript {
        name: format!("{}{}", EXTRACT_PHASE_PREFIX, target.name),
        shell_path: SHELL_PATH.to_string(),
        shell_script: invocation.command(&[
            "extract",
            &cache_dir,
            relative_product_dir,
            relative_intermediate_dir,
        ]),
        show_env_vars_in_log: true,
        input_paths: vec![],
        output_paths: vec![],
    });
}

/// Append a printenv phase to a miss target so the build captures its
/// environment into the target's sidecar.
pub fn inject_printenv(target: &mut NativeTarget, invocation: &ToolInvocation, project_path: &Path) {
    let project_path = project_path.display().to_string();
    let name = target.name.clone();
    target.build_phases.push(BuildPhase::ShellScript {
        name: format!("{}{}", PRINTENV_PHASE_PREFIX, name),
        shell_path: SHELL_PATH.to_string(),
        shell_script: invocation.command(&["printenv", &name, &project_path]),
        show_env_vars_in_log: true,
        input_paths: vec![],
        output_paths: vec![],
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::model::{BuildFile, FileReference, ProductType};
    use serde_json::json;
    use tempfile::TempDir;

    fn framework_target(name: &str) -> NativeTarget {
        NativeTarget {
            name: name.to_string(),
            product_type: ProductType::Framework,
            build_configurations: vec![],
            build_phases: vec![
                BuildPhase::Sources {
                    files: vec![BuildFile {
                        file_ref: FileReference::File {
                            path: "a.m".to_string(),
                        },
                        settings: None,
                    }],
                },
                BuildPhase::Headers { files: vec![] },
                BuildPhase::Resources { files: vec![] },
                BuildPhase::Frameworks { files: vec![] },
            ],
            dependencies: vec![],
        }
    }

    fn direct_invocation() -> ToolInvocation {
        ToolInvocation::new(Path::new("/usr/local/bin/xcodecache"), None, None)
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let proj_dir = dir.path().join("Pods/Pods.xcodeproj");
        crate::project::tests::write_project(
            &proj_dir,
            json!({"build_configurations": [], "targets": []}),
        );
        let original = fs::read_to_string(proj_dir.join(PBXPROJ_FILE)).unwrap();

        let project = Project::open(&proj_dir).unwrap();
        backup(&project).unwrap();
        fs::write(proj_dir.join(PBXPROJ_FILE), "{\"targets\": []}").unwrap();

        assert!(restore(&proj_dir).unwrap());
        assert_eq!(
            fs::read_to_string(proj_dir.join(PBXPROJ_FILE)).unwrap(),
            original
        );
        // Backup was consumed by the rename.
        assert!(!proj_dir.join(BACKUP_FILE).exists());
        assert!(!restore(&proj_dir).unwrap());
    }

    #[test]
    fn test_clean_backup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let proj_dir = dir.path().join("Pods/Pods.xcodeproj");
        crate::project::tests::write_project(
            &proj_dir,
            json!({"build_configurations": [], "targets": []}),
        );

        let project = Project::open(&proj_dir).unwrap();
        backup(&project).unwrap();
        clean_backup(&proj_dir).unwrap();
        clean_backup(&proj_dir).unwrap();
        assert!(!proj_dir.join(BACKUP_FILE).exists());
    }

    #[test]
    fn test_disable_and_inject_extract() {
        let mut target = framework_target("AFNetworking");
        disable_and_inject_extract(
            &mut target,
            &direct_invocation(),
            Path::new("/cache/AFNetworking-abc-1"),
            "Release-iphoneos/AFNetworking",
            "Pods.build/Release-iphoneos/AFNetworking.build",
        );

        // File phases are gone, frameworks phase survives.
        assert!(target.build_phases.iter().all(|p| !p.is_file_phase()));
        assert_eq!(target.build_phases.len(), 2);

        match target.build_phases.last().unwrap() {
            BuildPhase::ShellScript {
                name,
                shell_script,
                show_env_vars_in_log,
                ..
            } => {
                assert_eq!(name, "xcodecache_extract_AFNetworking");
                assert!(shell_script.contains("extract"));
                assert!(shell_script.contains("/cache/AFNetworking-abc-1"));
                assert!(show_env_vars_in_log);
            }
            other => panic!("expected shell script phase, got {:?}", other),
        }
    }

    #[test]
    fn test_inject_printenv_keeps_phases() {
        let mut target = framework_target("AFNetworking");
        let before = target.build_phases.len();
        inject_printenv(
            &mut target,
            &direct_invocation(),
            Path::new("/work/Pods/Pods.xcodeproj"),
        );

        assert_eq!(target.build_phases.len(), before + 1);
        match target.build_phases.last().unwrap() {
            BuildPhase::ShellScript { name, shell_script, .. } => {
                assert_eq!(name, "xcodecache_printenv_AFNetworking");
                assert!(shell_script.contains("printenv"));
                assert!(shell_script.contains("AFNetworking"));
            }
            other => panic!("expected shell script phase, got {:?}", other),
        }
    }

    #[test]
    fn test_bundler_invocation() {
        let inv = ToolInvocation::new(
            Path::new("/ignored"),
            Some("/repo/vendor/bundle/bin"),
            Some("/repo/Gemfile"),
        );
        let cmd = inv.command(&["clean"]);
        assert!(cmd.contains("source ~/.bash_profile"));
        assert!(cmd.contains("cd \"/repo\""));
        assert!(cmd.contains("bundle exec xcodecache \"clean\""));
    }

    #[test]
    fn test_direct_invocation_when_bundler_absent() {
        let inv = ToolInvocation::new(Path::new("/opt/xcodecache"), Some(""), None);
        assert_eq!(inv.command(&[]), "\"/opt/xcodecache\"");
    }
}
