//! The `clean` stage: the unconditional rollback.
//!
//! Restores every mutated project from its backup, force-removes any
//! leftover backup, and deletes target sidecars. The cache root is never
//! touched here; only `pre` honors the clear-all flag.

use super::{cleanup_project_dir, find_project_dirs, RunContext, StageError};

/// Run the stage.
pub fn run(ctx: &RunContext) -> Result<usize, StageError> {
    let mut restored = 0;
    for project_dir in find_project_dirs(&ctx.cwd) {
        if cleanup_project_dir(&project_dir)? {
            restored += 1;
        }
    }
    log::info!("clean: {} project(s) restored", restored);
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::context::{MissContext, TargetContext};
    use crate::project::{mutator, Project, BACKUP_FILE, PBXPROJ_FILE};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_clean_restores_and_removes_sidecars() {
        let dir = TempDir::new().unwrap();
        let proj_dir = dir.path().join("Pods/Pods.xcodeproj");
        crate::project::tests::write_project(
            &proj_dir,
            json!({"build_configurations": [], "targets": []}),
        );
        let original = fs::read_to_string(proj_dir.join(PBXPROJ_FILE)).unwrap();

        // Simulate a pre that mutated the project and wrote a sidecar.
        let project = Project::open(&proj_dir).unwrap();
        mutator::backup(&project).unwrap();
        fs::write(proj_dir.join(PBXPROJ_FILE), "{\"targets\":[]}").unwrap();
        TargetContext::Miss(MissContext {
            target_name: "AF".to_string(),
            target_md5: "a".repeat(32),
            target_md5_content: String::new(),
            configuration: "Release".to_string(),
            source_files: vec![],
            dependent_targets: BTreeMap::new(),
        })
        .store(&TargetContext::sidecar_path(&proj_dir, "AF"))
        .unwrap();

        let config = CacheConfig::from_env_map(&BTreeMap::new()).unwrap();
        let ctx = RunContext::at(config, dir.path().to_path_buf()).unwrap();
        assert_eq!(run(&ctx).unwrap(), 1);

        assert_eq!(
            fs::read_to_string(proj_dir.join(PBXPROJ_FILE)).unwrap(),
            original
        );
        assert!(!proj_dir.join(BACKUP_FILE).exists());
        assert!(!TargetContext::sidecar_path(&proj_dir, "AF").exists());

        // Idempotent on an already-clean tree.
        assert_eq!(run(&ctx).unwrap(), 0);
    }
}
