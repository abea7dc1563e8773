//! The `printenv` stage.
//!
//! Injected into every miss target; runs inside that target's build with
//! the build tool's environment. Captures the variables `post` needs to
//! archive the product and advances the sidecar to MISS_READY.

use std::collections::BTreeMap;
use std::path::Path;

use crate::context::{MissReadyContext, TargetContext};

use super::{capture_build_env, StageError};

/// Run the stage for one target.
pub fn run(
    target_name: &str,
    project_path: &Path,
    env: &BTreeMap<String, String>,
) -> Result<(), StageError> {
    let sidecar = TargetContext::sidecar_path(project_path, target_name);
    let captured = capture_build_env(env);

    let next = match TargetContext::load(&sidecar)? {
        TargetContext::Miss(miss) => TargetContext::MissReady(MissReadyContext {
            miss,
            build_env: captured,
        }),
        // A re-run inside the same build refreshes the capture.
        TargetContext::MissReady(ready) => TargetContext::MissReady(MissReadyContext {
            miss: ready.miss,
            build_env: captured,
        }),
        hit @ TargetContext::Hit(_) => {
            log::warn!(
                "printenv invoked for {} which is already a hit; leaving sidecar unchanged",
                target_name
            );
            hit
        }
    };

    next.store(&sidecar)?;
    log::debug!("captured build environment for {}", target_name);
    Ok(())
}
