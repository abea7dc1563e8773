//! XcodeCache - build-artifact cache for CocoaPods-managed workspaces
//!
//! This crate implements a content-addressed cache for pod targets: `pre`
//! fingerprints each cacheable target and rewires the project so cached
//! products are extracted instead of rebuilt, the build tool runs the
//! injected `printenv`/`extract` stages per target, and `post` archives
//! newly built products and restores the projects.

pub mod config;
pub mod context;
pub mod fingerprint;
pub mod hasher;
pub mod lockfile;
pub mod logging;
pub mod orchestrator;
pub mod project;
pub mod store;

pub use config::CacheConfig;
pub use context::{HitContext, MissContext, MissReadyContext, StoredContext, TargetContext};
pub use fingerprint::{Fingerprint, FingerprintInputs};
pub use hasher::{strip_pwd, FileHasher};
pub use lockfile::SpecChecksums;
pub use orchestrator::{RunContext, StageError};
pub use project::{Project, Workspace};
pub use store::{CacheEntry, CacheStore};
