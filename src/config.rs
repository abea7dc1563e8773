//! Tool configuration from environment variables.
//!
//! All knobs come in through `XcodeCache_*` variables exported by the user
//! or the CI wrapper; nothing is read from disk. `from_env_map` exists so
//! tests can build a config without touching the process environment.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Cache-root variable
pub const ENV_CACHE_ROOT: &str = "XcodeCache_CACHE_ROOT";
/// Entry-count bound variable
pub const ENV_CACHE_COUNT: &str = "XcodeCache_CACHE_COUNT";
/// Minimum source-file count variable
pub const ENV_MIN_SOURCE_FILE_COUNT: &str = "XcodeCache_MIN_SOURCE_FILE_COUNT";
/// Disables the module-map digest line in fingerprints
pub const ENV_NOT_DETECT_MODULE_MAP_DEPENDENCY: &str =
    "XcodeCache_NOT_DETECT_MODULE_MAP_DEPENDENCY";
/// Enables inter-target dependency tracking
pub const ENV_TRACK_TARGET_DEPENDENCIES: &str = "XcodeCache_TRACK_TARGET_DEPENDENCIES";
/// Wipes the cache root at the start of `pre`
pub const ENV_CLEAR_ALL: &str = "XcodeCache_CLEAR_ALL";

/// Errors for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidInteger { var: &'static str, value: String },
}

/// Effective tool configuration for one run.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding cache entries
    pub cache_root: PathBuf,

    /// Maximum number of cache entries kept after eviction
    pub cache_count: usize,

    /// Targets with fewer source files than this are not cached
    pub min_source_file_count: usize,

    /// Whether the target's module map participates in the fingerprint
    pub detect_modulemap_dependency: bool,

    /// Whether inter-target dependencies gate cache hits
    pub track_target_dependencies: bool,

    /// Whether `pre` wipes the cache root before doing anything else
    pub clear_all: bool,
}

impl CacheConfig {
    /// Snapshot the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Build a config from an explicit variable map.
    pub fn from_env_map(vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let cache_root = match vars.get(ENV_CACHE_ROOT).filter(|v| !v.is_empty()) {
            Some(v) => PathBuf::from(v),
            None => {
                let home = vars
                    .get("HOME")
                    .cloned()
                    .unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join("XcodeCache")
            }
        };

        let cache_count = parse_count(vars, ENV_CACHE_COUNT, 10_000)?;
        let min_source_file_count = parse_count(vars, ENV_MIN_SOURCE_FILE_COUNT, 1)?;

        Ok(Self {
            cache_root,
            cache_count,
            min_source_file_count,
            detect_modulemap_dependency: !flag_set(vars, ENV_NOT_DETECT_MODULE_MAP_DEPENDENCY),
            track_target_dependencies: flag_set(vars, ENV_TRACK_TARGET_DEPENDENCIES),
            clear_all: flag_set(vars, ENV_CLEAR_ALL),
        })
    }
}

fn parse_count(
    vars: &BTreeMap<String, String>,
    var: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match vars.get(var).filter(|v| !v.is_empty()) {
        Some(v) => v.parse::<usize>().map_err(|_| ConfigError::InvalidInteger {
            var,
            value: v.clone(),
        }),
        None => Ok(default),
    }
}

/// Xcode convention: boolean settings are the literal string `YES`.
fn flag_set(vars: &BTreeMap<String, String>, var: &str) -> bool {
    vars.get(var).map(|v| v == "YES").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = CacheConfig::from_env_map(&env(&[("HOME", "/Users/dev")])).unwrap();
        assert_eq!(cfg.cache_root, PathBuf::from("/Users/dev/XcodeCache"));
        assert_eq!(cfg.cache_count, 10_000);
        assert_eq!(cfg.min_source_file_count, 1);
        assert!(cfg.detect_modulemap_dependency);
        assert!(!cfg.track_target_dependencies);
        assert!(!cfg.clear_all);
    }

    #[test]
    fn test_home_fallback() {
        let cfg = CacheConfig::from_env_map(&env(&[])).unwrap();
        assert_eq!(cfg.cache_root, PathBuf::from("/tmp/XcodeCache"));
    }

    #[test]
    fn test_explicit_values() {
        let cfg = CacheConfig::from_env_map(&env(&[
            (ENV_CACHE_ROOT, "/var/cache/xc"),
            (ENV_CACHE_COUNT, "2"),
            (ENV_MIN_SOURCE_FILE_COUNT, "5"),
            (ENV_NOT_DETECT_MODULE_MAP_DEPENDENCY, "YES"),
            (ENV_TRACK_TARGET_DEPENDENCIES, "YES"),
            (ENV_CLEAR_ALL, "YES"),
        ]))
        .unwrap();
        assert_eq!(cfg.cache_root, PathBuf::from("/var/cache/xc"));
        assert_eq!(cfg.cache_count, 2);
        assert_eq!(cfg.min_source_file_count, 5);
        assert!(!cfg.detect_modulemap_dependency);
        assert!(cfg.track_target_dependencies);
        assert!(cfg.clear_all);
    }

    #[test]
    fn test_flag_requires_yes() {
        let cfg = CacheConfig::from_env_map(&env(&[(ENV_CLEAR_ALL, "true")])).unwrap();
        assert!(!cfg.clear_all);
    }

    #[test]
    fn test_invalid_count_is_fatal() {
        let err = CacheConfig::from_env_map(&env(&[(ENV_CACHE_COUNT, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInteger { .. }));
    }
}
