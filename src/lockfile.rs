//! Pod spec checksums from the workspace lockfile.
//!
//! `Podfile.lock` is YAML; the only section the fingerprint consumes is
//! the `SPEC CHECKSUMS` mapping of pod name to spec checksum.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Lockfile name next to the Podfile.
pub const PODFILE_LOCK: &str = "Podfile.lock";

const SPEC_CHECKSUMS_KEY: &str = "SPEC CHECKSUMS";

/// Errors for lockfile parsing
#[derive(Debug, thiserror::Error)]
pub enum LockfileError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed lockfile {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The parsed `SPEC CHECKSUMS` map. Loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct SpecChecksums {
    checksums: BTreeMap<String, String>,
}

impl SpecChecksums {
    /// Load from `{workspace_root}/Podfile.lock`. A missing lockfile is
    /// tolerated (the checksum section of the fingerprint stays empty);
    /// a malformed one is not.
    pub fn load(workspace_root: &Path) -> Result<Self, LockfileError> {
        let path = workspace_root.join(PODFILE_LOCK);
        if !path.is_file() {
            log::warn!("no {} under {}; fingerprints omit spec checksums", PODFILE_LOCK, workspace_root.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| LockfileError::Io {
            path: path.clone(),
            source,
        })?;
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&raw).map_err(|source| LockfileError::Malformed {
                path: path.clone(),
                source,
            })?;

        let mut checksums = BTreeMap::new();
        if let Some(map) = doc.get(SPEC_CHECKSUMS_KEY).and_then(|v| v.as_mapping()) {
            for (k, v) in map {
                if let (Some(name), Some(sum)) = (k.as_str(), v.as_str()) {
                    checksums.insert(name.to_string(), sum.to_string());
                }
            }
        }

        Ok(Self { checksums })
    }

    /// Build directly from a name→checksum map.
    pub fn from_map(checksums: BTreeMap<String, String>) -> Self {
        Self { checksums }
    }

    /// Checksum for one spec name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.checksums.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LOCKFILE: &str = "\
PODS:
  - AFNetworking (4.0.1)
  - Masonry (1.1.0)

DEPENDENCIES:
  - AFNetworking
  - Masonry

SPEC CHECKSUMS:
  AFNetworking: 7864c38297c79aaca1500c33288e429c3451fdce
  Masonry: 678fab65091a9290e40e2832a55e7ab731aad201

PODFILE CHECKSUM: 3cf0ad0ae4a737d7514ba5a5b7bd4e00c43f9b2c

COCOAPODS: 1.11.3
";

    #[test]
    fn test_load_spec_checksums() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PODFILE_LOCK), LOCKFILE).unwrap();

        let checksums = SpecChecksums::load(dir.path()).unwrap();
        assert_eq!(
            checksums.get("AFNetworking"),
            Some("7864c38297c79aaca1500c33288e429c3451fdce")
        );
        assert_eq!(checksums.get("NotAPod"), None);
    }

    #[test]
    fn test_missing_lockfile_is_empty() {
        let dir = TempDir::new().unwrap();
        let checksums = SpecChecksums::load(dir.path()).unwrap();
        assert!(checksums.is_empty());
    }

    #[test]
    fn test_malformed_lockfile_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PODFILE_LOCK), "SPEC CHECKSUMS: [\n  broken").unwrap();
        assert!(SpecChecksums::load(dir.path()).is_err());
    }
}
