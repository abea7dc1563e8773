//! Shared workspace fixture for integration tests.
//!
//! Builds a minimal CocoaPods checkout in a temp directory: a lockfile,
//! one framework pod with three source files, an xcconfig, and the pods
//! project, plus helpers that stand in for the build tool (creating the
//! product directory and supplying the per-target environment).

// Each test binary uses a subset of the helpers.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use xcodecache::config::CacheConfig;
use xcodecache::orchestrator::RunContext;

pub const TARGET: &str = "AFNetworking";
pub const CONFIGURATION: &str = "Release";

const LOCKFILE: &str = "\
PODS:
  - AFNetworking (4.0.1)

DEPENDENCIES:
  - AFNetworking

SPEC CHECKSUMS:
  AFNetworking: 7864c38297c79aaca1500c33288e429c3451fdce

COCOAPODS: 1.11.3
";

pub struct FixtureWorkspace {
    pub dir: TempDir,
}

impl FixtureWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::write(root.join("Podfile.lock"), LOCKFILE).unwrap();

        let pod_dir = root.join("Pods/AFNetworking");
        fs::create_dir_all(&pod_dir).unwrap();
        fs::write(
            pod_dir.join("AFHTTPSessionManager.m"),
            "@implementation AFHTTPSessionManager\n@end\n",
        )
        .unwrap();
        fs::write(
            pod_dir.join("AFError.m"),
            "@implementation AFError\n@end\n",
        )
        .unwrap();
        fs::write(
            pod_dir.join("AFNetworking.h"),
            "#import <Foundation/Foundation.h>\n",
        )
        .unwrap();

        let xcconfig_dir = root.join("Pods/Target Support Files/AFNetworking");
        fs::create_dir_all(&xcconfig_dir).unwrap();
        fs::write(
            xcconfig_dir.join("AFNetworking.release.xcconfig"),
            "GCC_PREPROCESSOR_DEFINITIONS = $(inherited) COCOAPODS=1\nSWIFT_VERSION = 5.0\n",
        )
        .unwrap();

        let fixture = Self { dir };
        fixture.write_project(None);
        fixture
    }

    /// (Re)write the pods project. `extra_file_setting` adds a per-file
    /// compiler-flag setting to the first source file.
    pub fn write_project(&self, extra_file_setting: Option<&str>) {
        let mut first_file = json!({
            "file_ref": {"isa": "PBXFileReference", "path": "AFNetworking/AFHTTPSessionManager.m"},
        });
        if let Some(flags) = extra_file_setting {
            first_file["settings"] = json!({"COMPILER_FLAGS": flags});
        }

        let body = json!({
            "build_configurations": [
                {"name": CONFIGURATION, "build_settings": {"SYMROOT": "build"}}
            ],
            "targets": [{
                "name": TARGET,
                "product_type": "com.apple.product-type.framework",
                "build_configurations": [{
                    "name": CONFIGURATION,
                    "build_settings": {
                        "PRODUCT_NAME": TARGET,
                        "PODS_TARGET_SRCROOT": "${PODS_ROOT}/AFNetworking"
                    },
                    "base_configuration": "Target Support Files/AFNetworking/AFNetworking.release.xcconfig"
                }],
                "build_phases": [
                    {"isa": "PBXSourcesBuildPhase", "files": [
                        first_file,
                        {"file_ref": {"isa": "PBXFileReference", "path": "AFNetworking/AFError.m"}}
                    ]},
                    {"isa": "PBXHeadersBuildPhase", "files": [
                        {"file_ref": {"isa": "PBXFileReference", "path": "AFNetworking/AFNetworking.h"}}
                    ]},
                    {"isa": "PBXResourcesBuildPhase", "files": []}
                ]
            }]
        });

        let proj_dir = self.project_dir();
        fs::create_dir_all(&proj_dir).unwrap();
        fs::write(
            proj_dir.join("project.pbxproj"),
            serde_json::to_string_pretty(&body).unwrap(),
        )
        .unwrap();
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn project_dir(&self) -> PathBuf {
        self.root().join("Pods/Pods.xcodeproj")
    }

    pub fn pbxproj_path(&self) -> PathBuf {
        self.project_dir().join("project.pbxproj")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.root().join("cache")
    }

    pub fn xcconfig_path(&self) -> PathBuf {
        self.root()
            .join("Pods/Target Support Files/AFNetworking/AFNetworking.release.xcconfig")
    }

    /// Fresh per-stage context, the way each stage process gets its own.
    pub fn run_context(&self) -> RunContext {
        self.run_context_with_cache_count(100)
    }

    pub fn run_context_with_cache_count(&self, cache_count: usize) -> RunContext {
        let vars = BTreeMap::from([
            (
                "XcodeCache_CACHE_ROOT".to_string(),
                self.cache_root().display().to_string(),
            ),
            ("XcodeCache_CACHE_COUNT".to_string(), cache_count.to_string()),
        ]);
        let config = CacheConfig::from_env_map(&vars).unwrap();
        RunContext::at(config, self.root().to_path_buf()).unwrap()
    }

    pub fn build_args(&self) -> Vec<String> {
        vec!["-configuration".to_string(), CONFIGURATION.to_string()]
    }

    /// Per-target environment the build tool would export.
    pub fn build_env(&self) -> BTreeMap<String, String> {
        let dd = self.root().join("dd");
        BTreeMap::from([
            (
                "SYMROOT".to_string(),
                dd.join("Products").display().to_string(),
            ),
            (
                "CONFIGURATION_BUILD_DIR".to_string(),
                self.product_dir().display().to_string(),
            ),
            (
                "OBJROOT".to_string(),
                dd.join("Intermediates").display().to_string(),
            ),
            (
                "TARGET_TEMP_DIR".to_string(),
                dd.join("Intermediates/Pods.build/AFNetworking.build")
                    .display()
                    .to_string(),
            ),
            (
                "SRCROOT".to_string(),
                self.root().join("Pods").display().to_string(),
            ),
            (
                "FULL_PRODUCT_NAME".to_string(),
                "AFNetworking.framework".to_string(),
            ),
        ])
    }

    pub fn product_dir(&self) -> PathBuf {
        self.root()
            .join("dd/Products/Release-iphoneos/AFNetworking")
    }

    /// Stand-in for the compiler: materialize a built framework.
    pub fn simulate_compile(&self) {
        let framework = self.product_dir().join("AFNetworking.framework");
        fs::create_dir_all(framework.join("Headers")).unwrap();
        fs::write(framework.join("AFNetworking"), "\u{fade}binary").unwrap();
        fs::write(
            framework.join("Headers/AFNetworking.h"),
            "#import <Foundation/Foundation.h>\n",
        )
        .unwrap();
    }

    /// Change one source file's contents.
    pub fn touch_source(&self, marker: &str) {
        fs::write(
            self.root().join("Pods/AFNetworking/AFError.m"),
            format!("@implementation AFError // {}\n@end\n", marker),
        )
        .unwrap();
    }

    /// Number of entries in the cache root.
    pub fn cache_entry_count(&self) -> usize {
        match fs::read_dir(self.cache_root()) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_dir())
                .count(),
            Err(_) => 0,
        }
    }
}
