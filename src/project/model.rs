//! Serde model of the Xcode project graph.
//!
//! The tool only consumes the observable surface of the project format:
//! build configurations, native targets, build phases, and file
//! references. `project.pbxproj` is read and written as a JSON document
//! over these types; the `isa` tags mirror the pbxproj object classes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Product types the build tool can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    #[serde(rename = "com.apple.product-type.application")]
    Application,
    #[serde(rename = "com.apple.product-type.framework")]
    Framework,
    #[serde(rename = "com.apple.product-type.library.static")]
    StaticLibrary,
    #[serde(rename = "com.apple.product-type.library.dynamic")]
    DynamicLibrary,
    #[serde(rename = "com.apple.product-type.bundle")]
    Bundle,
    #[serde(rename = "com.apple.product-type.bundle.unit-test")]
    UnitTestBundle,
    #[serde(rename = "com.apple.product-type.app-extension")]
    AppExtension,
    #[serde(other)]
    Other,
}

impl ProductType {
    /// Product types whose archived output is reusable across builds.
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            ProductType::Bundle | ProductType::StaticLibrary | ProductType::Framework
        )
    }
}

/// A build configuration: named settings plus an optional base xcconfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Configuration name (Debug, Release, ...)
    pub name: String,

    /// Build settings
    #[serde(default)]
    pub build_settings: BTreeMap<String, Value>,

    /// Path of the base xcconfig file, relative to the project container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_configuration: Option<String>,
}

impl BuildConfiguration {
    /// Settings as stable key-sorted pretty text. `build_settings` is a
    /// `BTreeMap`, so the JSON rendering is deterministic.
    pub fn settings_text(&self) -> String {
        serde_json::to_string_pretty(&self.build_settings).unwrap_or_default()
    }

    /// String value of one setting, if present and a string.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.build_settings.get(key).and_then(Value::as_str)
    }
}

/// A file reference appearing in a build phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "isa")]
pub enum FileReference {
    /// A plain file (or directory) reference
    #[serde(rename = "PBXFileReference")]
    File {
        /// Path relative to the project container
        path: String,
    },

    /// A localization variant group; children are the per-locale files
    #[serde(rename = "PBXVariantGroup")]
    VariantGroup {
        name: String,
        #[serde(default)]
        children: Vec<String>,
    },

    /// A versioned group (Core Data models); children are the versions
    #[serde(rename = "XCVersionGroup")]
    VersionGroup {
        path: String,
        #[serde(default)]
        children: Vec<String>,
    },
}

impl FileReference {
    /// Flatten to the member file paths.
    pub fn member_paths(&self) -> Vec<&str> {
        match self {
            FileReference::File { path } => vec![path.as_str()],
            FileReference::VariantGroup { children, .. }
            | FileReference::VersionGroup { children, .. } => {
                children.iter().map(String::as_str).collect()
            }
        }
    }

    /// Display name used when emitting per-file settings.
    pub fn basename(&self) -> &str {
        let raw = match self {
            FileReference::File { path } => path,
            FileReference::VariantGroup { name, .. } => name,
            FileReference::VersionGroup { path, .. } => path,
        };
        raw.rsplit('/').next().unwrap_or(raw)
    }
}

/// A file's membership in a build phase, with optional per-file settings
/// (compiler flags and the like).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFile {
    pub file_ref: FileReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, Value>>,
}

impl BuildFile {
    /// True when the build file carries non-empty per-file settings.
    pub fn has_settings(&self) -> bool {
        self.settings.as_ref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Per-file settings as stable key-sorted pretty text.
    pub fn settings_text(&self) -> String {
        match &self.settings {
            Some(s) => serde_json::to_string_pretty(s).unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// One build phase of a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "isa")]
pub enum BuildPhase {
    #[serde(rename = "PBXSourcesBuildPhase")]
    Sources {
        #[serde(default)]
        files: Vec<BuildFile>,
    },

    #[serde(rename = "PBXHeadersBuildPhase")]
    Headers {
        #[serde(default)]
        files: Vec<BuildFile>,
    },

    #[serde(rename = "PBXResourcesBuildPhase")]
    Resources {
        #[serde(default)]
        files: Vec<BuildFile>,
    },

    #[serde(rename = "PBXFrameworksBuildPhase")]
    Frameworks {
        #[serde(default)]
        files: Vec<BuildFile>,
    },

    #[serde(rename = "PBXShellScriptBuildPhase")]
    ShellScript {
        name: String,
        shell_path: String,
        shell_script: String,
        #[serde(default)]
        show_env_vars_in_log: bool,
        #[serde(default)]
        input_paths: Vec<String>,
        #[serde(default)]
        output_paths: Vec<String>,
    },
}

impl BuildPhase {
    /// True for the sources, headers, and resources phases — the phases
    /// the fingerprint enumerates and the extract injection removes.
    pub fn is_file_phase(&self) -> bool {
        matches!(
            self,
            BuildPhase::Sources { .. } | BuildPhase::Headers { .. } | BuildPhase::Resources { .. }
        )
    }

    /// Build files of a file phase; empty for script and framework phases.
    pub fn files(&self) -> &[BuildFile] {
        match self {
            BuildPhase::Sources { files }
            | BuildPhase::Headers { files }
            | BuildPhase::Resources { files }
            | BuildPhase::Frameworks { files } => files,
            BuildPhase::ShellScript { .. } => &[],
        }
    }
}

/// A native target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeTarget {
    pub name: String,

    pub product_type: ProductType,

    #[serde(default)]
    pub build_configurations: Vec<BuildConfiguration>,

    /// Ordered build phases; mutation rewrites this list
    #[serde(default)]
    pub build_phases: Vec<BuildPhase>,

    /// Names of targets this target depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl NativeTarget {
    /// The configuration with the given name.
    pub fn configuration(&self, name: &str) -> Option<&BuildConfiguration> {
        self.build_configurations.iter().find(|c| c.name == name)
    }

    /// The sources phase, if any.
    pub fn sources_phase(&self) -> Option<&BuildPhase> {
        self.build_phases
            .iter()
            .find(|p| matches!(p, BuildPhase::Sources { .. }))
    }

    /// A target is cacheable when its product can be swapped in from the
    /// cache. Aggregate `Pods-*` umbrella targets never are.
    pub fn is_cacheable(&self) -> bool {
        !self.name.starts_with("Pods-") && self.product_type.is_cacheable()
    }
}

/// A reference from one project to another container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReference {
    /// Path relative to the referencing project's container
    pub path: String,

    /// Xcode file type of the referenced container
    pub last_known_file_type: String,
}

impl ProjectReference {
    /// File type of nested `.xcodeproj` containers.
    pub const SUBPROJECT_TYPE: &'static str = "wrapper.pb-project";

    pub fn is_subproject(&self) -> bool {
        self.last_known_file_type == Self::SUBPROJECT_TYPE
    }
}

/// The deserialized body of a `project.pbxproj`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectData {
    #[serde(default)]
    pub build_configurations: Vec<BuildConfiguration>,

    #[serde(default)]
    pub targets: Vec<NativeTarget>,

    /// References to other containers, possibly nested projects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_references: Vec<ProjectReference>,
}

impl ProjectData {
    /// The project-level configuration with the given name.
    pub fn configuration(&self, name: &str) -> Option<&BuildConfiguration> {
        self.build_configurations.iter().find(|c| c.name == name)
    }
}
