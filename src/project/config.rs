//! `bundlekit.yaml` parsing.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};
use crate::texture::{FormatOption, FormatPolicy, FormatType};

/// How a bundle's serialized assets are laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    /// Every asset serialized standalone.
    None,
    /// Dependency-driven packs (the default).
    #[default]
    MergeDep,
    /// One pack containing every asset.
    MergeAllJson,
    /// Dependency-driven packs, delivered as a platform subpackage.
    Subpackage,
    /// Dependency-driven packs, import + native zipped into one archive.
    Zip,
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "none",
            CompressionType::MergeDep => "merge_dep",
            CompressionType::MergeAllJson => "merge_all_json",
            CompressionType::Subpackage => "subpackage",
            CompressionType::Zip => "zip",
        };
        write!(f, "{}", name)
    }
}

/// Options for one bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleOptions {
    pub name: String,

    /// Url prefix selecting the bundle's root assets (e.g. `db://assets/main`).
    pub root: String,

    #[serde(default)]
    pub compression: CompressionType,

    /// Higher priority bundles win when two bundles claim a dependency.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub is_remote: bool,

    /// Url patterns excluded from the bundle (its filter predicate).
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Per-bundle override of the project `debug` flag.
    #[serde(default)]
    pub debug: Option<bool>,
}

impl BundleOptions {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            compression: CompressionType::default(),
            priority: 0,
            is_remote: false,
            excludes: vec![],
            debug: None,
        }
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Whether an asset url sits under this bundle's root.
    pub fn contains_url(&self, url: &str) -> bool {
        let root = self.root.trim_end_matches('/');
        url == root || url.starts_with(&format!("{}/", root))
    }

    /// The bundle filter predicate: true when the url is not excluded.
    pub fn accepts(&self, url: &str) -> bool {
        !self
            .excludes
            .iter()
            .any(|pattern| matches_pattern(url, pattern))
    }
}

/// A user-supplied codec invoked instead of the built-in one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCodec {
    pub name: String,
    pub program: String,
    /// Arguments with `{placeholder}` fields (see `texture::template`).
    #[serde(default)]
    pub args: Vec<String>,
}

/// Per-platform format lists of one texture preset.
pub type TexturePreset = BTreeMap<String, Vec<FormatOption>>;

/// Project configuration loaded from bundlekit.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory holding the asset library index.
    pub library: PathBuf,

    /// Output directory; each bundle lands in `<output>/<name>`.
    pub output: PathBuf,

    /// Build temp directory (texture cache, intermediates).
    pub temp: PathBuf,

    /// Target platform, selects texture preset entries.
    pub platform: String,

    /// Pretty-print manifests.
    pub debug: bool,

    /// Content-hash output file names.
    pub md5_cache: bool,

    /// Reuse texture outputs across builds.
    pub use_texture_cache: bool,

    pub bundles: Vec<BundleOptions>,

    pub texture_presets: BTreeMap<String, TexturePreset>,

    pub format_types: BTreeMap<FormatType, FormatPolicy>,

    pub custom_codecs: Vec<CustomCodec>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from("library"),
            output: PathBuf::from("build"),
            temp: PathBuf::from("temp/bundlekit"),
            platform: "web-mobile".to_string(),
            debug: false,
            md5_cache: false,
            use_texture_cache: true,
            bundles: vec![],
            texture_presets: BTreeMap::new(),
            format_types: BTreeMap::new(),
            custom_codecs: vec![],
        }
    }
}

impl ProjectConfig {
    /// Load configuration from a bundlekit.yaml file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BundleError::Io {
            path: path.to_path_buf(),
            message: format!("Failed to read project config: {}", e),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| BundleError::Parse {
            message: format!("Invalid project config: {}", e),
            help: Some("Check bundlekit.yaml syntax".to_string()),
        })
    }

    /// Resolve relative directories against the project root.
    pub fn resolve_paths(&mut self, root: &Path) {
        for dir in [&mut self.library, &mut self.output, &mut self.temp] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
    }

    /// Formats a preset produces on the configured platform.
    pub fn preset_formats(&self, preset: &str) -> Option<&[FormatOption]> {
        self.texture_presets
            .get(preset)?
            .get(&self.platform)
            .map(|v| v.as_slice())
    }

    pub fn custom_codec(&self, name: &str) -> Option<&CustomCodec> {
        self.custom_codecs.iter().find(|c| c.name == name)
    }

    pub fn bundle(&self, name: &str) -> Option<&BundleOptions> {
        self.bundles.iter().find(|b| b.name == name)
    }
}

/// Simple glob pattern matching for bundle excludes.
pub(crate) fn matches_pattern(path: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("**/") {
        // **/dir/* matches anything inside dir anywhere in the path
        if let Some(dir) = suffix.strip_suffix("/*") {
            return path.contains(&format!("/{}/", dir)) || path.starts_with(&format!("{}/", dir));
        }
        return path.contains(suffix);
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        if !suffix.contains('/') {
            return path.ends_with(suffix);
        }
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return path.starts_with(&format!("{}/", prefix)) || path.contains(&format!("/{}/", prefix));
    }

    path.contains(pattern)
}
