//! Asset records as the library reports them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Type name of script assets.
pub const SCRIPT_TYPE: &str = "cc.Script";
/// Type name of textures.
pub const TEXTURE_TYPE: &str = "cc.Texture2D";
/// Type name of raw images.
pub const IMAGE_TYPE: &str = "cc.ImageAsset";
/// Type name of scenes.
pub const SCENE_TYPE: &str = "cc.SceneAsset";

/// Types whose payload can be packed as JSON even without a `.json` file.
const PACKABLE_TYPES: &[&str] = &[IMAGE_TYPE, TEXTURE_TYPE, "cc.SpriteFrame", "cc.TTFFont"];

/// Per-asset settings carried in the asset's meta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetUserData {
    /// Texture preset id (see `texture_presets` in bundlekit.yaml).
    pub compress_preset: Option<String>,
    /// Generate and compress a mip chain.
    pub mipmaps: bool,
    /// Name of a custom codec to try before the built-in one.
    pub custom_codec: Option<String>,
}

/// One asset (or sub-asset) of the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub uuid: String,

    /// Database url, e.g. `db://assets/main/hero.prefab`.
    #[serde(default)]
    pub url: String,

    /// Engine type name, e.g. `cc.Prefab`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Extensions of the files the library holds for this asset.
    #[serde(default = "default_files")]
    pub files: Vec<String>,

    /// Library file stem when it differs from the uuid.
    #[serde(default)]
    pub library_file: Option<String>,

    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default)]
    pub sub_assets: Vec<Asset>,

    #[serde(default)]
    pub user_data: AssetUserData,
}

fn default_files() -> Vec<String> {
    vec![".json".to_string()]
}

impl Asset {
    pub fn new(uuid: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            url: String::new(),
            kind: kind.into(),
            files: default_files(),
            library_file: None,
            depends: vec![],
            sub_assets: vec![],
            user_data: AssetUserData::default(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_depends(mut self, depends: &[&str]) -> Self {
        self.depends = depends.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_sub_asset(mut self, sub: Asset) -> Self {
        self.sub_assets.push(sub);
        self
    }

    pub fn has_json(&self) -> bool {
        self.files.iter().any(|f| f == ".json")
    }

    /// Whether the payload can go through the JSON packer.
    pub fn is_json_capable(&self) -> bool {
        self.has_json() || PACKABLE_TYPES.contains(&self.kind.as_str())
    }

    /// Script by type, or by a `.js`/`.ts` native file.
    pub fn is_script(&self) -> bool {
        self.kind == SCRIPT_TYPE
            || self
                .native_ext()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(".js") || ext.eq_ignore_ascii_case(".ts"))
    }

    pub fn is_texture(&self) -> bool {
        self.kind == TEXTURE_TYPE
    }

    pub fn is_image(&self) -> bool {
        self.kind == IMAGE_TYPE
    }

    pub fn is_scene(&self) -> bool {
        self.kind == SCENE_TYPE
    }

    /// Sub-assets carry their parent's uuid followed by `@id`.
    pub fn is_sub_asset(&self) -> bool {
        self.uuid.contains('@')
    }

    /// Extension of the native (non-JSON) file, if any.
    pub fn native_ext(&self) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.as_str() != ".json")
            .map(|f| f.as_str())
    }

    /// Library file stem: the on-disk name when recorded, else the uuid.
    pub fn file_stem(&self) -> &str {
        self.library_file.as_deref().unwrap_or(&self.uuid)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.url.is_empty() {
            write!(f, "{} ({})", self.uuid, self.kind)
        } else {
            write!(f, "{} ({})", self.url, self.uuid)
        }
    }
}

/// Visit an asset and its nested sub-assets depth-first, parents first.
///
/// Each uuid is visited at most once even if the tree repeats it.
pub fn visit_recursively<F>(asset: &Asset, visitor: &mut F)
where
    F: FnMut(&Asset),
{
    let mut seen = HashSet::new();
    visit_inner(asset, visitor, &mut seen);
}

fn visit_inner<'a, F>(asset: &'a Asset, visitor: &mut F, seen: &mut HashSet<&'a str>)
where
    F: FnMut(&Asset),
{
    if !seen.insert(asset.uuid.as_str()) {
        return;
    }
    visitor(asset);
    for sub in &asset.sub_assets {
        visit_inner(sub, visitor, seen);
    }
}
