//! Bundle aggregation.
//!
//! A [`Bundle`] collects its assets while the pipeline walks the library,
//! then [`Bundle::build`] turns that state into the manifest and the final
//! files in a fixed phase order:
//!
//! ```text
//! init_config → gen_packed_assets_config
//!   → [create_assets_md5] → compress → zip_bundle → [md5_bundle] → output_configs
//! ```
//!
//! The bracketed phases only run when content hashing is enabled.

mod manifest;
mod phases;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::group::Group;
use crate::library::{visit_recursively, Asset};
use crate::project::{BundleOptions, CompressionType};
use crate::texture::{CompressResult, CompressTask};

pub use manifest::{AssetRef, Compact, FlatPairs, Manifest, PathInfo, Raw, TypeRef, Versions};

/// What a bundle remembers about each asset it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub url: String,
    pub kind: String,
    pub sub_asset: bool,
    /// Serialized payload can go through the JSON packer.
    pub json: bool,
    pub native_ext: Option<String>,
}

impl From<&Asset> for AssetEntry {
    fn from(asset: &Asset) -> Self {
        Self {
            url: asset.url.clone(),
            kind: asset.kind.clone(),
            sub_asset: asset.is_sub_asset(),
            json: asset.is_json_capable(),
            native_ext: asset.native_ext().map(String::from),
        }
    }
}

/// Two root assets resolving to the same load path and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCollision {
    pub path: String,
    pub kind: String,
    pub first: String,
    pub second: String,
}

enum ManifestState {
    Collecting,
    Initialized(Manifest<Raw>),
    Configured(Manifest<Raw>),
    Compacted(Manifest<Compact>),
    /// A phase failed half-way.
    Broken,
}

impl ManifestState {
    fn label(&self) -> &'static str {
        match self {
            ManifestState::Collecting => "collecting",
            ManifestState::Initialized(_) => "initialized",
            ManifestState::Configured(_) => "configured",
            ManifestState::Compacted(_) => "compacted",
            ManifestState::Broken => "broken",
        }
    }
}

pub struct Bundle {
    options: BundleOptions,
    dest: PathBuf,
    debug: bool,
    md5_cache: bool,

    deps: BTreeSet<String>,
    redirect: IndexMap<String, String>,
    groups: Vec<Group>,
    root_assets: IndexSet<String>,
    assets: IndexSet<String>,
    scripts: IndexSet<String>,
    /// uuid → scene url
    scenes: IndexMap<String, String>,
    entries: HashMap<String, AssetEntry>,
    compress_tasks: IndexMap<String, Vec<CompressTask>>,
    compress_res: IndexMap<String, CompressResult>,

    /// Import id (uuid or pack name) → written file.
    import_files: IndexMap<String, PathBuf>,
    /// uuid → written native files (or one directory).
    native_files: IndexMap<String, Vec<PathBuf>>,
    extension_map: IndexMap<String, Vec<String>>,
    path_collisions: Vec<PathCollision>,

    script_file: Option<PathBuf>,
    zip_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    version: Option<String>,
    state: ManifestState,
}

impl Bundle {
    /// A bundle writing into `<output_dir>/<name>`.
    pub fn new(options: BundleOptions, output_dir: &Path, debug: bool, md5_cache: bool) -> Self {
        let dest = output_dir.join(&options.name);
        let debug = options.debug.unwrap_or(debug);
        Self {
            options,
            dest,
            debug,
            md5_cache,
            deps: BTreeSet::new(),
            redirect: IndexMap::new(),
            groups: vec![],
            root_assets: IndexSet::new(),
            assets: IndexSet::new(),
            scripts: IndexSet::new(),
            scenes: IndexMap::new(),
            entries: HashMap::new(),
            compress_tasks: IndexMap::new(),
            compress_res: IndexMap::new(),
            import_files: IndexMap::new(),
            native_files: IndexMap::new(),
            extension_map: IndexMap::new(),
            path_collisions: vec![],
            script_file: None,
            zip_file: None,
            config_file: None,
            version: None,
            state: ManifestState::Collecting,
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn root(&self) -> &str {
        &self.options.root
    }

    pub fn options(&self) -> &BundleOptions {
        &self.options
    }

    pub fn compression(&self) -> CompressionType {
        self.options.compression
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn is_subpackage(&self) -> bool {
        self.options.compression == CompressionType::Subpackage
    }

    pub fn is_remote(&self) -> bool {
        self.options.is_remote
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn import_dir(&self) -> PathBuf {
        self.dest.join("import")
    }

    pub fn native_dir(&self) -> PathBuf {
        self.dest.join("native")
    }

    // -- membership --

    /// Add an asset and its sub-assets as roots of this bundle.
    ///
    /// Scripts are routed to [`Bundle::add_script`]; assets without a
    /// JSON-capable payload and assets rejected by the bundle's excludes
    /// are skipped.
    pub fn add_root_asset(&mut self, asset: &Asset) {
        visit_recursively(asset, &mut |node: &Asset| {
            if node.is_script() {
                self.add_script(node);
                return;
            }
            if !node.is_json_capable() {
                debug!(bundle = %self.options.name, uuid = %node.uuid, "no serializable payload, skipping");
                return;
            }
            if !node.url.is_empty() && !self.options.accepts(&node.url) {
                debug!(bundle = %self.options.name, url = %node.url, "excluded by bundle filter");
                return;
            }
            self.add_asset(node);
            self.root_assets.insert(node.uuid.clone());
        });
    }

    /// Add an asset. Returns false when it was already present.
    pub fn add_asset(&mut self, asset: &Asset) -> bool {
        if asset.is_script() {
            self.add_script(asset);
            return false;
        }
        self.redirect.shift_remove(&asset.uuid);
        self.entries
            .entry(asset.uuid.clone())
            .or_insert_with(|| AssetEntry::from(asset));
        if asset.is_scene() {
            self.scenes.insert(asset.uuid.clone(), asset.url.clone());
        }
        self.assets.insert(asset.uuid.clone())
    }

    /// Remove an asset from every tracking set.
    pub fn remove_asset(&mut self, uuid: &str) {
        self.assets.shift_remove(uuid);
        self.root_assets.shift_remove(uuid);
        self.scripts.shift_remove(uuid);
        self.scenes.shift_remove(uuid);
        self.entries.remove(uuid);
        self.redirect.shift_remove(uuid);
        self.compress_tasks.shift_remove(uuid);
        self.compress_res.shift_remove(uuid);
        self.native_files.shift_remove(uuid);
        for members in self.extension_map.values_mut() {
            members.retain(|m| m != uuid);
        }
        self.extension_map.retain(|_, members| !members.is_empty());
        for group in &mut self.groups {
            group.uuids.retain(|m| m != uuid);
        }
        self.groups.retain(|g| g.uuids.len() > 1);
    }

    pub fn add_script(&mut self, asset: &Asset) {
        self.entries
            .entry(asset.uuid.clone())
            .or_insert_with(|| AssetEntry::from(asset));
        self.scripts.insert(asset.uuid.clone());
    }

    /// Record that `uuid` is served by bundle `target`.
    pub fn add_redirect(&mut self, uuid: &str, target: &str) {
        if self.assets.contains(uuid) {
            self.remove_asset(uuid);
        }
        self.redirect.insert(uuid.to_string(), target.to_string());
        self.deps.insert(target.to_string());
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.assets.contains(uuid)
    }

    pub fn is_root(&self, uuid: &str) -> bool {
        self.root_assets.contains(uuid)
    }

    pub fn is_redirected(&self, uuid: &str) -> bool {
        self.redirect.contains_key(uuid)
    }

    pub fn entry(&self, uuid: &str) -> Option<&AssetEntry> {
        self.entries.get(uuid)
    }

    pub fn assets(&self) -> impl Iterator<Item = &String> {
        self.assets.iter()
    }

    pub fn root_assets(&self) -> impl Iterator<Item = &String> {
        self.root_assets.iter()
    }

    /// Assets whose payload goes through the JSON packer.
    pub fn json_assets(&self) -> impl Iterator<Item = &String> {
        self.assets
            .iter()
            .filter(|uuid| self.entries.get(*uuid).map_or(false, |e| e.json))
    }

    pub fn scripts(&self) -> impl Iterator<Item = &String> {
        self.scripts.iter()
    }

    pub fn scenes(&self) -> &IndexMap<String, String> {
        &self.scenes
    }

    pub fn redirects(&self) -> &IndexMap<String, String> {
        &self.redirect
    }

    pub fn deps(&self) -> &BTreeSet<String> {
        &self.deps
    }

    // -- groups and texture results --

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Replace the groups; groups of one asset or less are dropped.
    pub fn set_groups(&mut self, groups: Vec<Group>) {
        self.groups = groups.into_iter().filter(|g| g.uuids.len() > 1).collect();
    }

    pub(crate) fn groups_mut(&mut self) -> &mut Vec<Group> {
        &mut self.groups
    }

    pub fn add_compress_task(&mut self, task: CompressTask) {
        self.compress_tasks
            .entry(task.uuid.clone())
            .or_default()
            .push(task);
    }

    pub fn compress_tasks(&self) -> impl Iterator<Item = &CompressTask> {
        self.compress_tasks.values().flatten()
    }

    pub fn set_compress_result(&mut self, uuid: &str, result: CompressResult) {
        self.compress_res.insert(uuid.to_string(), result);
    }

    pub fn compress_result(&self, uuid: &str) -> Option<&CompressResult> {
        self.compress_res.get(uuid)
    }

    // -- produced files --

    /// Register a written import file (standalone asset or pack).
    pub fn register_import(&mut self, id: impl Into<String>, path: PathBuf) {
        self.import_files.insert(id.into(), path);
    }

    pub fn register_native(&mut self, uuid: &str, path: PathBuf) {
        self.native_files
            .entry(uuid.to_string())
            .or_default()
            .push(path);
    }

    pub fn add_extension(&mut self, ext: &str, uuid: &str) {
        let members = self.extension_map.entry(ext.to_string()).or_default();
        if !members.iter().any(|m| m == uuid) {
            members.push(uuid.to_string());
        }
    }

    pub fn import_files(&self) -> &IndexMap<String, PathBuf> {
        &self.import_files
    }

    pub fn native_files(&self) -> &IndexMap<String, Vec<PathBuf>> {
        &self.native_files
    }

    pub fn set_script_file(&mut self, path: PathBuf) {
        self.script_file = Some(path);
    }

    pub fn script_file(&self) -> Option<&Path> {
        self.script_file.as_deref()
    }

    pub fn zip_file(&self) -> Option<&Path> {
        self.zip_file.as_deref()
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Content version of the bundle, set by the md5 phase.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn path_collisions(&self) -> &[PathCollision] {
        &self.path_collisions
    }

    /// The compacted manifest, once `compress` has run.
    pub fn manifest(&self) -> Option<&Manifest<Compact>> {
        match &self.state {
            ManifestState::Compacted(m) => Some(m),
            _ => None,
        }
    }

    // -- load paths --

    /// Load paths of the root assets (scenes excluded).
    ///
    /// Two different uuids with the same path and type are logged and
    /// recorded in [`Bundle::path_collisions`]; both keep their entry.
    fn init_asset_paths(&mut self) -> IndexMap<AssetRef, PathInfo> {
        let mut paths = IndexMap::new();
        let mut seen: HashMap<(String, String), String> = HashMap::new();
        let mut collisions = Vec::new();

        for uuid in &self.root_assets {
            if self.scenes.contains_key(uuid) {
                continue;
            }
            let Some(entry) = self.entries.get(uuid) else {
                continue;
            };
            let Some(path) = self.load_path(uuid, entry) else {
                continue;
            };

            let key = (path.clone(), entry.kind.clone());
            if let Some(first) = seen.get(&key) {
                warn!(
                    bundle = %self.options.name,
                    path = %path,
                    first = %first,
                    second = %uuid,
                    "two assets share a load path"
                );
                collisions.push(PathCollision {
                    path: path.clone(),
                    kind: entry.kind.clone(),
                    first: first.clone(),
                    second: uuid.clone(),
                });
            } else {
                seen.insert(key, uuid.clone());
            }

            paths.insert(
                AssetRef::uuid(uuid.as_str()),
                PathInfo {
                    url: path,
                    kind: TypeRef::Name(entry.kind.clone()),
                    sub_asset: entry.sub_asset,
                },
            );
        }

        self.path_collisions = collisions;
        paths
    }

    /// Url relative to the bundle root, without the asset's extension.
    ///
    /// A sub-asset whose url extends its parent's keeps the parent's path
    /// as prefix: `main/bg.png/spriteFrame` → `bg/spriteFrame`.
    fn load_path(&self, uuid: &str, entry: &AssetEntry) -> Option<String> {
        if entry.sub_asset {
            let parent = uuid.split('@').next().and_then(|p| self.entries.get(p));
            if let Some(parent) = parent {
                if !parent.url.is_empty() && entry.url.starts_with(&parent.url) {
                    let rest = &entry.url[parent.url.len()..];
                    let base = relative_load_path(&self.options.root, &parent.url)?;
                    return Some(format!("{}{}", base, rest));
                }
            }
        }
        relative_load_path(&self.options.root, &entry.url)
    }
}

/// `db://assets/main/ui/hero.prefab` under `db://assets/main` → `ui/hero`.
pub(crate) fn relative_load_path(root: &str, url: &str) -> Option<String> {
    let root = root.trim_end_matches('/');
    let relative = url.strip_prefix(root)?.strip_prefix('/')?;
    let name_start = relative.rfind('/').map_or(0, |slash| slash + 1);
    match relative[name_start..].rfind('.') {
        Some(dot) if dot > 0 => Some(relative[..name_start + dot].to_string()),
        _ => Some(relative.to_string()),
    }
}
