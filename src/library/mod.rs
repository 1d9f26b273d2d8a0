//! Read access to the asset library.
//!
//! The library is produced by the asset importer (outside this crate). On
//! disk it is a directory with a `library.json` index plus one file per
//! serialized payload, sharded by the first two characters of the uuid:
//!
//! ```text
//! library/
//!   library.json
//!   fc/fc991dd7-0033-4b80-9d41-c8a86a702e59.json
//!   fc/fc991dd7-0033-4b80-9d41-c8a86a702e59.png
//! ```
//!
//! # Example
//!
//! ```ignore
//! use bundlekit::library::Library;
//!
//! let library = Library::load("./library")?;
//! for uuid in library.walk(&root, |asset| asset.is_json_capable()) {
//!     println!("{}", uuid);
//! }
//! ```

mod asset;
mod graph;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{BundleError, Result};

pub use asset::{
    visit_recursively, Asset, AssetUserData, IMAGE_TYPE, SCENE_TYPE, SCRIPT_TYPE, TEXTURE_TYPE,
};
pub use graph::DependencyGraph;

/// The name of the library index file.
pub const INDEX_FILENAME: &str = "library.json";

/// Shard directory for an id: its first two characters.
pub fn shard(id: &str) -> &str {
    id.get(..2).unwrap_or(id)
}

/// Serialized form of `library.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryIndex {
    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Image groups produced by the atlas packer (uuids of `cc.ImageAsset`s).
    #[serde(default)]
    pub atlases: Vec<Vec<String>>,
}

/// Uuid-addressed view over the library.
#[derive(Debug)]
pub struct Library {
    dir: Option<PathBuf>,
    roots: Vec<String>,
    assets: HashMap<String, Asset>,
    graph: DependencyGraph,
    atlases: Vec<Vec<String>>,
    json: HashMap<String, Value>,
    natives: HashMap<String, PathBuf>,
}

impl Library {
    /// Load a library directory (reads `library.json`).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let index_path = dir.join(INDEX_FILENAME);
        let content = std::fs::read_to_string(&index_path).map_err(|e| BundleError::Io {
            path: index_path.clone(),
            message: format!("Failed to read library index: {}", e),
        })?;
        let index: LibraryIndex = serde_json::from_str(&content).map_err(|e| BundleError::Parse {
            message: format!("Invalid library index {}: {}", index_path.display(), e),
            help: Some("The library index is written by the asset importer; re-import the project".to_string()),
        })?;

        Ok(Self::from_index(index, Some(dir.to_path_buf())))
    }

    /// Build a library from an index, optionally backed by a directory.
    pub fn from_index(index: LibraryIndex, dir: Option<PathBuf>) -> Self {
        let mut assets = HashMap::new();
        let mut graph = DependencyGraph::new();
        let mut roots = Vec::with_capacity(index.assets.len());

        for asset in &index.assets {
            roots.push(asset.uuid.clone());
            visit_recursively(asset, &mut |node: &Asset| {
                graph.register(node.uuid.clone());
                for dep in &node.depends {
                    graph.add_dependency(&node.uuid, dep);
                }
                assets.insert(node.uuid.clone(), node.clone());
            });
        }

        Self {
            dir,
            roots,
            assets,
            graph,
            atlases: index.atlases,
            json: HashMap::new(),
            natives: HashMap::new(),
        }
    }

    /// Get an asset or sub-asset by uuid.
    pub fn get(&self, uuid: &str) -> Option<&Asset> {
        self.assets.get(uuid)
    }

    /// Top-level assets in index order.
    pub fn root_assets(&self) -> impl Iterator<Item = &Asset> {
        self.roots.iter().filter_map(|uuid| self.assets.get(uuid))
    }

    /// Total number of assets, sub-assets included.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn atlases(&self) -> &[Vec<String>] {
        &self.atlases
    }

    fn library_file(&self, asset: &Asset, ext: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(
            dir.join(shard(&asset.uuid))
                .join(format!("{}{}", asset.file_stem(), ext)),
        )
    }

    /// Serialized JSON payload of an asset, if it has one.
    ///
    /// A missing or unreadable payload is logged and reported as `None`.
    pub fn serialized_json(&self, uuid: &str) -> Option<Value> {
        if let Some(value) = self.json.get(uuid) {
            return Some(value.clone());
        }

        let asset = self.get(uuid)?;
        if !asset.has_json() {
            return None;
        }
        let path = self.library_file(asset, ".json")?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(uuid, path = %path.display(), "missing serialized json: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(uuid, path = %path.display(), "corrupt serialized json: {}", e);
                None
            }
        }
    }

    /// Path of an asset's native file in the library.
    pub fn native_path(&self, uuid: &str) -> Option<PathBuf> {
        if let Some(path) = self.natives.get(uuid) {
            return Some(path.clone());
        }
        let asset = self.get(uuid)?;
        let ext = asset.native_ext()?;
        self.library_file(asset, ext)
    }

    /// Uuids reachable from `root` through dependencies whose asset passes
    /// `filter`, root first. Unknown uuids are skipped.
    pub fn walk<F>(&self, root: &str, mut filter: F) -> Vec<String>
    where
        F: FnMut(&Asset) -> bool,
    {
        self.graph
            .reachable_from(root, |uuid| self.get(uuid).map_or(false, &mut filter))
    }
}

/// Builder for in-memory libraries.
#[derive(Debug, Default)]
pub struct LibraryBuilder {
    index: LibraryIndex,
    json: HashMap<String, Value>,
    natives: HashMap<String, PathBuf>,
}

impl LibraryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level asset (sub-assets come along).
    pub fn add(&mut self, asset: Asset) -> &mut Self {
        self.index.assets.push(asset);
        self
    }

    /// Attach a serialized payload to an asset.
    pub fn json(&mut self, uuid: impl Into<String>, value: Value) -> &mut Self {
        self.json.insert(uuid.into(), value);
        self
    }

    /// Attach a native file to an asset.
    pub fn native(&mut self, uuid: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        self.natives.insert(uuid.into(), path.into());
        self
    }

    /// Register an atlas-produced image group.
    pub fn atlas(&mut self, images: &[&str]) -> &mut Self {
        self.index
            .atlases
            .push(images.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn build(self) -> Library {
        let mut library = Library::from_index(self.index, None);
        library.json = self.json;
        library.natives = self.natives;
        library
    }
}
