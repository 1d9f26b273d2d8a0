//! Persistent texture compression cache.
//!
//! One JSON file (`texture-compress-cache.json` in the temp directory) maps
//! an asset uuid to the inputs of its last successful compression and the
//! files it produced. It is read once when a scheduler run starts and
//! written once when it ends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::format::CompressOptions;
use crate::error::{BundleError, Result};
use crate::project::CustomCodec;

/// Name of the cache file inside the temp directory.
pub const CACHE_FILENAME: &str = "texture-compress-cache.json";

/// Inputs that decide whether an asset must be recompressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKey {
    /// Source modification time, milliseconds since the epoch.
    pub mtime: u64,
    pub src: PathBuf,
    /// Options per concrete format.
    pub compress_options: BTreeMap<String, CompressOptions>,
    /// Whether a mip chain was requested.
    #[serde(default)]
    pub mipmaps: bool,
    /// Custom codecs named by the asset's tasks.
    #[serde(default)]
    pub custom_codecs: Vec<CustomCodec>,
}

impl CacheKey {
    /// Key for a source file; a missing source yields mtime 0.
    pub fn for_source(src: &Path, compress_options: BTreeMap<String, CompressOptions>) -> Self {
        Self {
            mtime: source_mtime(src),
            src: src.to_path_buf(),
            compress_options,
            mipmaps: false,
            custom_codecs: vec![],
        }
    }

    pub fn with_mipmaps(mut self, mipmaps: bool) -> Self {
        self.mipmaps = mipmaps;
        self
    }

    pub fn with_custom_codecs(mut self, codecs: Vec<CustomCodec>) -> Self {
        self.custom_codecs = codecs;
        self
    }
}

/// Cached result for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub option: CacheKey,
    #[serde(default)]
    pub mipmap_files: Vec<PathBuf>,
    pub dest: Vec<PathBuf>,
    #[serde(default)]
    pub suffix: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CompressCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl CompressCache {
    /// An empty cache that will be written to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Read the cache file. A missing file gives an empty cache, a corrupt
    /// one is logged and discarded.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                debug!(path = %path.display(), "no texture cache yet");
                return Self::new(path);
            }
        };
        match serde_json::from_str(&content) {
            Ok(entries) => Self { path, entries },
            Err(e) => {
                warn!(path = %path.display(), "discarding corrupt texture cache: {}", e);
                Self::new(path)
            }
        }
    }

    /// Write the cache file.
    pub fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|e| BundleError::Build {
            message: format!("Failed to serialize texture cache: {}", e),
            help: None,
        })?;
        std::fs::write(&self.path, json).map_err(|e| BundleError::io(&self.path, e))
    }

    /// True when `uuid` must be recompressed: no entry, different inputs
    /// or a previously produced file has gone.
    pub fn is_dirty(&self, uuid: &str, key: &CacheKey) -> bool {
        match self.entries.get(uuid) {
            None => true,
            Some(entry) => {
                entry.option != *key
                    || entry.dest.iter().any(|d| !d.exists())
                    || entry.mipmap_files.iter().any(|m| !m.exists())
            }
        }
    }

    pub fn get(&self, uuid: &str) -> Option<&CacheEntry> {
        self.entries.get(uuid)
    }

    pub fn insert(&mut self, uuid: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(uuid.into(), entry);
    }

    pub fn remove(&mut self, uuid: &str) -> Option<CacheEntry> {
        self.entries.remove(uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn source_mtime(src: &Path) -> u64 {
    std::fs::metadata(src)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
