//! Content hashing for cache busting and pack naming.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{BundleError, Result};

/// Hex characters kept for file-name content hashes.
pub const CONTENT_HASH_LEN: usize = 5;

/// Hex characters kept for pack (group) names.
pub const PACK_HASH_LEN: usize = 9;

/// Short content hash of a byte slice.
pub fn content_hash(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hash.to_hex()[..CONTENT_HASH_LEN].to_string()
}

/// Hash a list of string arrays into one short name.
///
/// Every array and every element is length-prefixed before hashing, so
/// `[["ab"], ["c"]]` and `[["a"], ["bc"]]` never collide by framing.
pub fn hash_array<S: AsRef<str>>(arrays: &[Vec<S>]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(arrays.len() as u64).to_le_bytes());
    for array in arrays {
        hasher.update(&(array.len() as u64).to_le_bytes());
        for item in array.iter() {
            let item = item.as_ref().as_bytes();
            hasher.update(&(item.len() as u64).to_le_bytes());
            hasher.update(item);
        }
    }
    hasher.finalize().to_hex()[..PACK_HASH_LEN].to_string()
}

/// Short content hash of a file.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| BundleError::io(path, format!("Failed to read for hashing: {}", e)))?;
    Ok(content_hash(&bytes))
}

/// Short content hash of a directory tree (relative paths + file bytes, sorted).
pub fn hash_dir(dir: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut files: Vec<_> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();

    for file in files {
        let relative = file.strip_prefix(dir).unwrap_or(&file);
        let name = relative.to_string_lossy().replace('\\', "/");
        hasher.update(name.as_bytes());
        let bytes = std::fs::read(&file)
            .map_err(|e| BundleError::io(&file, format!("Failed to read for hashing: {}", e)))?;
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }

    Ok(hasher.finalize().to_hex()[..CONTENT_HASH_LEN].to_string())
}
