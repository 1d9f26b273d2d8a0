use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::GroupType;
use crate::bundle::Bundle;
use crate::codec::hash_array;
use crate::error::{BundleError, Result};
use crate::library::{shard, Library, IMAGE_TYPE, TEXTURE_TYPE};

/// Counts of what [`write_json`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JsonOutput {
    pub packs: usize,
    pub standalone: usize,
    /// Assets without serialized JSON.
    pub skipped: Vec<String>,
}

/// Write the bundle's packs and standalone JSON files under `import/`.
///
/// Pack members without serialized JSON are dropped from their pack; a
/// pack left with one member is dissolved. Each pack is named by the hash
/// of its member list. Every written file is registered with the bundle.
pub fn write_json(bundle: &mut Bundle, library: &Library) -> Result<JsonOutput> {
    let import_dir = bundle.import_dir();
    let mut output = JsonOutput::default();
    let mut packed: HashSet<String> = HashSet::new();

    let mut groups = std::mem::take(bundle.groups_mut());
    for group in &mut groups {
        let mut members = Vec::with_capacity(group.uuids.len());
        let mut payloads = Vec::with_capacity(group.uuids.len());
        for uuid in &group.uuids {
            match member_payload(group.kind, uuid, bundle, library) {
                Some(payload) => {
                    members.push(uuid.clone());
                    payloads.push(payload);
                }
                None => {
                    warn!(bundle = %bundle.name(), uuid = %uuid, "no serialized json, dropped from pack");
                    output.skipped.push(uuid.clone());
                }
            }
        }
        group.uuids = members;
        if group.uuids.len() <= 1 {
            continue;
        }

        group.name = hash_array(&[group.uuids.clone()]);
        let body = match group.kind {
            GroupType::Normal => Value::Array(payloads),
            GroupType::Texture => json!({ "type": TEXTURE_TYPE, "data": payloads }),
            GroupType::Image => json!({ "type": IMAGE_TYPE, "data": payloads }),
        };
        let path = write_file(&import_dir, &group.name, &body)?;
        debug!(bundle = %bundle.name(), pack = %group.name, kind = %group.kind, members = group.uuids.len(), "wrote pack");

        bundle.register_import(group.name.clone(), path);
        packed.extend(group.uuids.iter().cloned());
        output.packs += 1;
    }
    groups.retain(|g| !g.name.is_empty());
    *bundle.groups_mut() = groups;

    let standalone: Vec<String> = bundle
        .json_assets()
        .filter(|u| !packed.contains(*u) && !bundle.is_redirected(u))
        .cloned()
        .collect();

    for uuid in standalone {
        let Some(payload) = asset_payload(&uuid, bundle, library) else {
            debug!(bundle = %bundle.name(), uuid = %uuid, "no serialized json, nothing to write");
            if !output.skipped.contains(&uuid) {
                output.skipped.push(uuid);
            }
            continue;
        };
        let stem = library
            .get(&uuid)
            .map(|a| a.file_stem().to_string())
            .unwrap_or_else(|| uuid.clone());
        let path = write_file(&import_dir, &stem, &payload)?;
        bundle.register_import(uuid, path);
        output.standalone += 1;
    }

    Ok(output)
}

fn member_payload(kind: GroupType, uuid: &str, bundle: &Bundle, library: &Library) -> Option<Value> {
    match kind {
        GroupType::Texture => {
            let json = library.serialized_json(uuid)?;
            let content = json.get("content");
            let base = content
                .and_then(|c| c.get("base"))
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
            let mipmaps = content
                .and_then(|c| c.get("mipmaps"))
                .cloned()
                .unwrap_or_else(|| json!([]));
            Some(json!({ "base": base, "mipmaps": mipmaps }))
        }
        GroupType::Image | GroupType::Normal => asset_payload(uuid, bundle, library),
    }
}

/// Serialized JSON, with the compressed-format suffixes of textures under
/// `_formats`.
fn asset_payload(uuid: &str, bundle: &Bundle, library: &Library) -> Option<Value> {
    let mut json = library.serialized_json(uuid)?;
    if let Some(result) = bundle.compress_result(uuid) {
        if let Value::Object(map) = &mut json {
            map.insert("_formats".to_string(), json!(result.suffix));
        }
    }
    Some(json)
}

fn write_file(import_dir: &Path, name: &str, value: &Value) -> Result<PathBuf> {
    let dir = import_dir.join(shard(name));
    fs::create_dir_all(&dir).map_err(|e| BundleError::io(&dir, e))?;
    let path = dir.join(format!("{}.json", name));
    let text = serde_json::to_string(value).map_err(|e| BundleError::Build {
        message: format!("Failed to serialize {}: {}", name, e),
        help: None,
    })?;
    fs::write(&path, text).map_err(|e| BundleError::io(&path, e))?;
    Ok(path)
}
