use std::collections::HashSet;

use tracing::debug;

use super::{Group, GroupType};
use crate::bundle::Bundle;
use crate::library::Library;
use crate::project::CompressionType;

/// Decide the groups of a bundle.
///
/// - `none`: no groups.
/// - `merge_all_json`: one group with every non-redirected JSON asset.
/// - otherwise: one candidate per non-texture root, holding the JSON
///   assets reachable from it. Larger candidates claim shared assets
///   first, a candidate whose root sits inside another candidate is
///   dropped, and Texture2D roots plus atlas images get groups of their own.
///
/// Groups with one member or less are discarded.
pub fn select_groups(bundle: &Bundle, library: &Library) -> Vec<Group> {
    let groups = match bundle.compression() {
        CompressionType::None => vec![],
        CompressionType::MergeAllJson => {
            let members: Vec<String> = bundle
                .json_assets()
                .filter(|u| !bundle.is_redirected(u))
                .cloned()
                .collect();
            vec![Group::new(GroupType::Normal, members)]
        }
        CompressionType::MergeDep | CompressionType::Subpackage | CompressionType::Zip => {
            let atlas_images = atlas_groups(bundle, library);
            let claimed_by_atlas: HashSet<&str> = atlas_images
                .iter()
                .flat_map(|g| g.uuids.iter().map(String::as_str))
                .collect();

            let mut groups = dependency_groups(bundle, library, &claimed_by_atlas);
            groups.extend(texture_group(bundle, library));
            groups.extend(atlas_images);
            groups
        }
    };

    let groups: Vec<Group> = groups.into_iter().filter(|g| g.uuids.len() > 1).collect();
    debug!(bundle = %bundle.name(), groups = groups.len(), "selected json groups");
    groups
}

fn packable(bundle: &Bundle, uuid: &str) -> bool {
    bundle.contains(uuid)
        && !bundle.is_redirected(uuid)
        && bundle.entry(uuid).map_or(false, |e| e.json)
}

fn dependency_groups(bundle: &Bundle, library: &Library, excluded: &HashSet<&str>) -> Vec<Group> {
    let mut candidates: Vec<(String, Vec<String>)> = Vec::new();

    for root in bundle.root_assets() {
        let Some(asset) = library.get(root) else {
            continue;
        };
        if asset.is_texture() || !packable(bundle, root) {
            continue;
        }
        let members = library.walk(root, |a| {
            !a.is_texture() && !excluded.contains(a.uuid.as_str()) && packable(bundle, &a.uuid)
        });
        if members.len() > 1 {
            candidates.push((root.clone(), members));
        }
    }

    // stable: equal sizes keep root order
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut claimed: HashSet<String> = HashSet::new();
    for (_, members) in &mut candidates {
        members.retain(|m| !claimed.contains(m));
        claimed.extend(members.iter().cloned());
    }
    candidates.retain(|(_, members)| members.len() > 1);

    let nested: HashSet<String> = candidates
        .iter()
        .filter(|(root, _)| {
            candidates
                .iter()
                .any(|(other, members)| other != root && members.contains(root))
        })
        .map(|(root, _)| root.clone())
        .collect();

    candidates
        .into_iter()
        .filter(|(root, _)| !nested.contains(root))
        .map(|(_, members)| Group::new(GroupType::Normal, members))
        .collect()
}

fn texture_group(bundle: &Bundle, library: &Library) -> Option<Group> {
    let mut textures: Vec<String> = bundle
        .root_assets()
        .filter(|u| library.get(u).map_or(false, |a| a.is_texture()))
        .filter(|u| packable(bundle, u))
        .cloned()
        .collect();
    if textures.len() <= 1 {
        return None;
    }
    textures.sort();
    Some(Group::new(GroupType::Texture, textures))
}

fn atlas_groups(bundle: &Bundle, library: &Library) -> Vec<Group> {
    library
        .atlases()
        .iter()
        .map(|atlas| {
            let members: Vec<String> = atlas
                .iter()
                .filter(|u| packable(bundle, u))
                .cloned()
                .collect();
            Group::new(GroupType::Image, members)
        })
        .filter(|g| g.uuids.len() > 1)
        .collect()
}
