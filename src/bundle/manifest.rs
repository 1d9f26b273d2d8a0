//! The bundle manifest and its compaction pass.
//!
//! A manifest starts out as [`Manifest<Raw>`], referencing assets by uuid.
//! [`Manifest::compact`] consumes it and returns a [`Manifest<Compact>`] in
//! which every asset reference is an index into `uuids`, the uuids
//! themselves are compacted strings and path types are deduplicated into
//! `types`. A compacted manifest has no `compact` method, so the pass can
//! only ever run once on a given manifest.

use std::collections::HashMap;
use std::marker::PhantomData;

use indexmap::{IndexMap, IndexSet};
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use tracing::warn;

use crate::codec::compress_uuid;
use crate::error::{BundleError, Result};

/// Manifest stage before compaction.
#[derive(Debug, Clone, Copy)]
pub struct Raw;

/// Manifest stage after compaction.
#[derive(Debug, Clone, Copy)]
pub struct Compact;

/// Reference to an asset: its uuid before compaction, an index into
/// `uuids` after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum AssetRef {
    Uuid(String),
    Index(usize),
}

impl AssetRef {
    pub fn uuid(id: impl Into<String>) -> Self {
        AssetRef::Uuid(id.into())
    }

    pub fn as_uuid(&self) -> Option<&str> {
        match self {
            AssetRef::Uuid(u) => Some(u),
            AssetRef::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            AssetRef::Index(i) => Some(*i),
            AssetRef::Uuid(_) => None,
        }
    }
}

/// A path entry's type: the type name before compaction, an index into
/// `types` after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TypeRef {
    Name(String),
    Index(usize),
}

/// Load path of a root asset. Serialized as `[url, type]` or
/// `[url, type, 1]` for sub-assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub url: String,
    pub kind: TypeRef,
    pub sub_asset: bool,
}

impl Serialize for PathInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = if self.sub_asset { 3 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.url)?;
        seq.serialize_element(&self.kind)?;
        if self.sub_asset {
            seq.serialize_element(&1)?;
        }
        seq.end()
    }
}

/// Pairs serialized as one flat array: `[a0, b0, a1, b1, ...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatPairs<B>(pub Vec<(AssetRef, B)>);

impl<B: Serialize> Serialize for FlatPairs<B> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len() * 2))?;
        for (asset, value) in &self.0 {
            seq.serialize_element(asset)?;
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

impl<B> FlatPairs<B> {
    pub fn push(&mut self, asset: AssetRef, value: B) {
        self.0.push((asset, value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AssetRef, B)> {
        self.0.iter()
    }
}

/// Content hashes of produced files: `[asset, hash, ...]` per base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Versions {
    pub import: FlatPairs<String>,
    pub native: FlatPairs<String>,
}

/// The manifest written as `config[.<version>].json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest<S> {
    pub name: String,
    pub import_base: String,
    pub native_base: String,
    pub debug: bool,
    pub is_zip: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_version: Option<String>,
    /// Bundles this one redirects into.
    pub deps: Vec<String>,
    pub uuids: Vec<String>,
    pub paths: IndexMap<AssetRef, PathInfo>,
    /// Scene url → scene asset.
    pub scenes: IndexMap<String, AssetRef>,
    /// Pack name → members.
    pub packs: IndexMap<String, Vec<AssetRef>>,
    pub versions: Versions,
    /// `[asset, index into deps, ...]`
    pub redirect: FlatPairs<usize>,
    pub types: Vec<String>,
    /// Native extension → assets whose native file uses it.
    pub extension_map: IndexMap<String, Vec<AssetRef>>,
    #[serde(skip)]
    stage: PhantomData<S>,
}

impl Manifest<Raw> {
    /// A fresh manifest for a bundle.
    pub fn new(name: impl Into<String>, debug: bool, deps: Vec<String>) -> Self {
        Self {
            name: name.into(),
            import_base: "import".to_string(),
            native_base: "native".to_string(),
            debug,
            is_zip: false,
            zip_version: None,
            deps,
            uuids: vec![],
            paths: IndexMap::new(),
            scenes: IndexMap::new(),
            packs: IndexMap::new(),
            versions: Versions::default(),
            redirect: FlatPairs::default(),
            types: vec![],
            extension_map: IndexMap::new(),
            stage: PhantomData,
        }
    }

    /// Every uuid reference outside `uuids`, in section order.
    fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        refs.extend(self.paths.keys().filter_map(AssetRef::as_uuid));
        refs.extend(self.scenes.values().filter_map(AssetRef::as_uuid));
        for members in self.extension_map.values() {
            refs.extend(members.iter().filter_map(AssetRef::as_uuid));
        }
        for members in self.packs.values() {
            refs.extend(members.iter().filter_map(AssetRef::as_uuid));
        }
        refs.extend(self.versions.import.iter().filter_map(|(a, _)| a.as_uuid()));
        refs.extend(self.versions.native.iter().filter_map(|(a, _)| a.as_uuid()));
        refs.extend(self.redirect.iter().filter_map(|(a, _)| a.as_uuid()));
        refs
    }

    /// Compact the manifest.
    ///
    /// Uuids are ordered by how often the manifest references them (most
    /// referenced first, ties keep their previous order), every reference
    /// is replaced by its position, uuids are compacted and path types are
    /// moved into `types`. A referenced uuid absent from `uuids` is logged
    /// and appended before sorting.
    pub fn compact(self) -> Result<Manifest<Compact>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: IndexSet<String> = self.uuids.iter().cloned().collect();

        for uuid in self.references() {
            *counts.entry(uuid.to_string()).or_insert(0) += 1;
            if !order.contains(uuid) {
                warn!(bundle = %self.name, uuid, "uuid missing from manifest uuids, re-inserting");
                order.insert(uuid.to_string());
            }
        }

        let mut sorted: Vec<String> = order.into_iter().collect();
        // stable: equal counts keep their previous relative order
        sorted.sort_by(|a, b| {
            let ca = counts.get(a).copied().unwrap_or(0);
            let cb = counts.get(b).copied().unwrap_or(0);
            cb.cmp(&ca)
        });

        let indices: HashMap<&str, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, u)| (u.as_str(), i))
            .collect();

        let remap = |asset: AssetRef| -> Result<AssetRef> {
            match asset {
                AssetRef::Uuid(uuid) => indices
                    .get(uuid.as_str())
                    .map(|&i| AssetRef::Index(i))
                    .ok_or_else(|| BundleError::Phase {
                        message: format!("uuid {} has no index after compaction", uuid),
                    }),
                AssetRef::Index(_) => Err(BundleError::Phase {
                    message: "manifest already holds indices; compaction ran twice".to_string(),
                }),
            }
        };
        let remap_all = |members: Vec<AssetRef>| -> Result<Vec<AssetRef>> {
            members.into_iter().map(remap).collect()
        };
        let remap_pairs = |pairs: FlatPairs<String>| -> Result<FlatPairs<String>> {
            let pairs = pairs
                .0
                .into_iter()
                .map(|(a, v)| Ok((remap(a)?, v)))
                .collect::<Result<Vec<_>>>()?;
            Ok(FlatPairs(pairs))
        };

        let mut types: IndexSet<String> = IndexSet::new();
        let mut paths = IndexMap::with_capacity(self.paths.len());
        for (asset, info) in self.paths {
            let kind = match info.kind {
                TypeRef::Name(name) => TypeRef::Index(types.insert_full(name).0),
                TypeRef::Index(_) => {
                    return Err(BundleError::Phase {
                        message: "path types already deduplicated; compaction ran twice".to_string(),
                    })
                }
            };
            paths.insert(
                remap(asset)?,
                PathInfo {
                    url: info.url,
                    kind,
                    sub_asset: info.sub_asset,
                },
            );
        }

        let scenes = self
            .scenes
            .into_iter()
            .map(|(url, asset)| Ok((url, remap(asset)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        let packs = self
            .packs
            .into_iter()
            .map(|(name, members)| Ok((name, remap_all(members)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        let extension_map = self
            .extension_map
            .into_iter()
            .map(|(ext, members)| Ok((ext, remap_all(members)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        let versions = Versions {
            import: remap_pairs(self.versions.import)?,
            native: remap_pairs(self.versions.native)?,
        };
        let redirect = FlatPairs(
            self.redirect
                .0
                .into_iter()
                .map(|(a, dep)| Ok((remap(a)?, dep)))
                .collect::<Result<Vec<_>>>()?,
        );

        Ok(Manifest {
            name: self.name,
            import_base: self.import_base,
            native_base: self.native_base,
            debug: self.debug,
            is_zip: self.is_zip,
            zip_version: self.zip_version,
            deps: self.deps,
            uuids: sorted.iter().map(|u| compress_uuid(u)).collect(),
            paths,
            scenes,
            packs,
            versions,
            redirect,
            types: types.into_iter().collect(),
            extension_map,
            stage: PhantomData,
        })
    }
}

impl Manifest<Compact> {
    /// Serialize: 4-space indented when `pretty`, minified otherwise.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let to_build_error = |e: serde_json::Error| BundleError::Build {
            message: format!("Failed to serialize manifest for {}: {}", self.name, e),
            help: None,
        };

        if !pretty {
            return serde_json::to_string(self).map_err(to_build_error);
        }

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer).map_err(to_build_error)?;
        String::from_utf8(buf).map_err(|e| BundleError::Build {
            message: format!("Manifest for {} is not UTF-8: {}", self.name, e),
            help: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decompress_uuid;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    const A: &str = "0a1b2c3d-0000-4000-8000-000000000001";
    const B: &str = "0a1b2c3d-0000-4000-8000-000000000002";
    const C: &str = "0a1b2c3d-0000-4000-8000-000000000003";
    const D: &str = "0a1b2c3d-0000-4000-8000-000000000004";

    fn path(url: &str, kind: &str) -> PathInfo {
        PathInfo {
            url: url.to_string(),
            kind: TypeRef::Name(kind.to_string()),
            sub_asset: false,
        }
    }

    /// refcounts: C=4, B=3, A=1, D=1 (pack name "p1" = 1)
    fn sample() -> Manifest<Raw> {
        let mut m = Manifest::new("main", false, vec!["resources".to_string()]);
        m.uuids = vec![A.into(), B.into(), C.into(), D.into(), "p1".into()];
        m.paths.insert(AssetRef::uuid(A), path("hero", "cc.Prefab"));
        m.paths.insert(AssetRef::uuid(B), path("bg", "cc.ImageAsset"));
        m.paths.insert(AssetRef::uuid(C), path("bg/texture", "cc.Texture2D"));
        m.packs
            .insert("p1".to_string(), vec![AssetRef::uuid(B), AssetRef::uuid(C)]);
        m.versions.import.push(AssetRef::uuid("p1"), "abcde".to_string());
        m.versions.import.push(AssetRef::uuid(C), "12345".to_string());
        m.versions.native.push(AssetRef::uuid(B), "f00ba".to_string());
        m.extension_map
            .insert(".astc".to_string(), vec![AssetRef::uuid(C)]);
        m.redirect.push(AssetRef::uuid(D), 0);
        m
    }

    fn decoded(m: &Manifest<Compact>) -> Vec<String> {
        m.uuids.iter().map(|u| decompress_uuid(u)).collect()
    }

    #[test]
    fn test_uuids_sorted_by_reference_count() {
        let compact = sample().compact().unwrap();
        assert_eq!(decoded(&compact), vec![C, B, A, D, "p1"]);
    }

    #[test]
    fn test_every_reference_becomes_an_index() {
        let compact = sample().compact().unwrap();
        let len = compact.uuids.len();

        let json: serde_json::Value = serde_json::from_str(&compact.to_json(false).unwrap()).unwrap();
        for key in json["paths"].as_object().unwrap().keys() {
            assert!(key.parse::<usize>().unwrap() < len);
        }
        for member in json["packs"]["p1"].as_array().unwrap() {
            assert!((member.as_u64().unwrap() as usize) < len);
        }
        assert_eq!(json["redirect"], serde_json::json!([3, 0]));
        assert_eq!(json["extensionMap"][".astc"], serde_json::json!([0]));
        assert_eq!(json["versions"]["import"], serde_json::json!([4, "abcde", 0, "12345"]));
    }

    #[test]
    fn test_uuid_count_matches_distinct_references() {
        let raw = sample();
        let distinct: HashSet<String> = raw.references().into_iter().map(String::from).collect();
        let compact = raw.compact().unwrap();
        assert_eq!(compact.uuids.len(), distinct.len());
    }

    #[test]
    fn test_compacted_uuids_decode_to_original_set() {
        let raw = sample();
        let original: HashSet<String> = raw.uuids.iter().cloned().collect();
        let compact = raw.compact().unwrap();

        assert!(compact.uuids[0].len() == 22);
        let restored: HashSet<String> = decoded(&compact).into_iter().collect();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_types_deduplicated() {
        let mut raw = sample();
        raw.paths.insert(AssetRef::uuid(D), path("villain", "cc.Prefab"));
        let compact = raw.compact().unwrap();

        assert_eq!(compact.types, vec!["cc.Prefab", "cc.ImageAsset", "cc.Texture2D"]);
        let kinds: Vec<TypeRef> = compact.paths.values().map(|p| p.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![TypeRef::Index(0), TypeRef::Index(1), TypeRef::Index(2), TypeRef::Index(0)]
        );
    }

    #[test]
    fn test_missing_uuid_reinserted() {
        let mut raw = sample();
        raw.uuids.retain(|u| u != A);
        let compact = raw.compact().unwrap();
        assert!(decoded(&compact).contains(&A.to_string()));
    }

    #[test]
    fn test_scene_refs_and_sub_asset_paths() {
        let mut raw = Manifest::new("levels", true, vec![]);
        raw.uuids = vec![A.into(), B.into()];
        raw.scenes.insert("db://assets/levels/one.scene".into(), AssetRef::uuid(A));
        raw.paths.insert(
            AssetRef::uuid(B),
            PathInfo {
                url: "bg/spriteFrame".into(),
                kind: TypeRef::Name("cc.SpriteFrame".into()),
                sub_asset: true,
            },
        );
        let compact = raw.compact().unwrap();
        let json: serde_json::Value = serde_json::from_str(&compact.to_json(false).unwrap()).unwrap();

        assert_eq!(json["scenes"]["db://assets/levels/one.scene"], serde_json::json!(0));
        assert_eq!(json["paths"]["1"], serde_json::json!(["bg/spriteFrame", 0, 1]));
    }

    #[test]
    fn test_pretty_output_uses_four_spaces() {
        let compact = Manifest::new("main", true, vec![]).compact().unwrap();
        let pretty = compact.to_json(true).unwrap();
        assert!(pretty.contains("\n    \"name\": \"main\""));
        assert!(!compact.to_json(false).unwrap().contains('\n'));
    }

    #[test]
    fn test_manifest_snapshot() {
        let mut raw = Manifest::new("tiny", false, vec![]);
        raw.uuids = vec![A.into()];
        raw.paths.insert(AssetRef::uuid(A), path("hero", "cc.Prefab"));
        let compact = raw.compact().unwrap();

        insta::assert_json_snapshot!(compact, @r###"
        {
          "name": "tiny",
          "importBase": "import",
          "nativeBase": "native",
          "debug": false,
          "isZip": false,
          "deps": [],
          "uuids": [
            "0aGyw9AABAAIAAAAAAAAAB"
          ],
          "paths": {
            "0": [
              "hero",
              0
            ]
          },
          "scenes": {},
          "packs": {},
          "versions": {
            "import": [],
            "native": []
          },
          "redirect": [],
          "types": [
            "cc.Prefab"
          ],
          "extensionMap": {}
        }
        "###);
    }
}
