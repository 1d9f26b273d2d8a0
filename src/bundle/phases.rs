//! The fixed build phases of a bundle.

use std::fs::{self, File};
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::manifest::{AssetRef, FlatPairs, Manifest};
use super::{Bundle, ManifestState};
use crate::codec::{content_hash, hash_dir, hash_file};
use crate::error::{BundleError, Result};
use crate::project::CompressionType;

/// Archive name of zipped bundles.
pub const ZIP_FILENAME: &str = "res.zip";

fn phase_error(phase: &str, state: &ManifestState) -> BundleError {
    BundleError::Phase {
        message: format!("{} cannot run on a {} manifest", phase, state.label()),
    }
}

/// `dir/name.ext` → `dir/name.<hash>.ext`
fn with_hash(path: &Path, hash: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, hash, ext.to_string_lossy()),
        None => format!("{}.{}", stem, hash),
    };
    path.with_file_name(name)
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| BundleError::io(from, format!("cannot rename to {}: {}", to.display(), e)))
}

impl Bundle {
    /// Run every phase in order.
    pub fn build(&mut self) -> Result<()> {
        self.init_config()?;
        self.gen_packed_assets_config()?;
        if self.md5_cache {
            self.create_assets_md5()?;
            self.compress()?;
            self.zip_bundle()?;
            self.md5_bundle()?;
        } else {
            self.compress()?;
            self.zip_bundle()?;
        }
        self.output_configs()?;
        info!(bundle = %self.name(), assets = self.assets.len(), "bundle built");
        Ok(())
    }

    /// Start the manifest.
    pub fn init_config(&mut self) -> Result<()> {
        if !matches!(self.state, ManifestState::Collecting) {
            return Err(phase_error("init_config", &self.state));
        }
        let deps = self.deps.iter().cloned().collect();
        self.state = ManifestState::Initialized(Manifest::new(self.name(), self.debug, deps));
        Ok(())
    }

    /// Fill uuids, redirects, packs, scenes, paths and the extension map
    /// from the bundle's current membership.
    pub fn gen_packed_assets_config(&mut self) -> Result<()> {
        let mut manifest = match mem::replace(&mut self.state, ManifestState::Broken) {
            ManifestState::Initialized(m) => m,
            other => {
                let err = phase_error("gen_packed_assets_config", &other);
                self.state = other;
                return Err(err);
            }
        };

        manifest.deps = self.deps.iter().cloned().collect();

        let mut uuids: indexmap::IndexSet<String> = self.assets.iter().cloned().collect();
        for group in &self.groups {
            if !group.name.is_empty() {
                uuids.insert(group.name.clone());
            }
        }
        uuids.extend(self.redirect.keys().cloned());
        manifest.uuids = uuids.into_iter().collect();

        let mut redirect = FlatPairs::default();
        for (uuid, target) in &self.redirect {
            let dep = manifest
                .deps
                .iter()
                .position(|d| d == target)
                .ok_or_else(|| BundleError::Phase {
                    message: format!("redirect target {} missing from deps", target),
                })?;
            redirect.push(AssetRef::uuid(uuid.as_str()), dep);
        }
        manifest.redirect = redirect;

        // owned copies: compaction rewrites the packs, not the live groups
        manifest.packs = self
            .groups
            .iter()
            .filter(|g| !g.name.is_empty())
            .map(|g| {
                let members = g.uuids.iter().map(|u| AssetRef::uuid(u.as_str())).collect();
                (g.name.clone(), members)
            })
            .collect();

        manifest.scenes = self
            .scenes
            .iter()
            .map(|(uuid, url)| (url.clone(), AssetRef::uuid(uuid.as_str())))
            .collect();

        manifest.extension_map = self
            .extension_map
            .iter()
            .map(|(ext, members)| {
                let members = members.iter().map(|u| AssetRef::uuid(u.as_str())).collect();
                (ext.clone(), members)
            })
            .collect();

        manifest.paths = self.init_asset_paths();
        self.state = ManifestState::Configured(manifest);
        Ok(())
    }

    /// Content-hash every import and native output, rename it with the
    /// hash and record the versions.
    pub fn create_assets_md5(&mut self) -> Result<()> {
        let manifest = match &mut self.state {
            ManifestState::Configured(m) => m,
            other => return Err(phase_error("create_assets_md5", other)),
        };

        for (id, path) in self.import_files.iter_mut() {
            let hash = hash_file(path)?;
            let renamed = with_hash(path, &hash);
            rename(path, &renamed)?;
            *path = renamed;
            manifest.versions.import.push(AssetRef::uuid(id.as_str()), hash);
        }

        for (uuid, files) in self.native_files.iter_mut() {
            let hash = match files.as_slice() {
                [dir] if dir.is_dir() => hash_dir(dir)?,
                _ => {
                    let mut bytes = Vec::new();
                    for file in files.iter() {
                        bytes.extend(fs::read(file).map_err(|e| BundleError::io(file, e))?);
                    }
                    content_hash(&bytes)
                }
            };
            for file in files.iter_mut() {
                let renamed = with_hash(file, &hash);
                rename(file, &renamed)?;
                *file = renamed;
            }
            manifest.versions.native.push(AssetRef::uuid(uuid.as_str()), hash);
        }

        debug!(
            bundle = %self.options.name,
            import = self.import_files.len(),
            native = self.native_files.len(),
            "hashed outputs"
        );
        Ok(())
    }

    /// Compact the manifest. Runs once; a second call is a phase error.
    pub fn compress(&mut self) -> Result<()> {
        let manifest = match mem::replace(&mut self.state, ManifestState::Broken) {
            ManifestState::Configured(m) => m,
            ManifestState::Compacted(m) => {
                self.state = ManifestState::Compacted(m);
                return Err(BundleError::Phase {
                    message: format!("manifest of {} is already compacted", self.options.name),
                });
            }
            other => {
                let err = phase_error("compress", &other);
                self.state = other;
                return Err(err);
            }
        };
        self.state = ManifestState::Compacted(manifest.compact()?);
        Ok(())
    }

    /// Archive `import/` and `native/` into `res.zip` (zip bundles only).
    pub fn zip_bundle(&mut self) -> Result<()> {
        if self.options.compression != CompressionType::Zip {
            return Ok(());
        }
        let manifest = match &mut self.state {
            ManifestState::Compacted(m) => m,
            other => return Err(phase_error("zip_bundle", other)),
        };

        let zip_path = self.dest.join(ZIP_FILENAME);
        let file = File::create(&zip_path).map_err(|e| BundleError::io(&zip_path, e))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let zip_error = |e: zip::result::ZipError| BundleError::io(&zip_path, e);

        let mut archived = 0usize;
        for base in ["import", "native"] {
            let dir = self.dest.join(base);
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&dir).sort_by_file_name() {
                let entry = entry.map_err(|e| BundleError::io(&dir, e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&self.dest)
                    .map_err(|e| BundleError::io(entry.path(), e))?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                zip.start_file(name, options).map_err(zip_error)?;
                let mut src = File::open(entry.path()).map_err(|e| BundleError::io(entry.path(), e))?;
                io::copy(&mut src, &mut zip).map_err(|e| BundleError::io(entry.path(), e))?;
                archived += 1;
            }
            fs::remove_dir_all(&dir).map_err(|e| BundleError::io(&dir, e))?;
        }
        zip.finish().map_err(zip_error)?;

        manifest.is_zip = true;
        self.zip_file = Some(zip_path);
        debug!(bundle = %self.options.name, files = archived, "zipped bundle");
        Ok(())
    }

    /// Version the bundle from the final manifest and script, renaming the
    /// script and the archive with their hashes.
    pub fn md5_bundle(&mut self) -> Result<()> {
        let manifest = match &mut self.state {
            ManifestState::Compacted(m) => m,
            other => return Err(phase_error("md5_bundle", other)),
        };

        if let Some(zip) = self.zip_file.as_mut() {
            let hash = hash_file(zip)?;
            let renamed = with_hash(zip, &hash);
            rename(zip, &renamed)?;
            *zip = renamed;
            manifest.zip_version = Some(hash);
        }

        let mut bytes = manifest.to_json(false)?.into_bytes();
        if let Some(script) = &self.script_file {
            bytes.extend(fs::read(script).map_err(|e| BundleError::io(script, e))?);
        }
        let version = content_hash(&bytes);

        if self.options.compression != CompressionType::Subpackage {
            if let Some(script) = self.script_file.as_mut() {
                let renamed = with_hash(script, &version);
                rename(script, &renamed)?;
                *script = renamed;
            }
        }

        self.version = Some(version);
        Ok(())
    }

    /// Write `config[.<version>].json`.
    pub fn output_configs(&mut self) -> Result<()> {
        let manifest = match &self.state {
            ManifestState::Compacted(m) => m,
            other => return Err(phase_error("output_configs", other)),
        };

        fs::create_dir_all(&self.dest).map_err(|e| BundleError::io(&self.dest, e))?;
        let name = match &self.version {
            Some(version) => format!("config.{}.json", version),
            None => "config.json".to_string(),
        };
        let path = self.dest.join(name);
        fs::write(&path, manifest.to_json(self.debug)?).map_err(|e| BundleError::io(&path, e))?;

        debug!(bundle = %self.options.name, path = %path.display(), "wrote manifest");
        self.config_file = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decompress_uuid;
    use crate::group::{Group, GroupType};
    use crate::library::Asset;
    use crate::project::BundleOptions;
    use std::collections::HashSet;
    use tempfile::{tempdir, TempDir};

    const A: &str = "aa000000-0000-4000-8000-000000000001";
    const B: &str = "bb000000-0000-4000-8000-000000000002";
    const C: &str = "cc000000-0000-4000-8000-000000000003";

    fn bundle(dir: &TempDir, compression: CompressionType, md5: bool) -> Bundle {
        let options = BundleOptions::new("main", "db://assets/main").with_compression(compression);
        let mut b = Bundle::new(options, dir.path(), false, md5);
        b.add_root_asset(&Asset::new(A, "cc.Prefab").with_url("db://assets/main/hero.prefab"));
        b.add_root_asset(&Asset::new(B, "cc.Prefab").with_url("db://assets/main/villain.prefab"));
        b.add_asset(&Asset::new(C, "cc.Material"));
        b
    }

    fn write_import(b: &mut Bundle, id: &str, body: &str) {
        let path = b.import_dir().join(&id[..2]).join(format!("{}.json", id));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        b.register_import(id, path);
    }

    fn manifest_json(b: &Bundle) -> serde_json::Value {
        let text = fs::read_to_string(b.config_file().unwrap()).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_build_writes_compacted_manifest() {
        let dir = tempdir().unwrap();
        let mut b = bundle(&dir, CompressionType::MergeDep, false);
        b.set_groups(vec![Group::new(GroupType::Normal, vec![A.into(), C.into()]).named("packname1")]);
        write_import(&mut b, "packname1", "[]");
        write_import(&mut b, B, "{}");
        b.add_redirect("dd000000-0000-4000-8000-000000000004", "resources");

        b.build().unwrap();

        assert_eq!(b.config_file().unwrap(), dir.path().join("main").join("config.json"));
        let json = manifest_json(&b);
        let uuids: Vec<String> = json["uuids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| decompress_uuid(u.as_str().unwrap()))
            .collect();
        let len = uuids.len();
        assert_eq!(len, 5);
        assert!(uuids.contains(&"packname1".to_string()));
        assert_eq!(json["deps"], serde_json::json!(["resources"]));
        for member in json["packs"]["packname1"].as_array().unwrap() {
            assert!((member.as_u64().unwrap() as usize) < len);
        }
        assert_eq!(json["types"], serde_json::json!(["cc.Prefab"]));
    }

    #[test]
    fn test_compress_twice_is_a_phase_error() {
        let dir = tempdir().unwrap();
        let mut b = bundle(&dir, CompressionType::None, false);
        b.init_config().unwrap();
        b.gen_packed_assets_config().unwrap();
        b.compress().unwrap();

        let err = b.compress().unwrap_err();
        assert!(matches!(err, BundleError::Phase { .. }));
        // the compacted manifest survives the rejected call
        assert!(b.manifest().is_some());
    }

    #[test]
    fn test_compress_before_config_is_a_phase_error() {
        let dir = tempdir().unwrap();
        let mut b = bundle(&dir, CompressionType::None, false);
        assert!(matches!(b.compress(), Err(BundleError::Phase { .. })));
        b.init_config().unwrap();
        assert!(matches!(b.init_config(), Err(BundleError::Phase { .. })));
    }

    #[test]
    fn test_md5_renames_outputs_and_versions_manifest() {
        let dir = tempdir().unwrap();
        let mut b = bundle(&dir, CompressionType::None, true);
        write_import(&mut b, A, r#"{"a":1}"#);
        let native = b.native_dir().join("bb").join(format!("{}.png", B));
        fs::create_dir_all(native.parent().unwrap()).unwrap();
        fs::write(&native, b"png").unwrap();
        b.register_native(B, native.clone());
        let script = b.dest().join("index.js");
        fs::write(&script, "// scripts").unwrap();
        b.set_script_file(script);

        b.build().unwrap();

        let import = &b.import_files()[A];
        let hash = hash_file(import).unwrap();
        assert_eq!(import.file_name().unwrap().to_string_lossy(), format!("{}.{}.json", A, hash));
        assert!(!native.exists());
        assert_eq!(b.native_files()[B].len(), 1);

        let version = b.version().unwrap().to_string();
        assert_eq!(
            b.config_file().unwrap().file_name().unwrap().to_string_lossy(),
            format!("config.{}.json", version)
        );
        assert_eq!(
            b.script_file().unwrap().file_name().unwrap().to_string_lossy(),
            format!("index.{}.js", version)
        );

        let json = manifest_json(&b);
        assert_eq!(json["versions"]["import"][1], serde_json::json!(hash));
    }

    #[test]
    fn test_subpackage_keeps_script_name() {
        let dir = tempdir().unwrap();
        let mut b = bundle(&dir, CompressionType::Subpackage, true);
        fs::create_dir_all(b.dest()).unwrap();
        let script = b.dest().join("index.js");
        fs::write(&script, "// scripts").unwrap();
        b.set_script_file(script.clone());

        b.build().unwrap();

        assert_eq!(b.script_file().unwrap(), script.as_path());
        assert!(b.version().is_some());
    }

    #[test]
    fn test_zip_bundle_archives_outputs() {
        let dir = tempdir().unwrap();
        let mut b = bundle(&dir, CompressionType::Zip, true);
        write_import(&mut b, A, "{}");
        write_import(&mut b, B, "{}");

        b.build().unwrap();

        let zip_path = b.zip_file().unwrap().to_path_buf();
        assert!(zip_path.file_name().unwrap().to_string_lossy().starts_with("res."));
        assert!(!b.import_dir().exists());

        let archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let names: HashSet<String> = archive.file_names().map(String::from).collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.starts_with("import/")));

        let json = manifest_json(&b);
        assert_eq!(json["isZip"], serde_json::json!(true));
        assert_eq!(json["zipVersion"], serde_json::json!(hash_file(&zip_path).unwrap()));
    }

    #[test]
    fn test_debug_manifest_is_pretty() {
        let dir = tempdir().unwrap();
        let mut options = BundleOptions::new("main", "db://assets/main");
        options.debug = Some(true);
        let mut b = Bundle::new(options, dir.path(), false, false);
        b.build().unwrap();

        let text = fs::read_to_string(b.config_file().unwrap()).unwrap();
        assert!(text.contains("\n    \"importBase\""));
    }

    #[test]
    fn test_with_hash() {
        assert_eq!(
            with_hash(Path::new("/b/import/aa/aa11.json"), "12345"),
            PathBuf::from("/b/import/aa/aa11.12345.json")
        );
        assert_eq!(with_hash(Path::new("/b/native/aa/font"), "abcde"), PathBuf::from("/b/native/aa/font.abcde"));
    }
}
