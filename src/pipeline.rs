//! Build orchestration.
//!
//! A [`Pipeline`] takes a project configuration and its asset library and
//! produces every configured bundle:
//!
//! 1. root assets are assigned to the highest-priority bundle whose root
//!    contains their url;
//! 2. dependencies are pulled into the depending bundle, or redirected to
//!    the bundle that owns them as a root;
//! 3. each bundle picks its JSON groups;
//! 4. one texture pass compresses the images of every bundle;
//! 5. natives, JSON and scripts are written and [`Bundle::build`] runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bundle::Bundle;
use crate::error::{BundleError, Result};
use crate::group::{select_groups, write_json};
use crate::library::{shard, Library};
use crate::project::{CompressionType, CustomCodec, ProjectConfig, CONFIG_FILENAME};
use crate::texture::{CodecRegistry, CompressReport, CompressTask, FormatTable, TextureCompressor};

/// Name of the concatenated script file in a bundle.
pub const SCRIPT_FILENAME: &str = "index.js";

/// Load `bundlekit.yaml` under `root` and the library it points at.
pub fn open_project(root: &Path) -> Result<(ProjectConfig, Library)> {
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Err(BundleError::Config {
            message: format!("{} not found in {}", CONFIG_FILENAME, root.display()),
            help: Some("Run `bundlekit init` to create one".to_string()),
        });
    }
    let mut config = ProjectConfig::load(&config_path)?;
    config.resolve_paths(root);
    let library = Library::load(&config.library)?;
    Ok((config, library))
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleReport {
    pub name: String,
    pub compression: CompressionType,
    pub assets: usize,
    pub scripts: usize,
    pub redirects: usize,
    pub deps: Vec<String>,
    pub packs: usize,
    pub standalone: usize,
    /// Assets without serialized JSON.
    pub skipped: Vec<String>,
    pub path_collisions: usize,
    pub manifest: Option<PathBuf>,
    pub zip: Option<PathBuf>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TextureReport {
    pub tasks: usize,
    pub compressed: usize,
    pub cached: usize,
    pub failed: Vec<String>,
    pub codec_invocations: usize,
}

impl From<&CompressReport> for TextureReport {
    fn from(report: &CompressReport) -> Self {
        Self {
            tasks: 0,
            compressed: report.compressed.len(),
            cached: report.cached.len(),
            failed: report.failed.clone(),
            codec_invocations: report.stats.codec_invocations,
        }
    }
}

/// Summary of one build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub bundles: Vec<BundleReport>,
    pub textures: TextureReport,
}

pub struct Pipeline {
    config: ProjectConfig,
    library: Library,
    codecs: CodecRegistry,
    formats: FormatTable,
    max_processes: Option<usize>,
}

impl Pipeline {
    /// Fails when a custom codec uses an unknown placeholder.
    pub fn new(config: ProjectConfig, library: Library) -> Result<Self> {
        let codecs = CodecRegistry::builtin()?.with_custom_codecs(&config.custom_codecs)?;
        let formats = FormatTable::with_overrides(&config.format_types);
        Ok(Self {
            config,
            library,
            codecs,
            formats,
            max_processes: None,
        })
    }

    /// Replace the codec set.
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Cap the number of live codec processes.
    pub fn with_max_processes(mut self, max: usize) -> Self {
        self.max_processes = Some(max);
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Build every bundle of the project.
    pub fn run(&self) -> Result<BuildReport> {
        let mut bundles = self.create_bundles()?;
        self.resolve_dependencies(&mut bundles);

        for bundle in &mut bundles {
            let groups = select_groups(bundle, &self.library);
            bundle.set_groups(groups);
        }

        let textures = self.compress_textures(&mut bundles)?;

        let mut report = BuildReport {
            bundles: Vec::with_capacity(bundles.len()),
            textures,
        };
        for bundle in &mut bundles {
            self.copy_natives(bundle)?;
            let json = write_json(bundle, &self.library)?;
            self.write_scripts(bundle)?;
            bundle.build()?;

            report.bundles.push(BundleReport {
                name: bundle.name().to_string(),
                compression: bundle.compression(),
                assets: bundle.assets().count(),
                scripts: bundle.scripts().count(),
                redirects: bundle.redirects().len(),
                deps: bundle.deps().iter().cloned().collect(),
                packs: json.packs,
                standalone: json.standalone,
                skipped: json.skipped,
                path_collisions: bundle.path_collisions().len(),
                manifest: bundle.config_file().map(Path::to_path_buf),
                zip: bundle.zip_file().map(Path::to_path_buf),
                version: bundle.version().map(String::from),
            });
        }

        info!(bundles = report.bundles.len(), "build finished");
        Ok(report)
    }

    /// Bundles by descending priority, each holding its root assets.
    fn create_bundles(&self) -> Result<Vec<Bundle>> {
        let mut options = self.config.bundles.clone();
        options.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut bundles = Vec::with_capacity(options.len());
        for opts in options {
            let bundle = Bundle::new(opts, &self.config.output, self.config.debug, self.config.md5_cache);
            if bundle.dest().exists() {
                fs::remove_dir_all(bundle.dest()).map_err(|e| BundleError::io(bundle.dest(), e))?;
            }
            bundles.push(bundle);
        }

        for asset in self.library.root_assets() {
            if asset.url.is_empty() {
                continue;
            }
            match bundles.iter_mut().find(|b| b.options().contains_url(&asset.url)) {
                Some(bundle) => bundle.add_root_asset(asset),
                None => debug!(url = %asset.url, "asset outside every bundle root"),
            }
        }

        for bundle in &bundles {
            debug!(bundle = %bundle.name(), roots = bundle.root_assets().count(), "collected root assets");
        }
        Ok(bundles)
    }

    /// Pull dependencies into each bundle, redirecting those another
    /// bundle owns as roots.
    fn resolve_dependencies(&self, bundles: &mut [Bundle]) {
        let mut owners: HashMap<String, String> = HashMap::new();
        for bundle in bundles.iter() {
            for uuid in bundle.root_assets() {
                owners
                    .entry(uuid.clone())
                    .or_insert_with(|| bundle.name().to_string());
            }
        }

        for bundle in bundles.iter_mut() {
            let mut queue: VecDeque<String> = bundle.assets().cloned().collect();
            let mut seen: HashSet<String> = queue.iter().cloned().collect();

            while let Some(uuid) = queue.pop_front() {
                let Some(asset) = self.library.get(&uuid) else {
                    continue;
                };
                for dep in &asset.depends {
                    if !seen.insert(dep.clone()) {
                        continue;
                    }
                    if let Some(owner) = owners.get(dep) {
                        if owner != bundle.name() {
                            bundle.add_redirect(dep, owner);
                            continue;
                        }
                    }
                    match self.library.get(dep) {
                        None => warn!(bundle = %bundle.name(), uuid = %uuid, dep = %dep, "missing dependency"),
                        Some(dep_asset) if dep_asset.is_script() => bundle.add_script(dep_asset),
                        Some(dep_asset) if !dep_asset.is_json_capable() => {
                            debug!(bundle = %bundle.name(), dep = %dep, "dependency has no serializable payload")
                        }
                        Some(dep_asset) => {
                            bundle.add_asset(dep_asset);
                            queue.push_back(dep.clone());
                        }
                    }
                }
            }
        }
    }

    /// Queue the texture tasks of every bundle and run them in one pass.
    fn compress_textures(&self, bundles: &mut [Bundle]) -> Result<TextureReport> {
        let out_dir = self.config.temp.join("compressed");
        let mut tasks = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();

        for bundle in bundles.iter_mut() {
            let uuids: Vec<String> = bundle.assets().cloned().collect();
            for uuid in uuids {
                for task in self.texture_tasks(&uuid, &out_dir) {
                    if queued.insert(task.label()) {
                        tasks.push(task.clone());
                    }
                    bundle.add_compress_task(task);
                }
            }
        }

        if tasks.is_empty() {
            return Ok(TextureReport::default());
        }

        let total = tasks.len();
        let mut compressor =
            TextureCompressor::new(&self.config.temp, self.codecs.clone(), self.formats.clone())
                .with_cache(self.config.use_texture_cache);
        if let Some(max) = self.max_processes {
            compressor = compressor.with_max_processes(max);
        }
        let report = compressor.run(tasks)?;

        for bundle in bundles.iter_mut() {
            let uuids: Vec<String> = bundle.compress_tasks().map(|t| t.uuid.clone()).collect();
            for uuid in uuids {
                if let Some(result) = report.results.get(&uuid) {
                    bundle.set_compress_result(&uuid, result.clone());
                }
            }
        }

        let mut textures = TextureReport::from(&report);
        textures.tasks = total;
        Ok(textures)
    }

    fn texture_tasks(&self, uuid: &str, out_dir: &Path) -> Vec<CompressTask> {
        let Some(asset) = self.library.get(uuid) else {
            return vec![];
        };
        if !asset.is_image() {
            return vec![];
        }
        let Some(preset) = asset.user_data.compress_preset.as_deref() else {
            return vec![];
        };
        let Some(formats) = self.config.preset_formats(preset) else {
            debug!(uuid, preset, platform = %self.config.platform, "preset has no formats for platform");
            return vec![];
        };
        let Some(src) = self.library.native_path(uuid) else {
            warn!(uuid, "image has no native file to compress");
            return vec![];
        };

        let custom = asset.user_data.custom_codec.as_deref().and_then(|name| {
            self.config.custom_codec(name).cloned().or_else(|| {
                self.codecs.custom(name).map(|_| CustomCodec {
                    name: name.to_string(),
                    program: name.to_string(),
                    args: vec![],
                })
            })
        });
        if custom.is_none() {
            if let Some(name) = &asset.user_data.custom_codec {
                warn!(uuid, codec = %name, "unknown custom codec, using built-in");
            }
        }

        formats
            .iter()
            .filter_map(|option| CompressTask::new(uuid, &src, out_dir, option, &self.formats))
            .map(|task| {
                task.with_custom_codec(custom.clone())
                    .with_mipmaps(asset.user_data.mipmaps)
            })
            .collect()
    }

    /// Copy compressed textures and other native files under `native/`.
    fn copy_natives(&self, bundle: &mut Bundle) -> Result<()> {
        let native_dir = bundle.native_dir();
        let uuids: Vec<String> = bundle.assets().cloned().collect();

        for uuid in uuids {
            let dir = native_dir.join(shard(&uuid));
            let native_ext = bundle.entry(&uuid).and_then(|e| e.native_ext.clone());

            if let Some(result) = bundle.compress_result(&uuid).cloned() {
                for (src, suffix) in result.dest.iter().zip(&result.suffix) {
                    let target = dir.join(format!("{}{}", uuid, suffix));
                    if target.exists() {
                        warn!(uuid = %uuid, suffix = %suffix, "two formats share an extension, keeping the first");
                        continue;
                    }
                    copy_file(src, &target)?;
                    bundle.register_native(&uuid, target);
                    if native_ext.as_deref() != Some(suffix.as_str()) {
                        bundle.add_extension(suffix, &uuid);
                    }
                }
                continue;
            }

            let Some(ext) = native_ext else {
                continue;
            };
            let Some(src) = self.library.native_path(&uuid) else {
                continue;
            };
            if src.is_dir() {
                let target = dir.join(&uuid);
                copy_dir(&src, &target)?;
                bundle.register_native(&uuid, target);
            } else if src.exists() {
                let target = dir.join(format!("{}{}", uuid, ext));
                copy_file(&src, &target)?;
                bundle.register_native(&uuid, target);
            } else {
                warn!(bundle = %bundle.name(), uuid = %uuid, path = %src.display(), "missing native file");
            }
        }
        Ok(())
    }

    /// Concatenate the bundle's scripts into `index.js`.
    fn write_scripts(&self, bundle: &mut Bundle) -> Result<()> {
        let mut script = String::new();
        let mut count = 0usize;
        for uuid in bundle.scripts() {
            let Some(path) = self.library.native_path(uuid) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(source) => {
                    script.push_str(&source);
                    if !source.ends_with('\n') {
                        script.push('\n');
                    }
                    count += 1;
                }
                Err(e) => warn!(uuid = %uuid, path = %path.display(), "cannot read script: {}", e),
            }
        }
        if count == 0 {
            return Ok(());
        }

        fs::create_dir_all(bundle.dest()).map_err(|e| BundleError::io(bundle.dest(), e))?;
        let path = bundle.dest().join(SCRIPT_FILENAME);
        fs::write(&path, script).map_err(|e| BundleError::io(&path, e))?;
        debug!(bundle = %bundle.name(), scripts = count, "wrote script bundle");
        bundle.set_script_file(path);
        Ok(())
    }
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| BundleError::io(src, format!("cannot copy to {}: {}", dest.display(), e)))?;
    Ok(())
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| BundleError::io(src, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BundleError::io(entry.path(), e))?;
        copy_file(entry.path(), &dest.join(relative))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Asset, LibraryBuilder, SCRIPT_TYPE};
    use crate::project::BundleOptions;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn config(dir: &TempDir) -> ProjectConfig {
        ProjectConfig {
            output: dir.path().join("build"),
            temp: dir.path().join("temp"),
            bundles: vec![
                BundleOptions::new("main", "db://assets/main"),
                BundleOptions::new("common", "db://assets/common"),
            ],
            ..ProjectConfig::default()
        }
    }

    fn prefab(uuid: &str, url: &str, deps: &[&str]) -> Asset {
        Asset::new(uuid, "cc.Prefab").with_url(url).with_depends(deps)
    }

    #[test]
    fn test_roots_go_to_highest_priority_bundle() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir);
        config.bundles[0].root = "db://assets".to_string();
        config.bundles[1].priority = 5;

        let mut builder = LibraryBuilder::new();
        builder
            .add(prefab("a1", "db://assets/main/a.prefab", &[]))
            .add(prefab("c1", "db://assets/common/c.prefab", &[]));
        let pipeline = Pipeline::new(config, builder.build()).unwrap();

        let bundles = pipeline.create_bundles().unwrap();
        assert_eq!(bundles[0].name(), "common");
        assert!(bundles[0].is_root("c1"));
        assert!(!bundles[1].contains("c1"));
        assert!(bundles[1].is_root("a1"));
    }

    #[test]
    fn test_dependencies_pulled_or_redirected() {
        let dir = tempdir().unwrap();
        let mut builder = LibraryBuilder::new();
        builder
            .add(prefab("a1", "db://assets/main/a.prefab", &["inner", "c1", "ghost", "js"]))
            .add(prefab("inner", "", &["deep"]))
            .add(prefab("deep", "", &[]))
            .add(prefab("c1", "db://assets/common/c.prefab", &[]))
            .add(Asset::new("js", SCRIPT_TYPE).with_files(&[".js"]));
        let pipeline = Pipeline::new(config(&dir), builder.build()).unwrap();

        let mut bundles = pipeline.create_bundles().unwrap();
        pipeline.resolve_dependencies(&mut bundles);

        let main = &bundles[0];
        assert!(main.contains("inner"));
        assert!(main.contains("deep"));
        assert!(!main.is_root("inner"));
        assert!(main.is_redirected("c1"));
        assert!(main.deps().contains("common"));
        assert!(!main.contains("ghost"));
        assert_eq!(main.scripts().collect::<Vec<_>>(), vec!["js"]);
    }

    #[test]
    fn test_run_writes_bundles() {
        let dir = tempdir().unwrap();
        let mut builder = LibraryBuilder::new();
        builder
            .add(prefab("a1", "db://assets/main/a.prefab", &["b1"]))
            .add(prefab("b1", "db://assets/main/b.prefab", &["c1"]))
            .add(prefab("c1", "db://assets/common/c.prefab", &[]))
            .json("a1", json!({ "name": "a" }))
            .json("b1", json!({ "name": "b" }))
            .json("c1", json!({ "name": "c" }));
        let pipeline = Pipeline::new(config(&dir), builder.build()).unwrap();

        let report = pipeline.run().unwrap();

        assert_eq!(report.bundles.len(), 2);
        let main = &report.bundles[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.packs, 1);
        assert_eq!(main.redirects, 1);
        assert_eq!(main.deps, vec!["common"]);
        assert!(main.manifest.as_ref().unwrap().ends_with("main/config.json"));
        assert_eq!(report.textures.tasks, 0);

        let common = &report.bundles[1];
        assert_eq!(common.standalone, 1);
        assert!(dir.path().join("build/common/import/c1/c1.json").exists());
    }

    #[test]
    fn test_run_concatenates_scripts() {
        let dir = tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("a.js"), "var a = 1;").unwrap();
        fs::write(scripts.join("b.js"), "var b = 2;\n").unwrap();

        let mut builder = LibraryBuilder::new();
        builder
            .add(Asset::new("s1", SCRIPT_TYPE).with_url("db://assets/main/a.ts").with_files(&[".js"]))
            .add(Asset::new("s2", SCRIPT_TYPE).with_url("db://assets/main/b.ts").with_files(&[".js"]))
            .native("s1", scripts.join("a.js"))
            .native("s2", scripts.join("b.js"));
        let pipeline = Pipeline::new(config(&dir), builder.build()).unwrap();

        pipeline.run().unwrap();

        let written = fs::read_to_string(dir.path().join("build/main").join(SCRIPT_FILENAME)).unwrap();
        assert_eq!(written, "var a = 1;\nvar b = 2;\n");
    }

    #[test]
    fn test_run_copies_native_files_and_dirs() {
        let dir = tempdir().unwrap();
        let natives = dir.path().join("natives");
        fs::create_dir_all(natives.join("font")).unwrap();
        fs::write(natives.join("clip.mp3"), b"ID3").unwrap();
        fs::write(natives.join("font/glyphs.ttf"), b"ttf").unwrap();

        let mut builder = LibraryBuilder::new();
        builder
            .add(Asset::new("au", "cc.AudioClip").with_url("db://assets/main/clip.mp3").with_files(&[".json", ".mp3"]))
            .add(Asset::new("ft", "cc.TTFFont").with_url("db://assets/main/font.ttf").with_files(&[".json", ".ttf"]))
            .json("au", json!({}))
            .json("ft", json!({}))
            .native("au", natives.join("clip.mp3"))
            .native("ft", natives.join("font"));
        let pipeline = Pipeline::new(config(&dir), builder.build()).unwrap();

        pipeline.run().unwrap();

        let native = dir.path().join("build/main/native");
        assert_eq!(fs::read(native.join("au/au.mp3")).unwrap(), b"ID3");
        assert_eq!(fs::read(native.join("ft/ft/glyphs.ttf")).unwrap(), b"ttf");
    }

    #[test]
    fn test_missing_project_config() {
        let dir = tempdir().unwrap();
        let err = open_project(dir.path()).unwrap_err();
        assert!(matches!(err, BundleError::Config { .. }));
    }
}
