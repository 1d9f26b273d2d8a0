//! Concurrent texture compression.
//!
//! [`TextureCompressor::run`] takes every texture task of a build, lets the
//! registered [`CompressHandler`]s take over what they can, drops assets
//! whose cached outputs are still valid and runs the rest on worker
//! threads. A task starts only when
//!
//! - fewer tasks than the worker limit are running,
//! - no other task of the same asset is running,
//! - its format family allows parallel runs or has none in flight, and
//! - when its codec spawns a process, fewer processes than the process
//!   limit are live.
//!
//! Both limits default to the number of cores.
//!
//! Each completion pulls the next eligible task from the queue. Failures
//! are logged and free their slot; success is decided after the pass by
//! checking that the output file exists.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::Scope;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::{CacheEntry, CacheKey, CompressCache, CACHE_FILENAME};
use super::codec::{Codec, CodecJob, CodecRegistry, CommandCodec};
use super::format::{FormatTable, FormatType};
use super::mipmap;
use super::task::{ext_of, CompressTask};
use crate::error::{BundleError, Result};
use crate::library::shard;
use crate::project::CustomCodec;

/// Takes over tasks before the built-in pass.
///
/// Handlers run in registration order; each removes the tasks it handled
/// from the list. Their outputs are checked like any other task's. A
/// handler that errors or panics is skipped and the built-in pass gets
/// the tasks it was given.
pub trait CompressHandler: Send {
    fn name(&self) -> &str;
    fn handle(&mut self, tasks: &mut Vec<CompressTask>) -> Result<()>;
}

/// Outputs of one asset, in task order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressResult {
    pub dest: Vec<PathBuf>,
    pub suffix: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Most assets being compressed at once, which is also the most
    /// tasks running at once.
    pub max_busy_assets: usize,
    /// Most tasks of one family in flight at once.
    pub max_in_flight: BTreeMap<FormatType, usize>,
    /// Most live codec processes at once.
    pub max_processes: usize,
    pub codec_invocations: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct CompressReport {
    pub results: IndexMap<String, CompressResult>,
    /// Assets served from the cache.
    pub cached: Vec<String>,
    /// Assets recompressed in this run.
    pub compressed: Vec<String>,
    /// `uuid:format` of tasks without output.
    pub failed: Vec<String>,
    pub stats: SchedulerStats,
}

pub struct TextureCompressor {
    cache_path: PathBuf,
    work_dir: PathBuf,
    codecs: CodecRegistry,
    formats: FormatTable,
    handlers: Vec<Box<dyn CompressHandler>>,
    use_cache: bool,
    limits: Limits,
}

/// Concurrency caps of one run.
#[derive(Debug, Clone, Copy)]
struct Limits {
    /// Tasks running at once, in-process codecs included.
    workers: usize,
    /// Live codec processes.
    processes: usize,
}

impl TextureCompressor {
    /// A compressor keeping its cache and intermediates under `temp_dir`.
    pub fn new(temp_dir: &Path, codecs: CodecRegistry, formats: FormatTable) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            cache_path: temp_dir.join(CACHE_FILENAME),
            work_dir: temp_dir.join("texture-work"),
            codecs,
            formats,
            handlers: vec![],
            use_cache: true,
            limits: Limits {
                workers: cores,
                processes: cores,
            },
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_max_processes(mut self, max: usize) -> Self {
        self.limits.processes = max.max(1);
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.limits.workers = max.max(1);
        self
    }

    pub fn with_handler(mut self, handler: impl CompressHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Compress every task. Asset-level failures are logged and reported,
    /// never returned.
    pub fn run(&mut self, tasks: Vec<CompressTask>) -> Result<CompressReport> {
        let mut cache = if self.use_cache {
            CompressCache::load(&self.cache_path)
        } else {
            CompressCache::new(&self.cache_path)
        };
        let all = tasks.clone();
        let mut report = CompressReport::default();

        let mut tasks = tasks;
        for handler in &mut self.handlers {
            let given = tasks.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut tasks))) {
                Ok(Ok(())) => debug!(
                    handler = handler.name(),
                    taken = given.len().saturating_sub(tasks.len()),
                    "compress handler done"
                ),
                Ok(Err(e)) => {
                    warn!(handler = handler.name(), "compress handler failed, using built-in codecs: {}", e);
                    tasks = given;
                }
                Err(_) => {
                    warn!(handler = handler.name(), "compress handler panicked, using built-in codecs");
                    tasks = given;
                }
            }
        }

        let mut by_uuid: IndexMap<String, Vec<CompressTask>> = IndexMap::new();
        for task in tasks {
            by_uuid.entry(task.uuid.clone()).or_default().push(task);
        }

        let mut keys: IndexMap<String, (CacheKey, usize)> = IndexMap::new();
        let mut waiting: VecDeque<CompressTask> = VecDeque::new();
        for (uuid, mut group) in by_uuid {
            let options = group
                .iter()
                .map(|t| (t.format.clone(), t.options.clone()))
                .collect();
            let mut customs: Vec<CustomCodec> = Vec::new();
            for custom in group.iter().filter_map(|t| t.custom_codec.as_ref()) {
                if !customs.contains(custom) {
                    customs.push(custom.clone());
                }
            }
            let key = CacheKey::for_source(&group[0].src, options)
                .with_mipmaps(group.iter().any(|t| t.mipmaps))
                .with_custom_codecs(customs);
            if self.use_cache && !cache.is_dirty(&uuid, &key) {
                debug!(uuid, "texture cache hit");
                report.cached.push(uuid);
                continue;
            }

            if group.iter().any(|t| t.mipmaps) {
                let mip_dir = self.work_dir.join(shard(&uuid)).join(&uuid).join("mips");
                match mipmap::generate_levels(&group[0].src, &mip_dir) {
                    Ok(levels) => {
                        for task in group.iter_mut().filter(|t| t.mipmaps) {
                            task.mipmap_files = levels.clone();
                        }
                    }
                    Err(e) => warn!(uuid, "skipping mipmaps: {}", e),
                }
            }

            keys.insert(uuid, (key, group.len()));
            waiting.extend(group);
        }

        let runner = Runner {
            codecs: &self.codecs,
            work_dir: &self.work_dir,
            invocations: AtomicUsize::new(0),
        };
        let mut finished = Vec::new();
        let mut stats = SchedulerStats::default();
        let limits = self.limits;
        let formats = &self.formats;

        std::thread::scope(|scope| {
            let (tx, rx) = crossbeam_channel::unbounded();
            let mut slots = Slots::default();
            let mut in_flight = 0usize;

            while let Some(task) = slots.take_eligible(&mut waiting, formats, limits) {
                slots.acquire(&task, formats);
                slots.observe(&mut stats);
                spawn_task(scope, &runner, task, tx.clone());
                in_flight += 1;
            }

            while in_flight > 0 {
                let (task, outcome): (CompressTask, Result<()>) = match rx.recv() {
                    Ok(done) => done,
                    Err(_) => break,
                };
                in_flight -= 1;
                slots.release(&task, formats);
                if let Err(e) = outcome {
                    warn!(task = %task.label(), "texture compression failed: {}", e);
                }
                finished.push(task);

                while let Some(next) = slots.take_eligible(&mut waiting, formats, limits) {
                    slots.acquire(&next, formats);
                    slots.observe(&mut stats);
                    spawn_task(scope, &runner, next, tx.clone());
                    in_flight += 1;
                }
            }
        });

        for task in waiting {
            warn!(task = %task.label(), "texture task never became eligible");
        }

        for (uuid, (key, expected)) in keys {
            let own: Vec<&CompressTask> = finished.iter().filter(|t| t.uuid == uuid).collect();
            let complete = own.len() == expected && own.iter().all(|t| t.dest.exists());

            if complete {
                let entry = CacheEntry {
                    option: key,
                    mipmap_files: own.first().map(|t| t.mipmap_files.clone()).unwrap_or_default(),
                    dest: own.iter().map(|t| t.dest.clone()).collect(),
                    suffix: own.iter().map(|t| t.suffix.clone()).collect(),
                };
                cache.insert(uuid.clone(), entry);
            } else {
                cache.remove(&uuid);
            }
            report.compressed.push(uuid);
        }

        if self.use_cache {
            if let Err(e) = cache.flush() {
                warn!("failed to write texture cache: {}", e);
            }
        }

        for task in &all {
            if task.dest.exists() {
                let result = report.results.entry(task.uuid.clone()).or_default();
                // Natives are named `<uuid><suffix>`, so one output per extension.
                if result.suffix.contains(&task.suffix) {
                    warn!(task = %task.label(), suffix = %task.suffix, "extension already produced by another format, dropping");
                    continue;
                }
                result.dest.push(task.dest.clone());
                result.suffix.push(task.suffix.clone());
            } else {
                report.failed.push(task.label());
            }
        }

        stats.codec_invocations = runner.invocations.load(Ordering::SeqCst);
        report.stats = stats;
        info!(
            compressed = report.compressed.len(),
            cached = report.cached.len(),
            failed = report.failed.len(),
            "texture compression done"
        );
        Ok(report)
    }
}

/// What is currently running.
#[derive(Debug, Default)]
struct Slots {
    running: usize,
    assets: HashSet<String>,
    per_type: HashMap<FormatType, usize>,
    processes: usize,
}

impl Slots {
    fn eligible(&self, task: &CompressTask, formats: &FormatTable, limits: Limits) -> bool {
        let policy = formats.policy(task.format_type);
        let family = self.per_type.get(&task.format_type).copied().unwrap_or(0);

        self.running < limits.workers
            && !self.assets.contains(&task.uuid)
            && (policy.parallel || family == 0)
            && (!policy.spawns_process || self.processes < limits.processes)
    }

    fn take_eligible(
        &self,
        waiting: &mut VecDeque<CompressTask>,
        formats: &FormatTable,
        limits: Limits,
    ) -> Option<CompressTask> {
        if self.running >= limits.workers {
            return None;
        }
        let pos = waiting.iter().position(|t| self.eligible(t, formats, limits))?;
        waiting.remove(pos)
    }

    fn acquire(&mut self, task: &CompressTask, formats: &FormatTable) {
        self.running += 1;
        self.assets.insert(task.uuid.clone());
        *self.per_type.entry(task.format_type).or_insert(0) += 1;
        if formats.policy(task.format_type).spawns_process {
            self.processes += 1;
        }
    }

    fn release(&mut self, task: &CompressTask, formats: &FormatTable) {
        self.running = self.running.saturating_sub(1);
        self.assets.remove(&task.uuid);
        if let Some(n) = self.per_type.get_mut(&task.format_type) {
            *n = n.saturating_sub(1);
        }
        if formats.policy(task.format_type).spawns_process {
            self.processes = self.processes.saturating_sub(1);
        }
    }

    fn observe(&self, stats: &mut SchedulerStats) {
        stats.max_busy_assets = stats.max_busy_assets.max(self.assets.len());
        stats.max_processes = stats.max_processes.max(self.processes);
        for (format_type, &n) in &self.per_type {
            let max = stats.max_in_flight.entry(*format_type).or_insert(0);
            *max = (*max).max(n);
        }
    }
}

struct Runner<'a> {
    codecs: &'a CodecRegistry,
    work_dir: &'a Path,
    invocations: AtomicUsize,
}

fn spawn_task<'scope>(
    scope: &'scope Scope<'scope, '_>,
    runner: &'scope Runner<'_>,
    task: CompressTask,
    tx: Sender<(CompressTask, Result<()>)>,
) {
    scope.spawn(move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| runner.execute(&task))) {
            Ok(outcome) => outcome,
            Err(_) => Err(BundleError::Codec {
                format: task.format.clone(),
                message: "codec panicked".to_string(),
            }),
        };
        let _ = tx.send((task, outcome));
    });
}

impl Runner<'_> {
    fn execute(&self, task: &CompressTask) -> Result<()> {
        let dest = &task.dest;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
        }
        if dest.exists() {
            fs::remove_file(dest).map_err(|e| BundleError::io(dest, e))?;
        }

        let src_ext = task.src_ext();
        if task.options.quality.is_max() && src_ext == task.suffix {
            fs::copy(&task.src, dest).map_err(|e| BundleError::io(dest, e))?;
            return Ok(());
        }

        let input = if src_ext == ".webp" && task.format_type != FormatType::Webp {
            self.decode_webp(task)?
        } else {
            task.src.clone()
        };

        let codec = self.compress_with_fallback(task, &input, dest)?;

        if !task.mipmap_files.is_empty() {
            let mut levels = Vec::with_capacity(task.mipmap_files.len());
            for (i, level_src) in task.mipmap_files.iter().enumerate() {
                let level_dest =
                    dest.with_file_name(format!("{}.mip{}{}", task.format, i + 1, task.suffix));
                self.invoke(codec.as_ref(), task, level_src, &level_dest)?;
                levels.push(level_dest);
            }
            mipmap::append_levels(dest, &levels)?;
            for level in &levels {
                let _ = fs::remove_file(level);
            }
            return Ok(());
        }

        if src_ext == ext_of(dest) && file_len(dest) > file_len(&task.src) {
            debug!(task = %task.label(), "output larger than source, keeping source");
            fs::copy(&task.src, dest).map_err(|e| BundleError::io(dest, e))?;
        }
        Ok(())
    }

    /// Custom codec first when configured, built-in codec otherwise.
    fn compress_with_fallback(
        &self,
        task: &CompressTask,
        input: &Path,
        dest: &Path,
    ) -> Result<Arc<dyn Codec>> {
        if let Some(custom) = &task.custom_codec {
            let codec = match self.codecs.custom(&custom.name) {
                Some(codec) => Some(codec),
                None => CommandCodec::from_custom(custom)
                    .map(|c| Arc::new(c) as Arc<dyn Codec>)
                    .map_err(|e| warn!(codec = %custom.name, "invalid custom codec: {}", e))
                    .ok(),
            };
            if let Some(codec) = codec {
                match self.invoke(codec.as_ref(), task, input, dest) {
                    Ok(()) => return Ok(codec),
                    Err(e) => warn!(
                        task = %task.label(),
                        codec = %custom.name,
                        "custom codec failed, falling back to built-in: {}",
                        e
                    ),
                }
            }
        }

        let codec = self
            .codecs
            .for_format(task.format_type)
            .ok_or_else(|| BundleError::Codec {
                format: task.format.clone(),
                message: format!("no codec registered for {}", task.format_type),
            })?;
        self.invoke(codec.as_ref(), task, input, dest)?;
        Ok(codec)
    }

    fn invoke(&self, codec: &dyn Codec, task: &CompressTask, src: &Path, dest: &Path) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        codec.compress(&CodecJob {
            uuid: &task.uuid,
            src,
            dest,
            format: &task.format,
            format_type: task.format_type,
            options: &task.options,
        })?;
        if !dest.exists() {
            return Err(BundleError::Codec {
                format: task.format.clone(),
                message: format!("{} produced no output", codec.name()),
            });
        }
        Ok(())
    }

    fn decode_webp(&self, task: &CompressTask) -> Result<PathBuf> {
        let dir = self.work_dir.join(shard(&task.uuid)).join(&task.uuid);
        fs::create_dir_all(&dir).map_err(|e| BundleError::io(&dir, e))?;
        let out = dir.join(format!("{}.source.png", task.format));
        let img = image::open(&task.src).map_err(|e| BundleError::Codec {
            format: task.format.clone(),
            message: format!("cannot decode webp source: {}", e),
        })?;
        img.save(&out).map_err(|e| BundleError::io(&out, e))?;
        Ok(out)
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::CustomCodec;
    use crate::texture::{CompressOptions, FormatOption, Quality};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Records how many invocations overlap, overall and per asset.
    #[derive(Default)]
    struct Probe {
        per_asset: Mutex<HashMap<String, usize>>,
        max_per_asset: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl Probe {
        fn enter(&self, uuid: &str) {
            let mut per_asset = self.per_asset.lock().unwrap();
            let n = per_asset.entry(uuid.to_string()).or_insert(0);
            *n += 1;
            self.max_per_asset.fetch_max(*n, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
        }

        fn leave(&self, uuid: &str) {
            let mut per_asset = self.per_asset.lock().unwrap();
            if let Some(n) = per_asset.get_mut(uuid) {
                *n -= 1;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Writes half of the source (or the source plus padding when `grow`).
    struct FakeCodec {
        assets: Arc<Probe>,
        family: Arc<Probe>,
        fail: bool,
        grow: bool,
    }

    impl FakeCodec {
        fn new(assets: &Arc<Probe>) -> Self {
            Self {
                assets: assets.clone(),
                family: Arc::new(Probe::default()),
                fail: false,
                grow: false,
            }
        }
    }

    impl Codec for FakeCodec {
        fn name(&self) -> &str {
            "fake"
        }

        fn compress(&self, job: &CodecJob<'_>) -> Result<()> {
            self.assets.enter(job.uuid);
            self.family.enter(job.uuid);
            thread::sleep(Duration::from_millis(5));

            let result = if self.fail {
                Err(BundleError::Codec {
                    format: job.format.to_string(),
                    message: "boom".to_string(),
                })
            } else {
                let mut bytes = fs::read(job.src).unwrap();
                if self.grow {
                    bytes.extend_from_slice(&[0u8; 64]);
                } else {
                    bytes.truncate((bytes.len() / 2).max(1));
                }
                fs::write(job.dest, bytes).map_err(|e| BundleError::io(job.dest, e))
            };

            self.family.leave(job.uuid);
            self.assets.leave(job.uuid);
            result
        }
    }

    fn registry(assets: &Arc<Probe>) -> CodecRegistry {
        let mut codecs = CodecRegistry::empty();
        for format_type in FormatType::all() {
            codecs.register(format_type, FakeCodec::new(assets));
        }
        codecs
    }

    fn tasks(dir: &TempDir, uuids: &[&str], formats: &[&str], quality: u32) -> Vec<CompressTask> {
        let src_dir = dir.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        let mut tasks = Vec::new();
        for uuid in uuids {
            let src = src_dir.join(format!("{}.png", uuid));
            if !src.exists() {
                fs::write(&src, format!("source bytes for {} with some padding", uuid)).unwrap();
            }
            for format in formats {
                let option = FormatOption {
                    format: format.to_string(),
                    options: CompressOptions::with_quality(Quality::Level(quality)),
                };
                tasks.push(
                    CompressTask::new(uuid, &src, &dir.path().join("out"), &option, &FormatTable::default())
                        .unwrap(),
                );
            }
        }
        tasks
    }

    fn compressor(dir: &TempDir, codecs: CodecRegistry) -> TextureCompressor {
        TextureCompressor::new(&dir.path().join("temp"), codecs, FormatTable::default())
    }

    #[test]
    fn test_rerun_hits_cache() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let work = tasks(&dir, &["a", "b"], &["png", "astc_4x4"], 80);

        let first = compressor(&dir, registry(&probe)).run(work.clone()).unwrap();
        assert_eq!(first.stats.codec_invocations, 4);
        assert_eq!(first.compressed, vec!["a", "b"]);

        let second = compressor(&dir, registry(&probe)).run(work).unwrap();
        assert_eq!(second.stats.codec_invocations, 0);
        assert_eq!(second.cached, vec!["a", "b"]);
        assert_eq!(second.results["a"].suffix, vec![".png", ".astc"]);
        assert!(second.failed.is_empty());
    }

    #[test]
    fn test_quality_change_invalidates_only_that_asset() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let mut work = tasks(&dir, &["a", "b"], &["png", "astc_4x4"], 80);
        compressor(&dir, registry(&probe)).run(work.clone()).unwrap();

        for task in work.iter_mut().filter(|t| t.uuid == "b") {
            task.options.quality = Quality::Level(60);
        }
        let second = compressor(&dir, registry(&probe)).run(work).unwrap();

        assert_eq!(second.compressed, vec!["b"]);
        assert_eq!(second.cached, vec!["a"]);
        assert_eq!(second.stats.codec_invocations, 2);
    }

    #[test]
    fn test_cache_disabled_recompresses() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let work = tasks(&dir, &["a"], &["png"], 80);
        compressor(&dir, registry(&probe)).run(work.clone()).unwrap();

        let second = compressor(&dir, registry(&probe))
            .with_cache(false)
            .run(work)
            .unwrap();
        assert_eq!(second.stats.codec_invocations, 1);
    }

    #[test]
    fn test_one_task_per_asset_and_serial_families() {
        let dir = tempdir().unwrap();
        let assets = Arc::new(Probe::default());
        let pvr = FakeCodec::new(&assets);
        let pvr_family = pvr.family.clone();
        let mut codecs = registry(&assets);
        codecs.register(FormatType::Pvr, pvr);

        let work = tasks(
            &dir,
            &["a", "b", "c", "d"],
            &["pvrtc_4bits_rgba", "astc_4x4", "png"],
            80,
        );
        let report = compressor(&dir, codecs)
            .with_max_processes(8)
            .run(work)
            .unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(assets.max_per_asset.load(Ordering::SeqCst), 1);
        assert_eq!(pvr_family.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(report.stats.max_in_flight[&FormatType::Pvr], 1);
        assert!(report.stats.max_busy_assets <= 4);
        assert_eq!(report.stats.codec_invocations, 12);
    }

    #[test]
    fn test_process_limit() {
        let dir = tempdir().unwrap();
        let assets = Arc::new(Probe::default());
        let work = tasks(&dir, &["a", "b", "c", "d", "e", "f"], &["astc_4x4"], 80);

        let report = compressor(&dir, registry(&assets))
            .with_max_processes(2)
            .run(work)
            .unwrap();

        assert!(report.stats.max_processes <= 2);
        assert!(assets.max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(report.results.len(), 6);
    }

    #[test]
    fn test_oversize_output_keeps_source() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let mut codecs = registry(&probe);
        let mut grow = FakeCodec::new(&probe);
        grow.grow = true;
        codecs.register(FormatType::Png, grow);

        let work = tasks(&dir, &["a"], &["png"], 80);
        let report = compressor(&dir, codecs).run(work.clone()).unwrap();

        assert_eq!(
            fs::read(&report.results["a"].dest[0]).unwrap(),
            fs::read(&work[0].src).unwrap()
        );
    }

    #[test]
    fn test_max_quality_copies_source() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let work = tasks(&dir, &["a"], &["png"], 100);

        let report = compressor(&dir, registry(&probe)).run(work.clone()).unwrap();

        assert_eq!(report.stats.codec_invocations, 0);
        assert_eq!(fs::read(&work[0].dest).unwrap(), fs::read(&work[0].src).unwrap());
    }

    #[test]
    fn test_custom_codec_falls_back_to_builtin() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let mut codecs = registry(&probe);
        let mut broken = FakeCodec::new(&probe);
        broken.fail = true;
        codecs.register_custom("broken", broken);

        let custom = CustomCodec {
            name: "broken".to_string(),
            program: "unused".to_string(),
            args: vec![],
        };
        let work: Vec<CompressTask> = tasks(&dir, &["a"], &["astc_4x4"], 80)
            .into_iter()
            .map(|t| t.with_custom_codec(Some(custom.clone())))
            .collect();
        let report = compressor(&dir, codecs).run(work).unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.stats.codec_invocations, 2);
    }

    #[test]
    fn test_failed_task_reported_and_not_cached() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let failing = || {
            let mut codecs = registry(&probe);
            let mut broken = FakeCodec::new(&probe);
            broken.fail = true;
            codecs.register(FormatType::Astc, broken);
            codecs
        };
        let work = tasks(&dir, &["a"], &["png", "astc_4x4"], 80);

        let report = compressor(&dir, failing()).run(work.clone()).unwrap();
        assert_eq!(report.failed, vec!["a:astc_4x4"]);
        assert_eq!(report.results["a"].suffix, vec![".png"]);

        let again = compressor(&dir, failing()).run(work).unwrap();
        assert_eq!(again.compressed, vec!["a"]);
        assert_eq!(again.stats.codec_invocations, 2);
    }

    struct TakePng;

    impl CompressHandler for TakePng {
        fn name(&self) -> &str {
            "take-png"
        }

        fn handle(&mut self, tasks: &mut Vec<CompressTask>) -> Result<()> {
            for task in tasks.iter().filter(|t| t.format_type == FormatType::Png) {
                fs::create_dir_all(task.dest.parent().unwrap()).unwrap();
                fs::write(&task.dest, b"handled").unwrap();
            }
            tasks.retain(|t| t.format_type != FormatType::Png);
            Ok(())
        }
    }

    #[test]
    fn test_handler_takes_tasks() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let work = tasks(&dir, &["a"], &["png", "astc_4x4"], 80);

        let report = compressor(&dir, registry(&probe))
            .with_handler(TakePng)
            .run(work)
            .unwrap();

        assert_eq!(report.stats.codec_invocations, 1);
        assert_eq!(report.results["a"].dest.len(), 2);
        assert_eq!(fs::read(&report.results["a"].dest[0]).unwrap(), b"handled");
    }

    #[test]
    fn test_mipmaps_appended_to_output() {
        use image::{Rgba, RgbaImage};

        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let src = dir.path().join("a.png");
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]))
            .save(&src)
            .unwrap();

        let option = FormatOption {
            format: "astc_4x4".to_string(),
            options: CompressOptions::default(),
        };
        let task = CompressTask::new("a", &src, &dir.path().join("out"), &option, &FormatTable::default())
            .unwrap()
            .with_mipmaps(true);

        let report = compressor(&dir, registry(&probe)).run(vec![task]).unwrap();

        assert_eq!(report.stats.codec_invocations, 3);
        let packed = fs::read(&report.results["a"].dest[0]).unwrap();
        assert_eq!(mipmap::split_levels(&packed).unwrap().len(), 3);
    }

    struct Broken {
        panic: bool,
    }

    impl CompressHandler for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn handle(&mut self, tasks: &mut Vec<CompressTask>) -> Result<()> {
            tasks.clear();
            if self.panic {
                panic!("handler bug");
            }
            Err(BundleError::Build {
                message: "handler broke".to_string(),
                help: None,
            })
        }
    }

    #[test]
    fn test_failing_handler_leaves_tasks_to_builtin_codecs() {
        for panic in [false, true] {
            let dir = tempdir().unwrap();
            let probe = Arc::new(Probe::default());
            let work = tasks(&dir, &["a", "b", "c"], &["png"], 80);

            let report = compressor(&dir, registry(&probe))
                .with_handler(Broken { panic })
                .run(work)
                .unwrap();

            assert_eq!(report.results.len(), 3);
            assert!(report.failed.is_empty());
            assert_eq!(report.stats.codec_invocations, 3);
        }
    }

    #[test]
    fn test_worker_limit_caps_in_process_codecs() {
        let dir = tempdir().unwrap();
        let assets = Arc::new(Probe::default());
        let names: Vec<String> = (0..24).map(|i| format!("t{}", i)).collect();
        let uuids: Vec<&str> = names.iter().map(String::as_str).collect();
        let work = tasks(&dir, &uuids, &["png"], 80);

        let report = compressor(&dir, registry(&assets))
            .with_max_workers(3)
            .with_max_processes(2)
            .run(work)
            .unwrap();

        assert_eq!(report.results.len(), 24);
        assert!(report.stats.max_busy_assets <= 3);
        assert!(assets.max_running.load(Ordering::SeqCst) <= 3);
        assert_eq!(report.stats.max_processes, 0);
    }

    #[test]
    fn test_enabling_mipmaps_recompresses() {
        use image::{Rgba, RgbaImage};

        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let src = dir.path().join("a.png");
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]))
            .save(&src)
            .unwrap();
        let option = FormatOption {
            format: "astc_4x4".to_string(),
            options: CompressOptions::default(),
        };
        let task = CompressTask::new("a", &src, &dir.path().join("out"), &option, &FormatTable::default()).unwrap();

        compressor(&dir, registry(&probe)).run(vec![task.clone()]).unwrap();
        let report = compressor(&dir, registry(&probe))
            .run(vec![task.with_mipmaps(true)])
            .unwrap();

        assert_eq!(report.compressed, vec!["a"]);
        assert!(report.cached.is_empty());
        assert_eq!(report.stats.codec_invocations, 3);
        let packed = fs::read(&report.results["a"].dest[0]).unwrap();
        assert_eq!(mipmap::split_levels(&packed).unwrap().len(), 3);
    }

    #[test]
    fn test_custom_codec_change_recompresses() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let codecs = || {
            let mut codecs = registry(&probe);
            codecs.register_custom("quant", FakeCodec::new(&probe));
            codecs
        };
        let work = tasks(&dir, &["a", "b"], &["png"], 80);
        compressor(&dir, codecs()).run(work.clone()).unwrap();

        let custom = CustomCodec {
            name: "quant".to_string(),
            program: "pngquant".to_string(),
            args: vec![],
        };
        let work: Vec<CompressTask> = work
            .into_iter()
            .map(|t| {
                let codec = (t.uuid == "b").then(|| custom.clone());
                t.with_custom_codec(codec)
            })
            .collect();
        let report = compressor(&dir, codecs()).run(work).unwrap();

        assert_eq!(report.compressed, vec!["b"]);
        assert_eq!(report.cached, vec!["a"]);
        assert_eq!(report.stats.codec_invocations, 1);
    }

    #[test]
    fn test_formats_sharing_an_extension_keep_the_first() {
        let dir = tempdir().unwrap();
        let probe = Arc::new(Probe::default());
        let work = tasks(&dir, &["a"], &["etc1_rgb", "etc2_rgba"], 80);

        let report = compressor(&dir, registry(&probe)).run(work).unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.results["a"].suffix, vec![".pkm"]);
        assert!(report.results["a"].dest[0].ends_with("etc1_rgb.pkm"));
    }
}
