//! Texture compression.
//!
//! Image assets with a `compress_preset` are turned into one output per
//! format of the preset's entry for the target platform. The
//! [`TextureCompressor`] schedules the work, reuses cached outputs and
//! reports what each asset produced.

mod cache;
mod codec;
mod format;
pub mod mipmap;
mod scheduler;
mod task;
pub mod template;

pub use cache::{CacheEntry, CacheKey, CompressCache, CACHE_FILENAME};
pub use codec::{variant, Codec, CodecJob, CodecRegistry, CommandCodec, RasterCodec};
pub use format::{CompressOptions, FormatOption, FormatPolicy, FormatTable, FormatType, Quality};
pub use scheduler::{CompressHandler, CompressReport, CompressResult, SchedulerStats, TextureCompressor};
pub use task::CompressTask;
