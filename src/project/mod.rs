//! Project configuration store.
//!
//! Everything the pipeline needs to know about a project lives in a
//! `bundlekit.yaml` at the project root: where the asset library is, which
//! bundles to produce, per-platform texture presets and codec settings.
//!
//! # Example
//!
//! ```yaml
//! library: library
//! output: build
//! platform: web-mobile
//! md5_cache: true
//! bundles:
//!   - name: main
//!     root: db://assets/main
//!     compression: merge_dep
//! texture_presets:
//!   default:
//!     web-mobile:
//!       - format: webp
//!         quality: 80
//! ```

mod config;

pub use config::{BundleOptions, CompressionType, CustomCodec, ProjectConfig, TexturePreset};

/// The name of the project configuration file.
pub const CONFIG_FILENAME: &str = "bundlekit.yaml";
