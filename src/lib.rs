//! bundlekit - asset bundle builder
//!
//! Packs a content-addressed asset library into deployable bundles: assets
//! are split across bundles, their serialized JSON merged into pack files,
//! textures compressed into several codec variants with an incremental
//! cache, and each bundle gets a compacted manifest.

pub mod bundle;
pub mod cli;
pub mod codec;
pub mod error;
pub mod group;
pub mod library;
pub mod output;
pub mod pipeline;
pub mod project;
pub mod texture;
pub mod validation;

pub use bundle::{AssetRef, Bundle, Compact, Manifest, Raw};
pub use error::{BundleError, Result};
pub use group::{select_groups, write_json, Group, GroupType};
pub use library::{Asset, Library, LibraryBuilder};
pub use pipeline::{open_project, BuildReport, Pipeline};
pub use project::{BundleOptions, CompressionType, ProjectConfig};
pub use texture::{CodecRegistry, CompressTask, TextureCompressor};
pub use validation::{validate_project, Diagnostic, Severity, ValidationResult};
