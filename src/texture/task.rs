//! Texture compression tasks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::format::{CompressOptions, FormatOption, FormatTable, FormatType};
use crate::library::shard;
use crate::project::CustomCodec;

/// One (asset, format) unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressTask {
    pub uuid: String,
    pub src: PathBuf,
    pub dest: PathBuf,
    /// Concrete format name, e.g. `astc_6x6`.
    pub format: String,
    pub format_type: FormatType,
    pub options: CompressOptions,
    /// Tried before the built-in codec when set.
    pub custom_codec: Option<CustomCodec>,
    /// Build and compress a mip chain.
    pub mipmaps: bool,
    /// Downscaled sources, one per mip level below the base.
    #[serde(default)]
    pub mipmap_files: Vec<PathBuf>,
    /// Extension of `dest`, including the dot.
    pub suffix: String,
}

impl CompressTask {
    /// Build the task for one preset entry.
    ///
    /// Outputs go to `<out_dir>/<shard>/<uuid>/<format><ext>`. Returns `None`
    /// (with a warning) when no codec family matches the format.
    pub fn new(
        uuid: &str,
        src: &Path,
        out_dir: &Path,
        option: &FormatOption,
        formats: &FormatTable,
    ) -> Option<Self> {
        let format_type = match FormatType::of(&option.format) {
            Some(t) => t,
            None => {
                warn!(uuid, format = %option.format, "no codec for texture format, skipping");
                return None;
            }
        };
        let suffix = formats.policy(format_type).extension.clone();
        let dest = out_dir
            .join(shard(uuid))
            .join(uuid)
            .join(format!("{}{}", option.format, suffix));

        Some(Self {
            uuid: uuid.to_string(),
            src: src.to_path_buf(),
            dest,
            format: option.format.clone(),
            format_type,
            options: option.options.clone(),
            custom_codec: None,
            mipmaps: false,
            mipmap_files: vec![],
            suffix,
        })
    }

    pub fn with_custom_codec(mut self, codec: Option<CustomCodec>) -> Self {
        self.custom_codec = codec;
        self
    }

    pub fn with_mipmaps(mut self, mipmaps: bool) -> Self {
        self.mipmaps = mipmaps;
        self
    }

    /// Lowercase extension of the source, including the dot.
    pub fn src_ext(&self) -> String {
        ext_of(&self.src)
    }

    /// `format` tag used in logs: `uuid:format`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.uuid, self.format)
    }
}

/// Lowercase extension of a path, including the dot (empty when none).
pub(crate) fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}
