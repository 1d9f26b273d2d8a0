//! Texture codecs.
//!
//! A [`Codec`] turns one source image into one output file. PNG and JPEG
//! are encoded in-process with the `image` crate; the GPU formats and WebP
//! run an external tool through an argument template.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType as PngCompression, FilterType as PngFilter, PngEncoder};
use tracing::debug;

use super::format::{CompressOptions, FormatType};
use super::template::{self, TemplateFields};
use crate::error::{BundleError, Result};
use crate::project::CustomCodec;

/// Everything a codec needs for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct CodecJob<'a> {
    pub uuid: &'a str,
    pub src: &'a Path,
    pub dest: &'a Path,
    pub format: &'a str,
    pub format_type: FormatType,
    pub options: &'a CompressOptions,
}

impl CodecJob<'_> {
    fn fields(&self) -> TemplateFields {
        TemplateFields::new()
            .set("src", self.src.to_string_lossy())
            .set("dest", self.dest.to_string_lossy())
            .set("format", self.format)
            .set("variant", variant(self.format, self.format_type))
            .set("quality", self.options.quality.to_string())
            .set("uuid", self.uuid)
            .set(
                "ext",
                self.dest
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default(),
            )
    }

    fn error(&self, message: impl Into<String>) -> BundleError {
        BundleError::Codec {
            format: self.format.to_string(),
            message: message.into(),
        }
    }
}

/// Tool-specific spelling of a format (`astc_6x6` → `6x6`).
pub fn variant(format: &str, format_type: FormatType) -> String {
    let format = format.to_ascii_lowercase();
    match format_type {
        FormatType::Astc => format.trim_start_matches("astc_").to_string(),
        FormatType::Pvr => {
            let bits = if format.contains("2bits") { "2" } else { "4" };
            let alpha = if format.ends_with("rgb") { "_RGB" } else { "" };
            format!("PVRTC1_{}{}", bits, alpha)
        }
        FormatType::Etc => match format.as_str() {
            "etc1" | "etc1_rgb" => "ETC1".to_string(),
            f if f.ends_with("rgba") => "ETC2_RGBA".to_string(),
            _ => "ETC2_RGB".to_string(),
        },
        _ => format,
    }
}

pub trait Codec: Send + Sync {
    fn name(&self) -> &str;

    /// Write `job.dest` from `job.src`.
    fn compress(&self, job: &CodecJob<'_>) -> Result<()>;
}

/// In-process PNG/JPEG encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterCodec;

impl Codec for RasterCodec {
    fn name(&self) -> &str {
        "raster"
    }

    fn compress(&self, job: &CodecJob<'_>) -> Result<()> {
        let img = image::open(job.src)
            .map_err(|e| job.error(format!("cannot decode {}: {}", job.src.display(), e)))?;
        let file = File::create(job.dest).map_err(|e| BundleError::io(job.dest, e))?;
        let writer = BufWriter::new(file);
        let level = job.options.quality.level();

        let encoded = match job.format_type {
            FormatType::Jpg => {
                let mut encoder = JpegEncoder::new_with_quality(writer, level);
                encoder.encode_image(&img.to_rgb8())
            }
            _ => {
                let compression = if level >= 90 {
                    PngCompression::Best
                } else {
                    PngCompression::Default
                };
                let encoder = PngEncoder::new_with_quality(writer, compression, PngFilter::Adaptive);
                img.write_with_encoder(encoder)
            }
        };
        encoded.map_err(|e| job.error(e.to_string()))
    }
}

/// An external tool driven by an argument template.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandCodec {
    /// Fails when an argument uses an unknown placeholder.
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: &[&str]) -> Result<Self> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        template::validate(&args)?;
        Ok(Self {
            name: name.into(),
            program: program.into(),
            args,
        })
    }

    pub fn from_custom(custom: &CustomCodec) -> Result<Self> {
        template::validate(&custom.args)?;
        Ok(Self {
            name: custom.name.clone(),
            program: custom.program.clone(),
            args: custom.args.clone(),
        })
    }
}

impl Codec for CommandCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn compress(&self, job: &CodecJob<'_>) -> Result<()> {
        let args = template::render(&self.args, &job.fields())?;
        debug!(codec = %self.name, program = %self.program, ?args, "running codec");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| job.error(format!("failed to start {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(job.error(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Codecs by format family, plus named custom codecs.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    builtin: HashMap<FormatType, Arc<dyn Codec>>,
    custom: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// A registry with no codecs.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default codec set.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::empty();
        registry.register(FormatType::Png, RasterCodec);
        registry.register(FormatType::Jpg, RasterCodec);
        registry.register(
            FormatType::Webp,
            CommandCodec::new("cwebp", "cwebp", &["-q", "{quality}", "{src}", "-o", "{dest}"])?,
        );
        registry.register(
            FormatType::Astc,
            CommandCodec::new("astcenc", "astcenc", &["-cl", "{src}", "{dest}", "{variant}", "-{quality}"])?,
        );
        registry.register(
            FormatType::Pvr,
            CommandCodec::new(
                "pvrtextool",
                "PVRTexToolCLI",
                &["-i", "{src}", "-o", "{dest}", "-f", "{variant}", "-q", "pvrtc{quality}"],
            )?,
        );
        registry.register(
            FormatType::Etc,
            CommandCodec::new(
                "pvrtextool-etc",
                "PVRTexToolCLI",
                &["-i", "{src}", "-o", "{dest}", "-f", "{variant}", "-q", "etc{quality}"],
            )?,
        );
        Ok(registry)
    }

    /// Add the project's custom codecs.
    pub fn with_custom_codecs(mut self, codecs: &[CustomCodec]) -> Result<Self> {
        for custom in codecs {
            self.register_custom(custom.name.clone(), CommandCodec::from_custom(custom)?);
        }
        Ok(self)
    }

    pub fn register(&mut self, format_type: FormatType, codec: impl Codec + 'static) {
        self.builtin.insert(format_type, Arc::new(codec));
    }

    pub fn register_custom(&mut self, name: impl Into<String>, codec: impl Codec + 'static) {
        self.custom.insert(name.into(), Arc::new(codec));
    }

    pub fn for_format(&self, format_type: FormatType) -> Option<Arc<dyn Codec>> {
        self.builtin.get(&format_type).cloned()
    }

    pub fn custom(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.custom.get(name).cloned()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builtin: Vec<_> = self.builtin.keys().collect();
        builtin.sort();
        let mut custom: Vec<_> = self.custom.keys().collect();
        custom.sort();
        f.debug_struct("CodecRegistry")
            .field("builtin", &builtin)
            .field("custom", &custom)
            .finish()
    }
}
