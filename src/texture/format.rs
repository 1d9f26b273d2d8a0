//! Texture formats, format families and their scheduling policy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A compression family sharing one scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Png,
    Jpg,
    Webp,
    Pvr,
    Etc,
    Astc,
}

impl FormatType {
    /// Map a concrete format name (e.g. `astc_6x6`) to its family.
    ///
    /// Returns `None` for formats no codec is registered for.
    pub fn of(format: &str) -> Option<FormatType> {
        let format = format.to_ascii_lowercase();
        match format.as_str() {
            "png" => Some(FormatType::Png),
            "jpg" | "jpeg" => Some(FormatType::Jpg),
            "webp" => Some(FormatType::Webp),
            f if f.starts_with("pvrtc") => Some(FormatType::Pvr),
            f if f.starts_with("etc") => Some(FormatType::Etc),
            f if f.starts_with("astc") => Some(FormatType::Astc),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FormatType::Png => "png",
            FormatType::Jpg => "jpg",
            FormatType::Webp => "webp",
            FormatType::Pvr => "pvr",
            FormatType::Etc => "etc",
            FormatType::Astc => "astc",
        }
    }

    /// All families, in declaration order.
    pub fn all() -> [FormatType; 6] {
        [
            FormatType::Png,
            FormatType::Jpg,
            FormatType::Webp,
            FormatType::Pvr,
            FormatType::Etc,
            FormatType::Astc,
        ]
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How tasks of one format family may be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPolicy {
    /// Several tasks of this family may run at the same time.
    #[serde(default)]
    pub parallel: bool,
    /// The codec runs as a child process (counted against core count).
    #[serde(default)]
    pub spawns_process: bool,
    /// Extension of produced files, including the dot.
    pub extension: String,
}

impl FormatPolicy {
    fn new(parallel: bool, spawns_process: bool, extension: &str) -> Self {
        Self {
            parallel,
            spawns_process,
            extension: extension.to_string(),
        }
    }

    /// Built-in policy for a family.
    pub fn builtin(format_type: FormatType) -> Self {
        match format_type {
            FormatType::Png => Self::new(true, false, ".png"),
            FormatType::Jpg => Self::new(true, false, ".jpg"),
            FormatType::Webp => Self::new(true, true, ".webp"),
            FormatType::Pvr => Self::new(false, true, ".pvr"),
            FormatType::Etc => Self::new(false, true, ".pkm"),
            FormatType::Astc => Self::new(true, true, ".astc"),
        }
    }
}

/// Policies for every family, built-ins overridden by project config.
#[derive(Debug, Clone)]
pub struct FormatTable {
    policies: BTreeMap<FormatType, FormatPolicy>,
}

impl Default for FormatTable {
    fn default() -> Self {
        Self {
            policies: FormatType::all()
                .into_iter()
                .map(|t| (t, FormatPolicy::builtin(t)))
                .collect(),
        }
    }
}

impl FormatTable {
    /// Built-in table with `overrides` applied on top.
    pub fn with_overrides(overrides: &BTreeMap<FormatType, FormatPolicy>) -> Self {
        let mut table = Self::default();
        for (format_type, policy) in overrides {
            table.policies.insert(*format_type, policy.clone());
        }
        table
    }

    pub fn policy(&self, format_type: FormatType) -> &FormatPolicy {
        // every family is seeded in Default
        &self.policies[&format_type]
    }

    pub fn set(&mut self, format_type: FormatType, policy: FormatPolicy) {
        self.policies.insert(format_type, policy);
    }
}

/// Compression quality: a numeric level or a codec-specific preset name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quality {
    Level(u32),
    Preset(String),
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Level(80)
    }
}

impl Quality {
    /// Maximal quality allows a byte copy instead of re-encoding.
    pub fn is_max(&self) -> bool {
        matches!(self, Quality::Level(q) if *q >= 100)
    }

    /// Numeric level clamped to `1..=100` (presets map to a fixed level).
    pub fn level(&self) -> u8 {
        match self {
            Quality::Level(q) => (*q).clamp(1, 100) as u8,
            Quality::Preset(name) => match name.as_str() {
                "fast" | "veryfast" | "low" => 50,
                "medium" | "normal" => 80,
                _ => 95,
            },
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Level(q) => write!(f, "{}", q),
            Quality::Preset(p) => write!(f, "{}", p),
        }
    }
}

/// Options handed to a codec for one format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressOptions {
    #[serde(default)]
    pub quality: Quality,
    /// Codec-specific extras, compared verbatim for cache invalidation.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CompressOptions {
    pub fn with_quality(quality: Quality) -> Self {
        Self {
            quality,
            extra: BTreeMap::new(),
        }
    }
}

/// One entry of a texture preset: a target format and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatOption {
    pub format: String,
    #[serde(flatten)]
    pub options: CompressOptions,
}
