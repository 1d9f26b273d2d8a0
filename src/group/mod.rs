//! JSON grouping.
//!
//! [`select_groups`] decides how a bundle's serialized assets are split into
//! packs; [`write_json`] writes the packs and every remaining asset as a
//! standalone file and registers each written file with the bundle.

mod output;
mod select;

use std::fmt;

use serde::Serialize;

pub use output::{write_json, JsonOutput};
pub use select::select_groups;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    /// Concatenated serialized assets.
    Normal,
    /// `{base, mipmaps}` of Texture2D assets.
    Texture,
    /// Atlas-produced image assets.
    Image,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupType::Normal => "normal",
            GroupType::Texture => "texture",
            GroupType::Image => "image",
        };
        write!(f, "{}", name)
    }
}

/// Assets written together into one pack file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub kind: GroupType,
    pub uuids: Vec<String>,
    /// Pack file name, empty until the group is written.
    pub name: String,
}

impl Group {
    pub fn new(kind: GroupType, uuids: Vec<String>) -> Self {
        Self {
            kind,
            uuids,
            name: String::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
