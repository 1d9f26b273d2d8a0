//! Mip chain generation and packing.
//!
//! Levels below the base are produced by halving the source until 1×1.
//! Compressed levels are appended to the base output followed by a trailer:
//!
//! ```text
//! base | level 1 | ... | level n | len(base) .. len(level n) (u32 LE) | n+1 (u32 LE) | "MIPS"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::GenericImageView;

use crate::error::{BundleError, Result};

/// Trailer magic.
pub const MIP_MAGIC: &[u8; 4] = b"MIPS";

/// Write the downscaled levels of `src` into `out_dir` as PNGs.
pub fn generate_levels(src: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut current = image::open(src).map_err(|e| BundleError::Build {
        message: format!("Cannot decode {} for mipmaps: {}", src.display(), e),
        help: None,
    })?;
    fs::create_dir_all(out_dir).map_err(|e| BundleError::io(out_dir, e))?;

    let (mut width, mut height) = current.dimensions();
    let mut levels = Vec::new();
    while width > 1 || height > 1 {
        width = (width / 2).max(1);
        height = (height / 2).max(1);
        current = current.resize_exact(width, height, FilterType::Triangle);

        let path = out_dir.join(format!("mip_{}.png", levels.len() + 1));
        current.save(&path).map_err(|e| BundleError::io(&path, e))?;
        levels.push(path);
    }
    Ok(levels)
}

/// Append compressed `levels` and the trailer to `base`.
pub fn append_levels(base: &Path, levels: &[PathBuf]) -> Result<()> {
    let mut bytes = fs::read(base).map_err(|e| BundleError::io(base, e))?;
    let mut lengths = vec![bytes.len() as u32];

    for level in levels {
        let data = fs::read(level).map_err(|e| BundleError::io(level, e))?;
        lengths.push(data.len() as u32);
        bytes.extend_from_slice(&data);
    }
    for len in &lengths {
        bytes.extend_from_slice(&len.to_le_bytes());
    }
    bytes.extend_from_slice(&(lengths.len() as u32).to_le_bytes());
    bytes.extend_from_slice(MIP_MAGIC);

    fs::write(base, bytes).map_err(|e| BundleError::io(base, e))
}

/// Split a packed chain back into its levels, base first.
pub fn split_levels(bytes: &[u8]) -> Option<Vec<&[u8]>> {
    let body = bytes.strip_suffix(MIP_MAGIC.as_slice())?;
    let (body, count) = take_u32(body)?;
    let count = count as usize;

    let table_len = count.checked_mul(4)?;
    let table_start = body.len().checked_sub(table_len)?;
    let (data, table) = body.split_at(table_start);

    let mut levels = Vec::with_capacity(count);
    let mut offset = 0usize;
    for chunk in table.chunks_exact(4) {
        let len = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
        let end = offset.checked_add(len)?;
        levels.push(data.get(offset..end)?);
        offset = end;
    }
    (offset == data.len()).then_some(levels)
}

fn take_u32(bytes: &[u8]) -> Option<(&[u8], u32)> {
    let split = bytes.len().checked_sub(4)?;
    let (rest, tail) = bytes.split_at(split);
    Some((rest, u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn test_generate_levels_down_to_one_pixel() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("base.png");
        RgbaImage::from_pixel(8, 4, Rgba([0, 0, 255, 255])).save(&src).unwrap();

        let levels = generate_levels(&src, &dir.path().join("mips")).unwrap();
        let sizes: Vec<(u32, u32)> = levels
            .iter()
            .map(|p| image::open(p).unwrap().dimensions())
            .collect();
        assert_eq!(sizes, vec![(4, 2), (2, 1), (1, 1)]);
    }

    #[test]
    fn test_append_then_split() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("base.bin");
        let l1 = dir.path().join("l1.bin");
        let l2 = dir.path().join("l2.bin");
        fs::write(&base, b"BASEDATA").unwrap();
        fs::write(&l1, b"L1").unwrap();
        fs::write(&l2, b"L").unwrap();

        append_levels(&base, &[l1, l2]).unwrap();

        let bytes = fs::read(&base).unwrap();
        assert!(bytes.ends_with(MIP_MAGIC));
        let levels = split_levels(&bytes).unwrap();
        assert_eq!(levels, vec![&b"BASEDATA"[..], &b"L1"[..], &b"L"[..]]);
    }

    #[test]
    fn test_split_rejects_plain_file() {
        assert!(split_levels(b"just a png").is_none());
        assert!(split_levels(b"MIPS").is_none());
    }
}
