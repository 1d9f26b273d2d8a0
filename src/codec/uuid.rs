//! Reversible uuid compaction.
//!
//! A 36-character uuid is written as 22 characters: the first two hex
//! digits are kept verbatim and every following group of three hex digits
//! (12 bits) becomes two characters of the base64 alphabet. A sub-asset
//! suffix (`@xxxx`) is carried through untouched. Strings that are not
//! uuids (pack names, for instance) pass through both directions unchanged.

use ::uuid::Uuid;

const BASE64_KEYS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Hex digits kept verbatim at the front of a compacted uuid.
const RESERVED_HEAD: usize = 2;

/// Length of a compacted uuid (without sub-asset suffix).
const COMPACT_LEN: usize = RESERVED_HEAD + (32 - RESERVED_HEAD) / 3 * 2;

fn split_suffix(id: &str) -> (&str, &str) {
    match id.find('@') {
        Some(at) => (&id[..at], &id[at..]),
        None => (id, ""),
    }
}

fn base64_value(c: u8) -> Option<u32> {
    BASE64_KEYS.iter().position(|&k| k == c).map(|p| p as u32)
}

/// Check whether the main part of `id` (before any `@`) is a uuid.
pub fn is_uuid(id: &str) -> bool {
    let (main, _) = split_suffix(id);
    (main.len() == 36 || main.len() == 32) && Uuid::parse_str(main).is_ok()
}

/// Compact a uuid into its 22-character form.
pub fn compress_uuid(id: &str) -> String {
    let (main, suffix) = split_suffix(id);
    if main.len() != 36 && main.len() != 32 {
        return id.to_string();
    }
    let parsed = match Uuid::parse_str(main) {
        Ok(u) => u,
        Err(_) => return id.to_string(),
    };

    let hex = parsed.simple().to_string();
    let bytes = hex.as_bytes();
    let mut out = String::with_capacity(COMPACT_LEN + suffix.len());
    out.push_str(&hex[..RESERVED_HEAD]);

    for chunk in bytes[RESERVED_HEAD..].chunks(3) {
        let bits = chunk.iter().fold(0u32, |acc, &h| {
            // simple() only emits lowercase hex digits
            acc << 4 | (h as char).to_digit(16).unwrap_or(0)
        });
        out.push(BASE64_KEYS[(bits >> 6) as usize] as char);
        out.push(BASE64_KEYS[(bits & 0x3f) as usize] as char);
    }

    out.push_str(suffix);
    out
}

/// Restore a uuid compacted with [`compress_uuid`].
pub fn decompress_uuid(id: &str) -> String {
    let (main, suffix) = split_suffix(id);
    if main.len() != COMPACT_LEN || !main.is_ascii() {
        return id.to_string();
    }

    let head = &main[..RESERVED_HEAD];
    if !head.chars().all(|c| c.is_ascii_hexdigit()) {
        return id.to_string();
    }

    let mut hex = String::with_capacity(32);
    hex.push_str(&head.to_ascii_lowercase());

    for pair in main.as_bytes()[RESERVED_HEAD..].chunks(2) {
        let (hi, lo) = match (base64_value(pair[0]), base64_value(pair[1])) {
            (Some(hi), Some(lo)) => (hi, lo),
            _ => return id.to_string(),
        };
        let bits = hi << 6 | lo;
        hex.push_str(&format!("{:03x}", bits));
    }

    match Uuid::parse_str(&hex) {
        Ok(u) => format!("{}{}", u.hyphenated(), suffix),
        Err(_) => id.to_string(),
    }
}
