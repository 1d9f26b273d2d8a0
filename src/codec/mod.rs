//! Small, dependency-free-at-the-boundary codecs shared by the bundle
//! phases: uuid compaction for manifests and content hashing for cache
//! busting and pack names.

mod hash;
mod uuid;

pub use hash::{content_hash, hash_array, hash_dir, hash_file, CONTENT_HASH_LEN, PACK_HASH_LEN};
pub use self::uuid::{compress_uuid, decompress_uuid, is_uuid};
