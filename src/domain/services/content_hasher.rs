//! Stable, content-addressed cache key derivation.

use sha2::{Digest, Sha256};

use crate::domain::entities::{CacheKey, TargetSize};

/// Number of digest bytes kept in a key (32 hex characters).
pub const DIGEST_PREFIX_BYTES: usize = 16;

/// Hashes arbitrary bytes into a filesystem-safe key.
///
/// SHA-256 truncated to [`DIGEST_PREFIX_BYTES`], hex encoded. Identical input
/// yields the same key in every process.
#[must_use]
pub fn hash(bytes: &[u8]) -> CacheKey {
    CacheKey::new(hex_digest(bytes))
}

/// Derives the key for one size variant of a logical source.
///
/// All variants of `logical_id` share the [`variant_prefix`], so they can be
/// invalidated together. The id is escaped, so `photo1` and `photo1_x` never
/// share a prefix.
#[must_use]
pub fn derive_key(logical_id: &str, width: u32, height: u32) -> CacheKey {
    CacheKey::new(format!("{}{width}x{height}", variant_prefix(logical_id)))
}

/// Derives the key for `target` rendered at `scale`.
#[must_use]
pub fn derive_key_for_target(logical_id: &str, target: TargetSize, scale: f32) -> CacheKey {
    let (width, height) = target.pixel_dimensions(scale);
    derive_key(logical_id, width, height)
}

/// Prefix shared by every key derived from `logical_id`, and by no key
/// derived from any other id.
#[must_use]
pub fn variant_prefix(logical_id: &str) -> String {
    let mut prefix = escape_id(logical_id);
    prefix.push('_');
    prefix
}

/// Escapes the separator (and the escape character) so the first `_` in a
/// derived key always ends the id. Ids without `_` or `%` are unchanged.
fn escape_id(logical_id: &str) -> String {
    let mut escaped = String::with_capacity(logical_id.len());
    for c in logical_id.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '_' => escaped.push_str("%5F"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Disk file name for `key`: hashed so arbitrary key characters never reach
/// the filesystem.
#[must_use]
pub fn file_name(key: &CacheKey, extension: &str) -> String {
    format!("{}.{extension}", hex_digest(key.as_str().as_bytes()))
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..DIGEST_PREFIX_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let bytes = b"progress photo bytes";
        assert_eq!(hash(bytes), hash(bytes));
    }

    #[test]
    fn test_hash_known_value() {
        // First 16 bytes of SHA-256("abc").
        assert_eq!(hash(b"abc").as_str(), "ba7816bf8f01cfea414140de5dae2223");
    }

    #[test]
    fn test_hash_empty_input() {
        let key = hash(&[]);
        assert_eq!(key.as_str().len(), DIGEST_PREFIX_BYTES * 2);
        assert_eq!(key.as_str(), "e3b0c44298fc1c149afbf4c8996fb924");
    }

    #[test]
    fn test_hash_differs_for_different_input() {
        assert_ne!(hash(b"front"), hash(b"side"));
    }

    #[test]
    fn test_derive_key_distinguishes_sizes() {
        let thumb = derive_key("photo1", 200, 200);
        let full = derive_key("photo1", 1080, 1440);
        assert_ne!(thumb, full);
        assert_eq!(thumb.as_str(), "photo1_200x200");
        assert!(thumb.has_prefix(&variant_prefix("photo1")));
        assert!(full.has_prefix(&variant_prefix("photo1")));
    }

    #[test]
    fn test_variant_prefix_does_not_match_longer_ids() {
        let prefix = variant_prefix("photo1");

        assert!(!derive_key("photo1_x", 10, 10).has_prefix(&prefix));
        assert!(!derive_key("photo1_", 10, 10).has_prefix(&prefix));
        assert!(derive_key("photo1_x", 10, 10).has_prefix(&variant_prefix("photo1_x")));
    }

    #[test]
    fn test_escaped_ids_stay_distinct() {
        assert_eq!(derive_key("a_b", 1, 1).as_str(), "a%5Fb_1x1");
        assert_eq!(derive_key("a%5Fb", 1, 1).as_str(), "a%255Fb_1x1");
        assert_ne!(derive_key("a_b", 1, 1), derive_key("a%5Fb", 1, 1));
    }

    #[test]
    fn test_derive_key_for_target_uses_pixels() {
        let key = derive_key_for_target("p", TargetSize::new(100.0, 50.0), 3.0);
        assert_eq!(key, derive_key("p", 300, 150));
    }

    #[test]
    fn test_file_name_is_safe() {
        let key = CacheKey::new("../../etc/passwd_10x10");
        let name = file_name(&key, "jpg");
        assert!(name.ends_with(".jpg"));
        assert!(!name.contains('/'));
        assert_eq!(name.len(), DIGEST_PREFIX_BYTES * 2 + 4);
        assert_eq!(name, file_name(&key, "jpg"));
    }
}
