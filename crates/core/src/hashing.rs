//! Content hashing for idempotent persistence keys.

use sha2::{Digest, Sha256};

/// SHA-256 over the parts, separated by a unit separator so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Candidate id: identical keywords for the same market and language
/// always hash to the same id.
pub fn candidate_id(market: &str, language: &str, keyword: &str) -> String {
    let mut hash = content_hash(&["keyword", market, language, keyword]);
    hash.truncate(32);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_prevents_collisions() {
        assert_ne!(content_hash(&["ab", "c"]), content_hash(&["a", "bc"]));
    }

    #[test]
    fn test_candidate_id_is_stable() {
        let a = candidate_id("US", "en", "trail running shoes");
        let b = candidate_id("US", "en", "trail running shoes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, candidate_id("GB", "en", "trail running shoes"));
    }
}
