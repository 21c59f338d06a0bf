//! Content hashing for component source

use crate::error::HashError;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the SHA-256 digest
pub const HASH_LEN: usize = 12;

/// Truncated SHA-256 of a component's unmodified source text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash source text exactly as the user wrote it
    pub fn of(source: &str) -> Result<Self, HashError> {
        if source.is_empty() {
            return Err(HashError::EmptySource);
        }

        Ok(Self(full_digest(source)[..HASH_LEN].to_string()))
    }

    /// Wrap a hash read from the catalog index
    pub fn from_hex(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Untruncated hex SHA-256 of source text
///
/// Catalog lookups use [`ContentHash`]; anything that must not confuse two
/// different sources keys on this instead.
pub fn full_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_truncated_and_deterministic() {
        let code = "class TestComponent:\n    pass";
        let hash = ContentHash::of(code).unwrap();
        assert_eq!(hash.as_str().len(), HASH_LEN);
        assert_eq!(ContentHash::of(code).unwrap(), hash);
    }

    #[test]
    fn test_different_code_different_hash() {
        let a = ContentHash::of("class TestComponent1:\n    pass").unwrap();
        let b = ContentHash::of("class TestComponent2:\n    pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_source_rejected() {
        assert_eq!(ContentHash::of(""), Err(HashError::EmptySource));
    }

    #[test]
    fn test_truncated_collision_has_distinct_full_digest() {
        let benign = "x = 1\n# 5803637\n";
        let blocked = "import subprocess\n# 418845\n";
        assert_eq!(ContentHash::of(benign).unwrap(), ContentHash::of(blocked).unwrap());
        assert_ne!(full_digest(benign), full_digest(blocked));
        assert_eq!(full_digest(benign).len(), 64);
    }

    #[test]
    fn test_known_digest_prefix() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(ContentHash::of("abc").unwrap().as_str(), "ba7816bf8f01");
    }
}
