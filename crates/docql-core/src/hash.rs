//! Stable hashing for structural query signatures.

use blake3::Hasher;
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// First 8 bytes of the digest, hex encoded. Used in log lines and tokens.
    pub fn short_hex(&self) -> String {
        self.to_hex()[..16].to_string()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    Hash256(h.finalize().into())
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Incremental signature over several tagged parts.
///
/// Each part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// never collide.
pub struct SignatureHasher {
    inner: Hasher,
}

impl SignatureHasher {
    pub fn new(domain: &str) -> Self {
        let mut inner = Hasher::new();
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub fn part<T: Serialize>(&mut self, tag: &str, v: &T) -> Result<&mut Self, Error> {
        let bytes = serde_json::to_vec(v).map_err(|e| Error::Hash(e.to_string()))?;
        self.inner.update(tag.as_bytes());
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(&bytes);
        Ok(self)
    }

    pub fn finish(&self) -> Hash256 {
        Hash256(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_delimited() {
        let mut a = SignatureHasher::new("q");
        a.part("x", &"ab").unwrap().part("y", &"c").unwrap();
        let mut b = SignatureHasher::new("q");
        b.part("x", &"a").unwrap().part("y", &"bc").unwrap();
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn hex_lengths() {
        let h = hash_str("SELECT VALUE c FROM root c");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h.short_hex().len(), 16);
        assert_eq!(h, hash_bytes(b"SELECT VALUE c FROM root c"));
    }
}
