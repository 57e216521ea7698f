//! Content hashing.

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Incremental hasher over `(key, value)` pairs.
///
/// Each part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// produce different digests.
#[derive(Debug, Default)]
pub struct Fingerprint {
    hasher: blake3::Hasher,
}

impl Fingerprint {
    /// Create an empty fingerprint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one keyed entry.
    pub fn entry(&mut self, key: &str, value: &[u8]) -> &mut Self {
        self.part(key.as_bytes());
        self.part(value);
        self
    }

    fn part(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Finish and return the hex digest.
    #[must_use]
    pub fn finish(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes() {
        let hash = blake3_bytes(b"hello world");
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let mut a = Fingerprint::new();
        a.entry("/a.css", b"x").entry("/b.css", b"y");
        let mut b = Fingerprint::new();
        b.entry("/b.css", b"y").entry("/a.css", b"x");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_fingerprint_length_prefixes_parts() {
        let mut a = Fingerprint::new();
        a.entry("ab", b"c");
        let mut b = Fingerprint::new();
        b.entry("a", b"bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let mut a = Fingerprint::new();
        a.entry("/App.jsx", b"export default 1");
        let mut b = Fingerprint::new();
        b.entry("/App.jsx", b"export default 1");
        assert_eq!(a.finish(), b.finish());
    }
}
