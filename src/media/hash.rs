//! Content digests used for duplicate detection.

use std::io;
use std::path::Path;

/// Computes a fixed-width digest of a file's bytes.
///
/// Digests are only compared with each other for deduplication; they carry no
/// security meaning.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, path: &Path) -> io::Result<String>;
}

/// BLAKE3 over the whole file, rendered as 64 lowercase hex characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn hash(&self, path: &Path) -> io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_identical_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let hasher = Blake3Hasher;
        let ha = hasher.hash(&a).unwrap();
        assert_eq!(ha, hasher.hash(&b).unwrap());
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, b"other").unwrap();

        let hasher = Blake3Hasher;
        assert_ne!(hasher.hash(&a).unwrap(), hasher.hash(&b).unwrap());
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Blake3Hasher.hash(&dir.path().join("nope.jpg")).is_err());
    }
}
