use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Content-addressed location for a processed image.
/// Layout: `<base>/<first_2_hex_chars>/<key>.<ext>`
pub fn artifact_path(base: &Path, key: &str, ext: &str) -> PathBuf {
    let prefix = key.get(..2).unwrap_or(key);
    base.join(prefix).join(format!("{key}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_bytes_known_vector() {
        let hex = to_hex(&sha256_bytes(b""));
        assert_eq!(hex, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn sha256_bytes_deterministic() {
        assert_eq!(sha256_bytes(b"hello"), sha256_bytes(b"hello"));
        assert_ne!(sha256_bytes(b"hello"), sha256_bytes(b"world"));
    }

    #[test]
    fn artifact_path_layout() {
        let base = PathBuf::from("/data/processed");
        let path = artifact_path(&base, "abcdef12", "png");
        assert_eq!(path, PathBuf::from("/data/processed/ab/abcdef12.png"));
    }

    #[test]
    fn artifact_path_short_key() {
        let path = artifact_path(Path::new("/p"), "a", "png");
        assert_eq!(path, PathBuf::from("/p/a/a.png"));
    }
}
