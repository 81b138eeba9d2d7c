use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Size, modification time and content hash of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size_bytes: u64,
    /// Epoch seconds, 0 when the platform does not report it
    pub modified_at: u64,
    /// SHA256 hex digest, empty when the file could not be read
    pub hash: String,
}

/// Compute SHA256 hash of a byte slice
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute SHA256 hash of a string
pub fn hash_str(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Compute SHA256 hash of a file
///
/// Unreadable files hash to an empty string so a single permission
/// error cannot abort a scan of the whole tree.
pub fn hash_file(path: &Path) -> String {
    match fs::read(path) {
        Ok(content) => hash_bytes(&content),
        Err(e) => {
            debug!("Could not hash {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Collect size, mtime and hash for a file
pub fn metadata(path: &Path) -> FileMetadata {
    let (size_bytes, modified_at) = match fs::metadata(path) {
        Ok(meta) => {
            let modified_at = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            (meta.len(), modified_at)
        }
        Err(_) => (0, 0),
    };

    FileMetadata {
        size_bytes,
        modified_at,
        hash: hash_file(path),
    }
}

/// Combined digest over `(name, value)` pairs, independent of input order
pub fn digest_pairs<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (name, value) in pairs {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("page.html");
        fs::write(&path, "{% include 'header.html' %}").unwrap();

        let first = hash_file(&path);
        let second = hash_file(&path);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(first, hash_str("{% include 'header.html' %}"));
    }

    #[test]
    fn test_hash_file_unreadable_is_empty() {
        assert_eq!(hash_file(Path::new("/nonexistent/incscan/file.html")), "");
    }

    #[test]
    fn test_metadata_reports_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.py");
        fs::write(&path, "print('hi')\n").unwrap();

        let meta = metadata(&path);
        assert_eq!(meta.size_bytes, 12);
        assert!(meta.modified_at > 0);
        assert_eq!(meta.hash, hash_str("print('hi')\n"));
    }

    #[test]
    fn test_digest_pairs_order_independent() {
        let a = digest_pairs(vec![("a.html", "1"), ("b.html", "2")]);
        let b = digest_pairs(vec![("b.html", "2"), ("a.html", "1")]);
        assert_eq!(a, b);

        let c = digest_pairs(vec![("a.html", "1"), ("b.html", "3")]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_pairs_no_ambiguous_concatenation() {
        let a = digest_pairs(vec![("ab", "c")]);
        let b = digest_pairs(vec![("a", "bc")]);
        assert_ne!(a, b);
    }
}
