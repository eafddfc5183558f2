//! Content hash of downloaded files.
//!
//! Large audio files are sampled rather than read in full: the hash covers
//! the file size plus the first and last MiB, which is enough to tell two
//! downloads apart.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 1024 * 1024; // 1 MiB

/// Partial SHA-256 of a file as a lowercase hex string (64 characters).
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hasher.update(file_size.to_le_bytes());

    if file_size <= CHUNK_SIZE * 2 {
        let mut buffer = Vec::with_capacity(file_size as usize);
        file.read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    } else {
        let mut buffer = vec![0u8; CHUNK_SIZE as usize];
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);

        file.seek(SeekFrom::End(-(CHUNK_SIZE as i64)))?;
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// [`content_hash`] off the async runtime.
pub async fn content_hash_async(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || content_hash(&path))
        .await
        .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_small_file_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("track.m4a");
        std::fs::write(&path, b"Hello, world!").unwrap();

        let hash = content_hash(&path).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash(&path).unwrap());
    }

    #[test]
    fn test_different_content_differs() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.m4a");
        let b = dir.path().join("b.m4a");
        std::fs::write(&a, b"Content A").unwrap();
        std::fs::write(&b, b"Content B").unwrap();

        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_large_file_samples_ends() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.m4a");
        let b = dir.path().join("b.m4a");

        let mut data = vec![0u8; (CHUNK_SIZE * 3) as usize];
        std::fs::write(&a, &data).unwrap();
        // Change only the middle MiB: not sampled
        data[(CHUNK_SIZE + 10) as usize] = 1;
        std::fs::write(&b, &data).unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());

        // Change the last byte: sampled
        let last = data.len() - 1;
        data[last] = 1;
        std::fs::write(&b, &data).unwrap();
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        assert!(content_hash_async(Path::new("/nonexistent/file.m4a")).await.is_err());
    }
}
