//! Streaming file digests for integrity verification

use crate::error::Result;
use crate::types::ChecksumType;
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental hasher over one of the supported algorithms
pub(crate) enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub(crate) fn new(checksum_type: ChecksumType) -> Self {
        match checksum_type {
            ChecksumType::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumType::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumType::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    /// Lower-case hex digest
    pub(crate) fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Compute the hex digest of the file at `path`
pub async fn file_digest(path: &Path, checksum_type: ChecksumType) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new(checksum_type);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize_hex())
}

/// Compare two hex digests, ignoring case and surrounding whitespace
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Check the file at `path` against `expected`
///
/// A missing file is not an error: it simply does not verify.
pub async fn verify_checksum(path: &Path, expected: &str, checksum_type: ChecksumType) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let actual = file_digest(path, checksum_type).await?;
    Ok(digests_match(expected, &actual))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Digests of b"hello world"
    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn digests_known_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        assert_eq!(file_digest(&path, ChecksumType::Md5).await.unwrap(), HELLO_MD5);
        assert_eq!(
            file_digest(&path, ChecksumType::Sha256).await.unwrap(),
            HELLO_SHA256
        );
        assert_eq!(
            file_digest(&path, ChecksumType::Sha512).await.unwrap().len(),
            128
        );
    }

    #[tokio::test]
    async fn verify_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let upper = HELLO_SHA256.to_uppercase();
        assert!(verify_checksum(&path, &upper, ChecksumType::Sha256).await.unwrap());
        assert!(!verify_checksum(&path, HELLO_MD5, ChecksumType::Sha256).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_does_not_verify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.nc");
        assert!(!verify_checksum(&path, HELLO_MD5, ChecksumType::Md5).await.unwrap());
    }

    #[tokio::test]
    async fn directory_does_not_verify() {
        let dir = TempDir::new().unwrap();
        assert!(!verify_checksum(dir.path(), HELLO_MD5, ChecksumType::Md5).await.unwrap());
    }
}
