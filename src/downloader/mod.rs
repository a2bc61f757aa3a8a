//! File fetching and integrity verification.
//!
//! Workers talk to the network only through the [`Downloader`] trait, so the
//! orchestration core can be exercised with in-memory doubles.
//! - [`checksum`] - Streaming MD5/SHA-256/SHA-512 digests
//! - [`http`] - [`HttpDownloader`], reqwest-based implementation with per-fetch retry

pub mod checksum;
mod http;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use http::HttpDownloader;

use crate::error::Result;
use crate::types::{ChecksumType, DownloadResult, FileSpec};
use std::path::Path;

/// Fetches one file and verifies it
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `file` to `destination` and verify its integrity
    ///
    /// Expected failures (network, HTTP status, checksum) are reported as a
    /// negative [`DownloadResult`]. An `Err` means the attempt could not be
    /// made at all; callers treat it as [`DownloadResult::UnknownError`].
    async fn download_file(&self, file: &FileSpec, destination: &Path) -> Result<DownloadResult>;

    /// Check whether `path` exists and matches `checksum`
    ///
    /// A missing file yields `Ok(false)`.
    async fn verify_file(
        &self,
        path: &Path,
        checksum: &str,
        checksum_type: ChecksumType,
    ) -> Result<bool>;
}
