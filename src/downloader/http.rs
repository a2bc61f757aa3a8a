//! HTTP implementation of [`Downloader`]

use super::Downloader;
use super::checksum::{self, Hasher};
use crate::config::{HttpConfig, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::retry::retry_with_backoff;
use crate::types::{ChecksumType, DownloadResult, FileSpec};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Suffix of the temporary file a download streams into
const PARTIAL_SUFFIX: &str = ".part";

/// Downloads files over HTTP(S) and verifies them against their advertised checksum
///
/// Content is streamed into `<destination>.part`, hashed on the fly, and only
/// renamed into place once size and checksum both match. A failed attempt
/// never leaves a file at the destination path.
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpDownloader {
    /// Build a downloader with its own connection pool
    pub fn new(http: &HttpConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout)
            .connect_timeout(http.connect_timeout)
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self { client, retry })
    }

    /// One GET of `file` into `partial`, promoted to `destination` on success
    async fn fetch_once(&self, file: &FileSpec, destination: &Path, partial: &Path) -> Result<()> {
        let response = self.client.get(&file.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(DownloadError::HttpStatus {
                url: file.url.clone(),
                status: status.as_u16(),
            }));
        }

        let mut out = tokio::fs::File::create(partial).await?;
        let mut hasher = Hasher::new(file.checksum_type);
        let mut written: u64 = 0;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        if written != file.size {
            return Err(Error::Download(DownloadError::SizeMismatch {
                path: destination.to_path_buf(),
                expected: file.size,
                actual: written,
            }));
        }

        let actual = hasher.finalize_hex();
        if !checksum::digests_match(&file.checksum, &actual) {
            return Err(Error::Download(DownloadError::ChecksumMismatch {
                path: destination.to_path_buf(),
                expected: file.checksum.clone(),
                actual,
            }));
        }

        tokio::fs::rename(partial, destination).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn download_file(&self, file: &FileSpec, destination: &Path) -> Result<DownloadResult> {
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Download(DownloadError::InvalidDestination {
                    path: destination.to_path_buf(),
                    reason: format!("cannot create parent directory: {e}"),
                })
            })?;
        }

        let partial = partial_path(destination);
        let partial_ref = partial.as_path();

        tracing::debug!(url = %file.url, destination = %destination.display(), "Fetching file");

        match retry_with_backoff(&self.retry, move || {
            self.fetch_once(file, destination, partial_ref)
        })
        .await
        {
            Ok(()) => {
                tracing::debug!(
                    filename = %file.filename,
                    size = file.size,
                    "File downloaded and verified"
                );
                Ok(DownloadResult::Success)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(partial_ref).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(
                        path = %partial_ref.display(),
                        error = %cleanup,
                        "Failed to remove partial download"
                    );
                }

                let result = e.download_result();
                tracing::warn!(
                    url = %file.url,
                    error = %e,
                    code = result.code(),
                    "File download failed"
                );
                Ok(result)
            }
        }
    }

    async fn verify_file(
        &self,
        path: &Path,
        expected: &str,
        checksum_type: ChecksumType,
    ) -> Result<bool> {
        checksum::verify_checksum(path, expected, checksum_type).await
    }
}

/// `<destination>.part`
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
