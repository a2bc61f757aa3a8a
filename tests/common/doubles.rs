//! Downloader and record-store doubles

use super::fixtures::FILE_CONTENT;
use esgf_dl::downloader::checksum::verify_checksum;
use esgf_dl::{
    ChecksumType, DatasetRecord, DownloadResult, Downloader, Error, FileSpec, RecordStore, Result,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Downloader that writes [`FILE_CONTENT`] unless told otherwise
///
/// Verification is real: a file that exists with the right checksum verifies.
#[derive(Default)]
pub struct FakeDownloader {
    erroring: HashSet<String>,
    results: HashMap<String, DownloadResult>,
    delay: Duration,
    fetched: Mutex<Vec<PathBuf>>,
}

impl FakeDownloader {
    /// Every fetch succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetching `filename` returns `Err`
    pub fn erroring_on(mut self, filename: &str) -> Self {
        self.erroring.insert(filename.to_string());
        self
    }

    /// Fetching `filename` returns `result`
    pub fn returning(mut self, filename: &str, result: DownloadResult) -> Self {
        self.results.insert(filename.to_string(), result);
        self
    }

    /// Sleep this long in every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Destinations passed to `download_file`, in call order
    pub fn fetched(&self) -> Vec<PathBuf> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Downloader for FakeDownloader {
    async fn download_file(&self, file: &FileSpec, destination: &Path) -> Result<DownloadResult> {
        self.fetched.lock().unwrap().push(destination.to_path_buf());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.erroring.contains(&file.filename) {
            return Err(Error::Other(format!("scripted failure for {}", file.filename)));
        }
        if let Some(result) = self.results.get(&file.filename) {
            return Ok(*result);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, FILE_CONTENT).await?;
        Ok(DownloadResult::Success)
    }

    async fn verify_file(&self, path: &Path, checksum: &str, ty: ChecksumType) -> Result<bool> {
        verify_checksum(path, checksum, ty).await
    }
}

/// Downloader whose first fetch blocks until released
///
/// Lets a test interrupt a run while exactly one item is in flight.
pub struct GatedDownloader {
    inner: FakeDownloader,
    gated: AtomicBool,
    started: Notify,
    release: CancellationToken,
}

impl GatedDownloader {
    /// Wrap a succeeding [`FakeDownloader`]
    pub fn new() -> Self {
        Self {
            inner: FakeDownloader::new(),
            gated: AtomicBool::new(true),
            started: Notify::new(),
            release: CancellationToken::new(),
        }
    }

    /// Wait until the first fetch is blocked on the gate
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let the blocked fetch complete
    pub fn release(&self) {
        self.release.cancel();
    }

    /// Number of fetches performed
    pub fn fetch_count(&self) -> usize {
        self.inner.fetched().len()
    }
}

#[async_trait::async_trait]
impl Downloader for GatedDownloader {
    async fn download_file(&self, file: &FileSpec, destination: &Path) -> Result<DownloadResult> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.started.notify_one();
            self.release.cancelled().await;
        }
        self.inner.download_file(file, destination).await
    }

    async fn verify_file(&self, path: &Path, checksum: &str, ty: ChecksumType) -> Result<bool> {
        self.inner.verify_file(path, checksum, ty).await
    }
}

/// Record store that panics on every write
pub struct PanickingStore;

#[async_trait::async_trait]
impl RecordStore for PanickingStore {
    async fn get_record(&self, _: &str) -> Result<Option<DatasetRecord>> {
        Ok(None)
    }

    async fn put_record(&self, record: &DatasetRecord) -> Result<()> {
        panic!("record store corrupted while writing {}", record.instance_id);
    }
}
