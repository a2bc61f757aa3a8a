use crate::config::{Config, DownloadsSection};
use crate::db::{Database, PersistentQueue, SqliteQueue};
use crate::downloader::Downloader;
use crate::error::Result;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::types::{ChecksumType, DownloadResult, FileSpec, WorkItem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;


/// Downloader that reports success without touching the filesystem
struct NoopDownloader;

#[async_trait::async_trait]
impl Downloader for NoopDownloader {
    async fn download_file(&self, _: &FileSpec, _: &Path) -> Result<DownloadResult> {
        Ok(DownloadResult::Success)
    }

    async fn verify_file(&self, _: &Path, _: &str, _: ChecksumType) -> Result<bool> {
        Ok(false)
    }
}

/// Downloader whose first fetch blocks until released
#[derive(Default)]
pub(super) struct GateDownloader {
    blocked: AtomicBool,
    started: Notify,
    release: CancellationToken,
}

impl GateDownloader {
    pub(super) async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub(super) fn release(&self) {
        self.release.cancel();
    }
}

#[async_trait::async_trait]
impl Downloader for GateDownloader {
    async fn download_file(&self, _: &FileSpec, _: &Path) -> Result<DownloadResult> {
        if !self.blocked.swap(true, Ordering::SeqCst) {
            self.started.notify_one();
            self.release.cancelled().await;
        }
        Ok(DownloadResult::Success)
    }

    async fn verify_file(&self, _: &Path, _: &str, _: ChecksumType) -> Result<bool> {
        Ok(false)
    }
}

pub(super) fn item(id: &str, host: &str) -> WorkItem {
    WorkItem {
        instance_id: id.to_string(),
        host: host.to_string(),
        output_dir: PathBuf::from("/data").join(id),
        files: vec![FileSpec {
            url: format!("https://{host}/{id}.nc"),
            filename: format!("{id}.nc"),
            checksum: "00".to_string(),
            checksum_type: ChecksumType::Sha256,
            size: 1,
        }],
    }
}

pub(super) struct Fixture {
    pub(super) downloads: Arc<SqliteQueue>,
    pub(super) failures: Arc<SqliteQueue>,
    pub(super) db: Arc<Database>,
    _dir: TempDir,
}

pub(super) async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::new(&dir.path().join("test.db")).await.unwrap());
    Fixture {
        downloads: Arc::new(SqliteQueue::new(db.clone(), "downloads")),
        failures: Arc::new(SqliteQueue::new(db.clone(), "failed")),
        db,
        _dir: dir,
    }
}

impl Fixture {
    pub(super) async fn enqueue(&self, items: &[WorkItem]) {
        for item in items {
            self.downloads.append(item, false).await.unwrap();
        }
    }

    pub(super) fn orchestrator(&self, n: i64, hosts: &[(&str, i64)]) -> Orchestrator {
        self.orchestrator_with(n, hosts, Arc::new(NoopDownloader))
    }

    pub(super) fn orchestrator_with(
        &self,
        n: i64,
        hosts: &[(&str, i64)],
        downloader: Arc<dyn Downloader>,
    ) -> Orchestrator {
        let mut config = Config::default();
        config.downloads = Some(DownloadsSection {
            n,
            host_limits: hosts.iter().map(|(h, l)| (h.to_string(), *l)).collect(),
        });
        Orchestrator::with_collaborators(
            config,
            Collaborators {
                downloads: self.downloads.clone(),
                failures: self.failures.clone(),
                records: self.db.clone(),
                downloader,
            },
        )
        .unwrap()
    }
}
