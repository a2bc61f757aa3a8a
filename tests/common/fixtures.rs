//! Test fixtures: work items and a temporary database environment

use esgf_dl::{
    ChecksumType, Collaborators, Database, Downloader, FileSpec, PersistentQueue, SqliteQueue,
    WorkItem,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Content served for every generated file unless a test says otherwise
pub const FILE_CONTENT: &[u8] = b"CDF\x01 synthetic netcdf payload";

/// Hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// File spec for `name` on `host` matching [`FILE_CONTENT`]
pub fn file_spec(host: &str, name: &str) -> FileSpec {
    FileSpec {
        url: format!("https://{host}/thredds/fileServer/{name}"),
        filename: name.to_string(),
        checksum: sha256_hex(FILE_CONTENT),
        checksum_type: ChecksumType::Sha256,
        size: FILE_CONTENT.len() as u64,
    }
}

/// Work item `id` on `host` with one file per name, stored under `root/id`
pub fn work_item(root: &Path, id: &str, host: &str, files: &[&str]) -> WorkItem {
    WorkItem {
        instance_id: id.to_string(),
        host: host.to_string(),
        output_dir: root.join(id),
        files: files.iter().map(|name| file_spec(host, name)).collect(),
    }
}

/// Temporary database with the default download and failure queues
pub struct TestEnv {
    /// Keeps the directory alive
    pub dir: TempDir,
    /// Database path
    pub db_path: PathBuf,
    /// Shared database handle
    pub db: Arc<Database>,
    /// Download queue
    pub downloads: Arc<SqliteQueue>,
    /// Failure queue
    pub failures: Arc<SqliteQueue>,
}

impl TestEnv {
    /// Fresh database in a new temporary directory
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("esgf-dl.db");
        let db = Arc::new(Database::new(&db_path).await.unwrap());
        Self {
            downloads: Arc::new(SqliteQueue::new(db.clone(), "downloads")),
            failures: Arc::new(SqliteQueue::new(db.clone(), "failed")),
            db,
            db_path,
            dir,
        }
    }

    /// Directory downloads are written under
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Work item stored under [`data_dir`](Self::data_dir)
    pub fn item(&self, id: &str, host: &str, files: &[&str]) -> WorkItem {
        work_item(&self.data_dir(), id, host, files)
    }

    /// Append items to the download queue
    pub async fn enqueue(&self, items: &[WorkItem]) {
        for item in items {
            assert!(self.downloads.append(item, true).await.unwrap());
        }
    }

    /// Collaborators over this environment and `downloader`
    pub fn collaborators(&self, downloader: Arc<dyn Downloader>) -> Collaborators {
        Collaborators {
            downloads: self.downloads.clone(),
            failures: self.failures.clone(),
            records: self.db.clone(),
            downloader,
        }
    }

    /// Instance ids in the failure queue, sorted
    pub async fn failed_ids(&self) -> Vec<String> {
        let mut ids = self.failures.instance_ids().await.unwrap();
        ids.sort();
        ids
    }

    /// Whether `id` has a download timestamp
    pub async fn is_downloaded(&self, id: &str) -> bool {
        self.db
            .get_dataset(id)
            .await
            .unwrap()
            .is_some_and(|record| record.downloaded_at.is_some())
    }
}
