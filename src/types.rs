//! Core types for esgf-dl

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Checksum algorithm advertised for a file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// MD5 (legacy datasets)
    #[serde(alias = "MD5")]
    Md5,
    /// SHA-256 (most ESGF datasets)
    #[serde(alias = "SHA256", alias = "sha-256", alias = "SHA-256")]
    Sha256,
    /// SHA-512
    #[serde(alias = "SHA512", alias = "sha-512", alias = "SHA-512")]
    Sha512,
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// One file belonging to a [`WorkItem`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Source URL
    pub url: String,
    /// File name relative to the item's output directory
    pub filename: String,
    /// Expected hex digest
    pub checksum: String,
    /// Algorithm used for `checksum`
    pub checksum_type: ChecksumType,
    /// Expected size in bytes
    pub size: u64,
}

/// One logical download unit: a dataset instance and its constituent files
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique instance identifier, used for deduplication across the whole queue
    pub instance_id: String,
    /// Routing key (data node host name)
    pub host: String,
    /// Directory the files are written into
    pub output_dir: PathBuf,
    /// Files to fetch, processed in order
    pub files: Vec<FileSpec>,
}

impl WorkItem {
    /// Destination path of `file` under this item's output directory
    pub fn destination(&self, file: &FileSpec) -> PathBuf {
        self.output_dir.join(&file.filename)
    }

    /// Check the structural invariants of the item
    ///
    /// Rejects an empty `instance_id`, an empty file list, file names that
    /// would land outside `output_dir`, and URLs that are not HTTP(S).
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidItem {
            instance_id: self.instance_id.clone(),
            reason,
        };

        if self.instance_id.trim().is_empty() {
            return Err(invalid("instance_id is empty".to_string()));
        }
        if self.files.is_empty() {
            return Err(invalid("item has no files".to_string()));
        }
        for file in &self.files {
            if !is_contained(Path::new(&file.filename)) {
                return Err(invalid(format!(
                    "filename '{}' escapes the output directory",
                    file.filename
                )));
            }
            match url::Url::parse(&file.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(invalid(format!(
                        "unsupported URL scheme '{}' for '{}'",
                        url.scheme(),
                        file.filename
                    )));
                }
                Err(e) => {
                    return Err(invalid(format!("invalid URL '{}': {}", file.url, e)));
                }
            }
        }
        Ok(())
    }
}

fn is_contained(path: &Path) -> bool {
    let mut has_name = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    has_name
}

/// Outcome of attempting one [`FileSpec`]
///
/// Non-negative codes are success-like, negative codes are failures. The
/// aggregation rule for a whole item relies on this polarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadResult {
    /// Pre-existing file matched its checksum, nothing was fetched
    Verified,
    /// File was fetched and verified
    Success,
    /// Connection, timeout or HTTP-level failure
    NetworkError,
    /// Fetched content failed integrity verification
    ChecksumMismatch,
    /// Anything else
    UnknownError,
}

impl DownloadResult {
    /// Integer result code
    pub fn code(&self) -> i32 {
        match self {
            DownloadResult::Verified => 1,
            DownloadResult::Success => 0,
            DownloadResult::NetworkError => -1,
            DownloadResult::ChecksumMismatch => -2,
            DownloadResult::UnknownError => -3,
        }
    }

    /// Convert an integer result code back into a result
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => DownloadResult::Verified,
            0 => DownloadResult::Success,
            -1 => DownloadResult::NetworkError,
            -2 => DownloadResult::ChecksumMismatch,
            _ => DownloadResult::UnknownError,
        }
    }

    /// Whether this result counts towards a successful item
    pub fn is_success(&self) -> bool {
        self.code() >= 0
    }
}

/// Aggregate outcome of a whole [`WorkItem`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every file verified or downloaded
    Success,
    /// At least one file failed
    Failed,
}

impl Outcome {
    /// Aggregate per-file results: success iff every result is non-negative
    pub fn aggregate<'a>(results: impl IntoIterator<Item = &'a DownloadResult>) -> Self {
        if results.into_iter().all(DownloadResult::is_success) {
            Outcome::Success
        } else {
            Outcome::Failed
        }
    }
}

/// Message on a per-partition task queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Task {
    /// An item to download
    Work(WorkItem),
    /// No more work, the receiving worker exits
    Shutdown,
}

/// Report for one processed item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Aggregate outcome
    #[serde(rename = "result")]
    pub outcome: Outcome,
    /// The item the outcome refers to
    pub item: WorkItem,
}

impl ResultEnvelope {
    /// Successful report
    pub fn success(item: WorkItem) -> Self {
        Self {
            outcome: Outcome::Success,
            item,
        }
    }

    /// Failed report
    pub fn failed(item: WorkItem) -> Self {
        Self {
            outcome: Outcome::Failed,
            item,
        }
    }
}

/// Message on the shared result queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultMessage {
    /// An item report
    Report(ResultEnvelope),
    /// No more results, the collector exits
    Shutdown,
}

/// Event emitted during a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Backlog distributed to partition queues
    Distributed {
        /// Number of items routed
        items: usize,
        /// Number of items rejected by validation
        rejected: usize,
    },

    /// A worker picked up an item
    ItemStarted {
        /// Worker name
        worker: String,
        /// Instance identifier
        instance_id: String,
    },

    /// Existing file matched its checksum
    FileVerified {
        /// Instance identifier
        instance_id: String,
        /// File name
        filename: String,
    },

    /// File fetched and verified
    FileDownloaded {
        /// Instance identifier
        instance_id: String,
        /// File name
        filename: String,
    },

    /// File failed
    FileFailed {
        /// Instance identifier
        instance_id: String,
        /// File name
        filename: String,
        /// Failure classification
        result: DownloadResult,
    },

    /// A worker finished an item
    ItemFinished {
        /// Instance identifier
        instance_id: String,
        /// Aggregate outcome
        outcome: Outcome,
    },

    /// Success recorded in the dataset store
    Recorded {
        /// Instance identifier
        instance_id: String,
    },

    /// Item appended to the failure queue
    Requeued {
        /// Instance identifier
        instance_id: String,
    },

    /// Interrupt handling moved pending items to the failure path
    EmergencyDrained {
        /// Number of pending items reported as failed
        requeued: usize,
    },

    /// Run finished
    Shutdown,
}

impl Event {
    /// Instance identifier the event refers to, if any
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Event::ItemStarted { instance_id, .. }
            | Event::FileVerified { instance_id, .. }
            | Event::FileDownloaded { instance_id, .. }
            | Event::FileFailed { instance_id, .. }
            | Event::ItemFinished { instance_id, .. }
            | Event::Recorded { instance_id }
            | Event::Requeued { instance_id } => Some(instance_id),
            Event::Distributed { .. } | Event::EmergencyDrained { .. } | Event::Shutdown => None,
        }
    }
}
