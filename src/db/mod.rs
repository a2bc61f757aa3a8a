//! Database layer for esgf-dl
//!
//! Handles SQLite persistence for the work queues, dataset records and
//! runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`queue`]: Named, deduplicating FIFO queues of work items
//! - [`records`]: Dataset records (verified/downloaded timestamps)
//! - [`state`]: Runtime state (shutdown tracking)
//!
//! The collaborator traits consumed by the orchestrator, [`PersistentQueue`]
//! and [`RecordStore`], are defined here together with their SQLite
//! implementations.

use crate::error::Result;
use crate::types::WorkItem;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;
use std::sync::Arc;

mod migrations;
mod queue;
mod records;
mod state;

/// Durable, deduplicating FIFO of work items
///
/// Popping claims an item without removing it. A claimed item is invisible to
/// further pops and stays durable until [`ack`](PersistentQueue::ack) removes
/// it, so the items of a run that dies can be recovered with
/// [`release_claimed`](PersistentQueue::release_claimed).
#[async_trait::async_trait]
pub trait PersistentQueue: Send + Sync {
    /// Claim and return the oldest unclaimed item, `None` when there is none
    async fn pop(&self) -> Result<Option<WorkItem>>;

    /// Remove a claimed item once its outcome is durable elsewhere
    ///
    /// Returns whether a claimed entry for `instance_id` was removed.
    async fn ack(&self, instance_id: &str) -> Result<bool>;

    /// Make every claimed item poppable again, returning how many were released
    async fn release_claimed(&self) -> Result<usize>;

    /// Append an item
    ///
    /// With `deduplicate` set, the item is skipped when an item with the same
    /// `instance_id` is already queued. Returns whether the item was inserted.
    async fn append(&self, item: &WorkItem, deduplicate: bool) -> Result<bool>;

    /// Number of queued items, claimed ones included
    async fn len(&self) -> Result<usize>;

    /// Whether the queue holds no items
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Store of durable dataset records
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the record for an instance
    async fn get_record(&self, instance_id: &str) -> Result<Option<DatasetRecord>>;

    /// Insert or replace a record
    async fn put_record(&self, record: &DatasetRecord) -> Result<()>;
}

/// Durable record of a dataset instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    /// Instance identifier
    pub instance_id: String,
    /// Data node host the instance was fetched from
    pub host: String,
    /// Directory holding the instance's files
    pub output_dir: PathBuf,
    /// Number of files in the instance
    pub file_count: i64,
    /// Last time every file was confirmed present and valid
    pub verified_at: Option<DateTime<Utc>>,
    /// First time the instance was completely downloaded
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl DatasetRecord {
    /// Fresh record describing `item`, with no timestamps set
    pub fn for_item(item: &WorkItem) -> Self {
        Self {
            instance_id: item.instance_id.clone(),
            host: item.host.clone(),
            output_dir: item.output_dir.clone(),
            file_count: item.files.len() as i64,
            verified_at: None,
            downloaded_at: None,
        }
    }

    /// Stamp a successful download or verification at `now`
    ///
    /// `verified_at` is always refreshed; `downloaded_at` is only set the first
    /// time, so repeated success reports keep the original download time.
    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        self.verified_at = Some(now);
        self.downloaded_at.get_or_insert(now);
    }
}

/// Dataset record as stored in SQLite (timestamps in Unix milliseconds)
#[derive(Debug, Clone, FromRow)]
pub struct DatasetRow {
    /// Instance identifier
    pub instance_id: String,
    /// Data node host
    pub host: String,
    /// Output directory
    pub output_dir: String,
    /// Number of files
    pub file_count: i64,
    /// Unix milliseconds of last verification
    pub verified_at: Option<i64>,
    /// Unix milliseconds of first download
    pub downloaded_at: Option<i64>,
}

impl From<DatasetRow> for DatasetRecord {
    fn from(row: DatasetRow) -> Self {
        DatasetRecord {
            instance_id: row.instance_id,
            host: row.host,
            output_dir: PathBuf::from(row.output_dir),
            file_count: row.file_count,
            verified_at: row.verified_at.and_then(DateTime::from_timestamp_millis),
            downloaded_at: row.downloaded_at.and_then(DateTime::from_timestamp_millis),
        }
    }
}

/// Database handle for esgf-dl
pub struct Database {
    pool: SqlitePool,
}

/// A named queue inside a [`Database`]
///
/// Several queues (pending downloads, failures) share one database file and
/// are told apart by name.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Arc<Database>,
    name: String,
}

impl SqliteQueue {
    /// Handle on the queue called `name`
    pub fn new(db: Arc<Database>, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance identifiers currently queued, oldest first
    pub async fn instance_ids(&self) -> Result<Vec<String>> {
        self.db.queued_instance_ids(&self.name).await
    }

    /// Number of entries claimed and not yet acknowledged
    pub async fn claimed_len(&self) -> Result<usize> {
        self.db.claimed_len(&self.name).await
    }
}

#[async_trait::async_trait]
impl PersistentQueue for SqliteQueue {
    async fn pop(&self) -> Result<Option<WorkItem>> {
        self.db.dequeue(&self.name).await
    }

    async fn ack(&self, instance_id: &str) -> Result<bool> {
        self.db.complete(&self.name, instance_id).await
    }

    async fn release_claimed(&self) -> Result<usize> {
        self.db.release_claims(&self.name).await
    }

    async fn append(&self, item: &WorkItem, deduplicate: bool) -> Result<bool> {
        self.db.enqueue(&self.name, item, deduplicate).await
    }

    async fn len(&self) -> Result<usize> {
        self.db.queue_len(&self.name).await
    }
}

#[async_trait::async_trait]
impl RecordStore for Database {
    async fn get_record(&self, instance_id: &str) -> Result<Option<DatasetRecord>> {
        self.get_dataset(instance_id).await
    }

    async fn put_record(&self, record: &DatasetRecord) -> Result<()> {
        self.upsert_dataset(record).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
