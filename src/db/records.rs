//! Dataset record persistence.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, DatasetRecord, DatasetRow};

impl Database {
    /// Get the dataset record for an instance
    pub async fn get_dataset(&self, instance_id: &str) -> Result<Option<DatasetRecord>> {
        let row = sqlx::query_as::<_, DatasetRow>(
            r#"
            SELECT instance_id, host, output_dir, file_count, verified_at, downloaded_at
            FROM datasets
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get dataset: {}",
                e
            )))
        })?;

        Ok(row.map(DatasetRecord::from))
    }

    /// Insert or replace a dataset record
    pub async fn upsert_dataset(&self, record: &DatasetRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO datasets (
                instance_id, host, output_dir, file_count,
                verified_at, downloaded_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(instance_id) DO UPDATE SET
                host = excluded.host,
                output_dir = excluded.output_dir,
                file_count = excluded.file_count,
                verified_at = excluded.verified_at,
                downloaded_at = excluded.downloaded_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.instance_id)
        .bind(&record.host)
        .bind(record.output_dir.to_string_lossy().into_owned())
        .bind(record.file_count)
        .bind(record.verified_at.map(|t| t.timestamp_millis()))
        .bind(record.downloaded_at.map(|t| t.timestamp_millis()))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save dataset '{}': {}",
                record.instance_id, e
            )))
        })?;

        Ok(())
    }

    /// Number of datasets with a download timestamp
    pub async fn count_downloaded(&self) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM datasets WHERE downloaded_at IS NOT NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count datasets: {}",
                        e
                    )))
                })?;

        Ok(count as usize)
    }
}
