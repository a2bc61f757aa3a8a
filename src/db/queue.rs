//! Named work-item queues.
//!
//! Items are stored as JSON payloads keyed by queue name, ordered by insertion
//! id. Deduplication is an insert policy: a conditional insert that skips the
//! row when the same `instance_id` is already present in the same queue.

use crate::error::DatabaseError;
use crate::types::WorkItem;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Append an item to `queue`, returning whether a row was inserted
    pub async fn enqueue(&self, queue: &str, item: &WorkItem, deduplicate: bool) -> Result<bool> {
        let payload = serde_json::to_string(item)?;
        let now = chrono::Utc::now().timestamp();

        let sql = if deduplicate {
            r#"
            INSERT INTO queue_items (queue, instance_id, payload, created_at)
            SELECT ?1, ?2, ?3, ?4
            WHERE NOT EXISTS (
                SELECT 1 FROM queue_items WHERE queue = ?1 AND instance_id = ?2
            )
            "#
        } else {
            r#"
            INSERT INTO queue_items (queue, instance_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#
        };

        let result = sqlx::query(sql)
            .bind(queue)
            .bind(&item.instance_id)
            .bind(&payload)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to append to queue '{}': {}",
                    queue, e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Claim and return the oldest unclaimed item of `queue`
    ///
    /// The row is marked claimed atomically with the read and stays in the
    /// queue until [`Database::complete`] removes it. A payload that no longer
    /// decodes is logged in full, deleted, and reported as
    /// [`DatabaseError::CorruptPayload`].
    pub async fn dequeue(&self, queue: &str) -> Result<Option<WorkItem>> {
        let now = chrono::Utc::now().timestamp();
        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            UPDATE queue_items SET claimed_at = ?1
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue = ?2 AND claimed_at IS NULL
                ORDER BY id ASC LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(now)
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to pop from queue '{}': {}",
                queue, e
            )))
        })?;

        let Some((id, payload)) = row else {
            return Ok(None);
        };

        match serde_json::from_str::<WorkItem>(&payload) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                tracing::error!(
                    queue,
                    row_id = id,
                    payload = %payload,
                    error = %e,
                    "Dropping undecodable queue entry"
                );
                sqlx::query("DELETE FROM queue_items WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to drop undecodable entry {} from queue '{}': {}",
                            id, queue, e
                        )))
                    })?;
                Err(Error::Database(DatabaseError::CorruptPayload {
                    id: id.to_string(),
                    reason: e.to_string(),
                }))
            }
        }
    }

    /// Remove the oldest claimed entry for `instance_id` from `queue`
    ///
    /// Returns whether an entry was removed.
    pub async fn complete(&self, queue: &str, instance_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue = ?1 AND instance_id = ?2 AND claimed_at IS NOT NULL
                ORDER BY id ASC LIMIT 1
            )
            "#,
        )
        .bind(queue)
        .bind(instance_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to complete '{}' in queue '{}': {}",
                instance_id, queue, e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Return every claimed entry of `queue` to the pending state
    ///
    /// Returns the number of entries released.
    pub async fn release_claims(&self, queue: &str) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE queue_items SET claimed_at = NULL WHERE queue = ? AND claimed_at IS NOT NULL",
        )
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to release claims in queue '{}': {}",
                queue, e
            )))
        })?;

        Ok(result.rows_affected() as usize)
    }

    /// Number of claimed entries in `queue`
    pub async fn claimed_len(&self, queue: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE queue = ? AND claimed_at IS NOT NULL",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count claimed entries in queue '{}': {}",
                queue, e
            )))
        })?;

        Ok(count as usize)
    }

    /// Number of items in `queue`, claimed or not
    pub async fn queue_len(&self, queue: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count queue '{}': {}",
                    queue, e
                )))
            })?;

        Ok(count as usize)
    }

    /// Instance identifiers in `queue`, oldest first
    pub async fn queued_instance_ids(&self, queue: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT instance_id FROM queue_items WHERE queue = ? ORDER BY id ASC",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list queue '{}': {}",
                queue, e
            )))
        })?;

        Ok(ids)
    }
}
