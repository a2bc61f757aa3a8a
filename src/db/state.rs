//! Runtime state tracking: clean-shutdown detection.
//!
//! A run marks itself started on entry and finished on a clean exit. If the
//! marker still says "started" on the next startup, the previous run was
//! killed before it could drain its in-flight queues.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Check if the last run ended without calling [`set_clean_shutdown`](Self::set_clean_shutdown)
    ///
    /// A database that has never been used reports `false`.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        Ok(self.runtime_value(CLEAN_SHUTDOWN_KEY).await?.as_deref() == Some("false"))
    }

    /// Mark that a run has started
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_value(CLEAN_SHUTDOWN_KEY, "false").await
    }

    /// Mark that a run has finished cleanly
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_value(CLEAN_SHUTDOWN_KEY, "true").await
    }

    async fn runtime_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read runtime state '{}': {}",
                    key, e
                )))
            })
    }

    async fn set_runtime_value(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
