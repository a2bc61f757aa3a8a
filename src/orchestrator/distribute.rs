//! Backlog distribution onto partition queues.

use super::{Orchestrator, Partition};
use crate::error::{DatabaseError, Error};
use crate::routing::RouteKey;
use crate::types::{ResultEnvelope, ResultMessage, Task};

/// Counts from one distribution pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Distribution {
    /// Items pushed onto a partition queue
    pub(crate) routed: usize,
    /// Items that failed validation and were reported failed
    pub(crate) rejected: usize,
}

impl Orchestrator {
    /// Pop the whole persistent backlog and route it, then queue the sentinels
    ///
    /// Invalid items are reported as failed so the collector keeps them in
    /// the failure queue. A pop error other than an undecodable payload ends
    /// the pass early; whatever was not popped stays in the persistent queue.
    pub(crate) async fn distribute(&self) -> Distribution {
        let mut distribution = Distribution::default();

        loop {
            let item = match self.collaborators.downloads.pop().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(Error::Database(DatabaseError::CorruptPayload { .. })) => continue,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        routed = distribution.routed,
                        "Failed to read download queue, continuing with items read so far"
                    );
                    break;
                }
            };

            if let Err(e) = item.validate() {
                tracing::warn!(
                    instance_id = %item.instance_id,
                    error = %e,
                    "Rejecting invalid work item"
                );
                self.results
                    .push(ResultMessage::Report(ResultEnvelope::failed(item)));
                distribution.rejected += 1;
                continue;
            }

            let key = self.routing.route(&item.host);
            tracing::debug!(instance_id = %item.instance_id, partition = %key, "Routing item");
            match self.partition(&key) {
                Some(partition) => {
                    partition.queue.push(Task::Work(item));
                    distribution.routed += 1;
                }
                None => {
                    // Routing only returns keys it has partitions for
                    tracing::error!(partition = %key, "No queue for partition, reporting item failed");
                    self.results
                        .push(ResultMessage::Report(ResultEnvelope::failed(item)));
                    distribution.rejected += 1;
                }
            }
        }

        for partition in &self.partitions {
            for _ in 0..partition.workers {
                partition.queue.push(Task::Shutdown);
            }
            tracing::debug!(
                partition = %partition.key,
                queued = partition.queue.len().saturating_sub(partition.workers),
                workers = partition.workers,
                "Partition ready"
            );
        }

        distribution
    }

    pub(crate) fn partition(&self, key: &RouteKey) -> Option<&Partition> {
        self.partitions.iter().find(|p| &p.key == key)
    }
}
