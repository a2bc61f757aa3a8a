//! Emergency drain and orderly shutdown.

use super::{Orchestrator, Partition};
use crate::collector::CollectorStats;
use crate::types::{ResultEnvelope, ResultMessage, Task};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often task liveness is polled while waiting on a queue join
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl Orchestrator {
    /// Move every queued item to the failure path and re-arm the sentinels
    ///
    /// Each queued [`Task::Work`] is reported failed to the collector, which
    /// adds it to the failure queue. Every removed task is acknowledged. One
    /// sentinel is then pushed per worker still running in the partition, so
    /// workers exit after their in-flight item. Returns the number of items
    /// reported.
    pub(crate) fn emergency_drain(&self) -> usize {
        let mut requeued = 0;

        for partition in &self.partitions {
            requeued += self.salvage(partition);

            let alive = partition.alive_workers();
            for _ in 0..alive {
                partition.queue.push(Task::Shutdown);
            }
            tracing::debug!(partition = %partition.key, alive, "Sentinels re-armed");
        }

        requeued
    }

    /// Wait for all queues, stop the collector and reap every task
    pub(crate) async fn drain(&mut self, collector: JoinHandle<CollectorStats>) -> CollectorStats {
        for partition in &self.partitions {
            self.join_partition(partition).await;
        }

        self.results.push(ResultMessage::Shutdown);
        tokio::select! {
            biased;
            _ = self.results.join() => {}
            _ = wait_until(|| collector.is_finished()) => {
                tracing::error!(
                    pending = self.results.len(),
                    "Result collector exited before all results were processed"
                );
            }
        }

        for partition in &mut self.partitions {
            for handle in partition.handles.drain(..) {
                match handle.await {
                    Ok(processed) => {
                        tracing::debug!(partition = %partition.key, processed, "Worker joined")
                    }
                    Err(e) => tracing::error!(partition = %partition.key, error = %e, "Worker task failed"),
                }
            }
        }

        match collector.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Result collector task failed");
                CollectorStats::default()
            }
        }
    }

    /// Wait until `partition`'s queue is fully acknowledged
    ///
    /// If every worker of the partition has already exited, nothing can
    /// acknowledge what is left: leftover sentinels are discarded and leftover
    /// items are reported failed.
    pub(super) async fn join_partition(&self, partition: &Partition) {
        tokio::select! {
            biased;
            _ = partition.queue.join() => return,
            _ = wait_until(|| partition.all_workers_finished()) => {}
        }

        let salvaged = self.salvage(partition);
        if salvaged > 0 {
            tracing::warn!(
                partition = %partition.key,
                salvaged,
                "Items left without workers reported as failed"
            );
        }
    }

    /// Empty `partition`'s queue, reporting each work item failed
    fn salvage(&self, partition: &Partition) -> usize {
        let mut salvaged = 0;
        for task in partition.queue.discard_remaining() {
            if let Task::Work(item) = task {
                tracing::info!(
                    instance_id = %item.instance_id,
                    partition = %partition.key,
                    "Returning unprocessed item to the failure queue"
                );
                self.results
                    .push(ResultMessage::Report(ResultEnvelope::failed(item)));
                salvaged += 1;
            }
        }
        salvaged
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(LIVENESS_POLL_INTERVAL).await;
    }
}
