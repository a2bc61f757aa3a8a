//! Result collector
//!
//! The single consumer of the result queue and the only component that
//! writes durable state during a run: successes update the dataset record,
//! failures go to the failure queue. When recording a success fails, or
//! handling a result panics, the item is pushed to the failure queue instead
//! so it is retried by a later run rather than lost.
//!
//! Once an item's outcome is durable, its claim in the download queue is
//! acknowledged. An item whose outcome could not be stored keeps its claim
//! and is released back to pending by the next run.

use crate::db::{DatasetRecord, PersistentQueue, RecordStore};
use crate::error::Result;
use crate::events::EventSink;
use crate::queue::JoinableQueue;
use crate::types::{Event, Outcome, ResultEnvelope, ResultMessage, WorkItem};
use crate::worker::panic_message;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Counters returned when the collector stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Successes recorded in the dataset store
    pub succeeded: usize,
    /// Failures reported by workers or the orchestrator
    pub failed: usize,
    /// Successes that could not be recorded and went to the failure queue
    pub recovered: usize,
}

/// Consumer of worker results
pub struct ResultCollector {
    results: Arc<JoinableQueue<ResultMessage>>,
    records: Arc<dyn RecordStore>,
    downloads: Arc<dyn PersistentQueue>,
    failures: Arc<dyn PersistentQueue>,
    events: EventSink,
}

impl ResultCollector {
    /// Create a collector over `results`
    ///
    /// `downloads` is the queue the items were claimed from.
    pub fn new(
        results: Arc<JoinableQueue<ResultMessage>>,
        records: Arc<dyn RecordStore>,
        downloads: Arc<dyn PersistentQueue>,
        failures: Arc<dyn PersistentQueue>,
        events: EventSink,
    ) -> Self {
        Self {
            results,
            records,
            downloads,
            failures,
            events,
        }
    }

    /// Consume reports until a shutdown sentinel arrives
    pub async fn run(self) -> CollectorStats {
        tracing::debug!("Result collector started");
        let mut stats = CollectorStats::default();

        loop {
            let message = self.results.pop().await;
            let _done = self.results.done_guard();

            let envelope = match message {
                ResultMessage::Shutdown => break,
                ResultMessage::Report(envelope) => envelope,
            };

            let item = envelope.item.clone();
            let handled = AssertUnwindSafe(self.handle(envelope, &mut stats))
                .catch_unwind()
                .await;
            if let Err(panic) = handled {
                tracing::error!(
                    instance_id = %item.instance_id,
                    panic = %panic_message(panic.as_ref()),
                    "Panic while handling result, adding to failure queue"
                );
                if self.requeue(&item).await {
                    stats.recovered += 1;
                }
            }
        }

        tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            recovered = stats.recovered,
            "Result collector stopped"
        );
        stats
    }

    async fn handle(&self, envelope: ResultEnvelope, stats: &mut CollectorStats) {
        let ResultEnvelope { outcome, item } = envelope;

        match outcome {
            Outcome::Success => match self.record_success(&item, Utc::now()).await {
                Ok(()) => {
                    stats.succeeded += 1;
                    self.events.emit(Event::Recorded {
                        instance_id: item.instance_id.clone(),
                    });
                    self.acknowledge(&item).await;
                }
                Err(e) => {
                    tracing::error!(
                        instance_id = %item.instance_id,
                        error = %e,
                        "Failed to record success, adding to failure queue"
                    );
                    if self.requeue(&item).await {
                        stats.recovered += 1;
                    }
                }
            },
            Outcome::Failed => {
                stats.failed += 1;
                self.requeue(&item).await;
            }
        }
    }

    /// Stamp `item` as verified at `now`, creating its record if needed
    ///
    /// `downloaded_at` keeps its first value across repeated successes.
    pub async fn record_success(&self, item: &WorkItem, now: DateTime<Utc>) -> Result<()> {
        let mut record = match self.records.get_record(&item.instance_id).await? {
            Some(record) => record,
            None => {
                tracing::debug!(
                    instance_id = %item.instance_id,
                    "No dataset record yet, creating one"
                );
                DatasetRecord::for_item(item)
            }
        };

        record.mark_success(now);
        self.records.put_record(&record).await
    }

    /// Append `item` to the failure queue, returning whether it is now durable there
    ///
    /// The item's download-queue claim is acknowledged once it is.
    async fn requeue(&self, item: &WorkItem) -> bool {
        match self.failures.append(item, true).await {
            Ok(inserted) => {
                if !inserted {
                    tracing::debug!(
                        instance_id = %item.instance_id,
                        "Item already in failure queue"
                    );
                }
                self.events.emit(Event::Requeued {
                    instance_id: item.instance_id.clone(),
                });
                self.acknowledge(item).await;
                true
            }
            Err(e) => {
                let payload = serde_json::to_string(item).unwrap_or_default();
                tracing::error!(
                    instance_id = %item.instance_id,
                    error = %e,
                    payload = %payload,
                    "Failed to add item to failure queue, leaving it claimed in the download queue"
                );
                false
            }
        }
    }

    async fn acknowledge(&self, item: &WorkItem) {
        match self.downloads.ack(&item.instance_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                instance_id = %item.instance_id,
                "No download-queue claim to acknowledge"
            ),
            Err(e) => tracing::warn!(
                instance_id = %item.instance_id,
                error = %e,
                "Failed to acknowledge item, it will be released by the next run"
            ),
        }
    }
}
