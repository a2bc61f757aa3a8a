//! Top-level run coordination.
//!
//! An [`Orchestrator`] moves through a fixed sequence of phases:
//!
//! 1. **Building** ([`Orchestrator::new`] / [`Orchestrator::with_collaborators`]):
//!    validate configuration, derive the routing table, create one task
//!    queue per partition and the shared result queue, start the event relay.
//! 2. **Distributing** ([`distribute`]): release claims left by an unfinished
//!    run, then claim the whole persistent backlog onto the partition queues,
//!    followed by one shutdown sentinel per worker. Claimed items stay in the
//!    download queue until the collector has stored their outcome.
//! 3. **Running**: workers and the collector run as tokio tasks while the
//!    orchestrator logs queue sizes every `monitor_interval`.
//! 4. **Draining** ([`drain`]): wait for every queue to be acknowledged,
//!    stop the collector, stop the event relay.
//!
//! An interrupt during Running first moves every queued item to the failure
//! path (through the collector) and then drains normally.

mod distribute;
mod drain;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::collector::{CollectorStats, ResultCollector};
use crate::config::Config;
use crate::db::{Database, PersistentQueue, RecordStore, SqliteQueue};
use crate::downloader::{Downloader, HttpDownloader};
use crate::error::Result;
use crate::events::LogSink;
use crate::queue::JoinableQueue;
use crate::routing::{RouteKey, RoutingTable};
use crate::types::{Event, ResultMessage, Task, WorkItem};
use crate::worker::Worker;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every queue drained normally
    Completed,
    /// An interrupt triggered the emergency drain
    Interrupted,
    /// An unexpected failure stopped the run without draining
    Aborted,
}

impl ExitStatus {
    /// Process exit code for this status
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Completed => 0,
            ExitStatus::Interrupted | ExitStatus::Aborted => 1,
        }
    }
}

/// External collaborators of a run
#[derive(Clone)]
pub struct Collaborators {
    /// Pending work
    pub downloads: Arc<dyn PersistentQueue>,
    /// Failed work, consumed by a later run
    pub failures: Arc<dyn PersistentQueue>,
    /// Dataset records
    pub records: Arc<dyn RecordStore>,
    /// File fetcher
    pub downloader: Arc<dyn Downloader>,
}

/// One routing partition: a task queue and the workers draining it
pub(crate) struct Partition {
    pub(crate) key: RouteKey,
    pub(crate) queue: Arc<JoinableQueue<Task>>,
    pub(crate) workers: usize,
    pub(crate) handles: Vec<JoinHandle<usize>>,
}

impl Partition {
    /// Workers whose task has not returned yet
    pub(crate) fn alive_workers(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub(crate) fn all_workers_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }
}

/// Coordinates one download run
pub struct Orchestrator {
    config: Config,
    routing: RoutingTable,
    collaborators: Collaborators,
    database: Option<Arc<Database>>,
    partitions: Vec<Partition>,
    results: Arc<JoinableQueue<ResultMessage>>,
    log: LogSink,
}

impl Orchestrator {
    /// Build an orchestrator backed by SQLite and HTTP
    ///
    /// Opens (and migrates) the database at `persistence.database_path`, uses
    /// its two named queues, and fetches files with an [`HttpDownloader`].
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let downloader = HttpDownloader::new(&config.http, config.retry.clone())?;

        let collaborators = Collaborators {
            downloads: Arc::new(SqliteQueue::new(
                db.clone(),
                config.persistence.download_queue.clone(),
            )),
            failures: Arc::new(SqliteQueue::new(
                db.clone(),
                config.persistence.failure_queue.clone(),
            )),
            records: db.clone(),
            downloader: Arc::new(downloader),
        };

        let mut orchestrator = Self::with_collaborators(config, collaborators)?;
        orchestrator.database = Some(db);
        Ok(orchestrator)
    }

    /// Build an orchestrator over caller-provided collaborators
    ///
    /// Must be called inside a tokio runtime: the event relay starts here.
    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let routing = RoutingTable::new(&config.downloads()?);

        let partitions = routing
            .partitions()
            .into_iter()
            .map(|(key, workers)| Partition {
                key,
                queue: Arc::new(JoinableQueue::new()),
                workers,
                handles: Vec::with_capacity(workers),
            })
            .collect::<Vec<_>>();

        tracing::info!(
            workers = routing.total_workers(),
            partitions = partitions.len(),
            "Orchestrator built"
        );

        Ok(Self {
            config,
            routing,
            collaborators,
            database: None,
            partitions,
            results: Arc::new(JoinableQueue::new()),
            log: LogSink::start(),
        })
    }

    /// Receive the events of this run
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.log.subscribe()
    }

    /// Routing table in use
    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Run to completion, treating SIGINT/SIGTERM as an interrupt
    pub async fn run(self) -> Result<ExitStatus> {
        self.run_until(crate::interrupt_on_signal()).await
    }

    /// Run to completion, treating cancellation of `interrupt` as an interrupt
    pub async fn run_until(mut self, interrupt: CancellationToken) -> Result<ExitStatus> {
        if let Some(db) = &self.database {
            if db.was_unclean_shutdown().await? {
                tracing::warn!("Previous run did not shut down cleanly, recovering its claimed items");
            }
            db.set_clean_start().await?;
        }

        let released = self.collaborators.downloads.release_claimed().await?;
        if released > 0 {
            tracing::warn!(released, "Released items left claimed by an unfinished run");
        }

        let distribution = self.distribute().await;
        self.log.sink().emit(Event::Distributed {
            items: distribution.routed,
            rejected: distribution.rejected,
        });

        let collector = self.spawn_tasks();

        let status = match self.monitor(&collector, &interrupt).await {
            RunPhase::Finished => {
                let stats = self.drain(collector).await;
                tracing::info!(?stats, "Run completed");
                ExitStatus::Completed
            }
            RunPhase::Interrupted => {
                tracing::warn!("Interrupt received, moving pending items to the failure queue");
                let requeued = self.emergency_drain();
                self.log.sink().emit(Event::EmergencyDrained { requeued });
                let stats = self.drain(collector).await;
                tracing::info!(?stats, requeued, "Run interrupted");
                ExitStatus::Interrupted
            }
            RunPhase::CollectorExited => {
                self.abort(collector).await;
                ExitStatus::Aborted
            }
        };

        if let Some(db) = &self.database
            && status != ExitStatus::Aborted
            && let Err(e) = db.set_clean_shutdown().await
        {
            tracing::error!(error = %e, "Failed to mark clean shutdown");
        }

        self.log.sink().emit(Event::Shutdown);
        self.log.stop().await;
        Ok(status)
    }

    /// Spawn every worker and the collector, returning the collector's handle
    fn spawn_tasks(&mut self) -> JoinHandle<CollectorStats> {
        for partition in &mut self.partitions {
            for index in 0..partition.workers {
                let worker = Worker::new(
                    format!("{}-{}", partition.key, index),
                    partition.queue.clone(),
                    self.results.clone(),
                    self.collaborators.downloader.clone(),
                    self.log.sink(),
                );
                partition.handles.push(tokio::spawn(worker.run()));
            }
        }

        let collector = ResultCollector::new(
            self.results.clone(),
            self.collaborators.records.clone(),
            self.collaborators.downloads.clone(),
            self.collaborators.failures.clone(),
            self.log.sink(),
        );
        tokio::spawn(collector.run())
    }

    /// Wait until every served task queue is empty, an interrupt arrives, or the collector dies
    async fn monitor(
        &self,
        collector: &JoinHandle<CollectorStats>,
        interrupt: &CancellationToken,
    ) -> RunPhase {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => return RunPhase::Interrupted,
                _ = ticker.tick() => {}
            }

            if collector.is_finished() {
                return RunPhase::CollectorExited;
            }

            let mut pending = 0;
            for partition in &self.partitions {
                let queued = partition.queue.len();
                if partition.workers == 0 {
                    if queued > 0 {
                        tracing::warn!(
                            partition = %partition.key,
                            queued,
                            "Items waiting in a partition without workers"
                        );
                    }
                    continue;
                }
                tracing::info!(
                    partition = %partition.key,
                    queued,
                    in_progress = partition.queue.unfinished().saturating_sub(queued),
                    "Queue status"
                );
                pending += queued;
            }

            if pending == 0 {
                return RunPhase::Finished;
            }
        }
    }

    /// Stop everything without draining after an unexpected failure
    ///
    /// Reports the collector never handled are moved to the failure queue
    /// here, since nothing else will consume them. Items still on a partition
    /// queue stay claimed in the download queue and are released by the next
    /// run.
    async fn abort(&mut self, collector: JoinHandle<CollectorStats>) {
        match collector.await {
            Ok(stats) => tracing::error!(?stats, "Result collector exited before the run finished"),
            Err(e) => tracing::error!(error = %e, "Result collector task failed"),
        }

        for partition in &mut self.partitions {
            for handle in partition.handles.drain(..) {
                handle.abort();
                // Cancellation is the expected outcome here
                let _ = handle.await;
            }

            for task in partition.queue.discard_remaining() {
                if let Task::Work(item) = task {
                    tracing::warn!(
                        instance_id = %item.instance_id,
                        partition = %partition.key,
                        "Leaving unprocessed item claimed for the next run"
                    );
                }
            }
        }

        let mut settled = 0;
        for message in self.results.discard_remaining() {
            if let ResultMessage::Report(envelope) = message {
                settled += self.settle_orphaned_report(envelope.item).await as usize;
            }
        }
        tracing::error!(settled, "Run aborted");
    }

    /// Move a report nobody will collect into the failure queue
    async fn settle_orphaned_report(&self, item: WorkItem) -> bool {
        match self.collaborators.failures.append(&item, true).await {
            Ok(_) => {
                if let Err(e) = self.collaborators.downloads.ack(&item.instance_id).await {
                    tracing::warn!(
                        instance_id = %item.instance_id,
                        error = %e,
                        "Failed to acknowledge item, it will be released by the next run"
                    );
                }
                tracing::warn!(
                    instance_id = %item.instance_id,
                    "Uncollected result moved to the failure queue"
                );
                true
            }
            Err(e) => {
                let payload = serde_json::to_string(&item).unwrap_or_default();
                tracing::error!(
                    instance_id = %item.instance_id,
                    error = %e,
                    payload = %payload,
                    "Failed to move uncollected result to the failure queue"
                );
                false
            }
        }
    }
}

/// How the Running phase ended
enum RunPhase {
    Finished,
    Interrupted,
    CollectorExited,
}
