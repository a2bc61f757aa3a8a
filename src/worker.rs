//! Download worker
//!
//! A worker drains one partition's task queue. Every [`Task::Work`] it pops
//! produces exactly one [`ResultEnvelope`] on the shared result queue, no
//! matter how the downloader behaves; a [`Task::Shutdown`] ends the loop
//! without producing anything.

use crate::downloader::Downloader;
use crate::events::EventSink;
use crate::queue::JoinableQueue;
use crate::types::{DownloadResult, Event, FileSpec, Outcome, ResultEnvelope, ResultMessage, Task, WorkItem};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Text carried by a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// One member of the worker pool
pub struct Worker {
    name: String,
    tasks: Arc<JoinableQueue<Task>>,
    results: Arc<JoinableQueue<ResultMessage>>,
    downloader: Arc<dyn Downloader>,
    events: EventSink,
}

impl Worker {
    /// Create a worker bound to `tasks` that reports into `results`
    pub fn new(
        name: impl Into<String>,
        tasks: Arc<JoinableQueue<Task>>,
        results: Arc<JoinableQueue<ResultMessage>>,
        downloader: Arc<dyn Downloader>,
        events: EventSink,
    ) -> Self {
        Self {
            name: name.into(),
            tasks,
            results,
            downloader,
            events,
        }
    }

    /// Worker name, used in logs and events
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process tasks until a shutdown sentinel arrives
    ///
    /// Returns the number of work items processed.
    pub async fn run(self) -> usize {
        tracing::debug!(worker = %self.name, "Worker started");
        let mut processed = 0;

        loop {
            let task = self.tasks.pop().await;
            // Acknowledged when this iteration ends, after the result is queued
            let _done = self.tasks.done_guard();

            let item = match task {
                Task::Shutdown => break,
                Task::Work(item) => item,
            };

            let outcome = self.process_guarded(&item).await;
            self.results
                .push(ResultMessage::Report(ResultEnvelope { outcome, item }));
            processed += 1;
        }

        tracing::debug!(worker = %self.name, processed, "Worker stopped");
        processed
    }

    /// Process an item, converting a panic into a failed outcome
    async fn process_guarded(&self, item: &WorkItem) -> Outcome {
        match AssertUnwindSafe(self.process(item)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    worker = %self.name,
                    instance_id = %item.instance_id,
                    panic = %message,
                    "Worker panicked while processing item"
                );
                self.events.emit(Event::ItemFinished {
                    instance_id: item.instance_id.clone(),
                    outcome: Outcome::Failed,
                });
                Outcome::Failed
            }
        }
    }

    async fn process(&self, item: &WorkItem) -> Outcome {
        self.events.emit(Event::ItemStarted {
            worker: self.name.clone(),
            instance_id: item.instance_id.clone(),
        });

        let mut results = Vec::with_capacity(item.files.len());
        for file in &item.files {
            let result = self.process_file(item, file).await;

            let event = match result {
                DownloadResult::Verified => Event::FileVerified {
                    instance_id: item.instance_id.clone(),
                    filename: file.filename.clone(),
                },
                DownloadResult::Success => Event::FileDownloaded {
                    instance_id: item.instance_id.clone(),
                    filename: file.filename.clone(),
                },
                failed => Event::FileFailed {
                    instance_id: item.instance_id.clone(),
                    filename: file.filename.clone(),
                    result: failed,
                },
            };
            self.events.emit(event);
            results.push(result);
        }

        let outcome = Outcome::aggregate(&results);
        self.events.emit(Event::ItemFinished {
            instance_id: item.instance_id.clone(),
            outcome,
        });
        outcome
    }

    /// Verify an existing copy, fetching only when it does not match
    async fn process_file(&self, item: &WorkItem, file: &FileSpec) -> DownloadResult {
        let destination = item.destination(file);

        match self
            .downloader
            .verify_file(&destination, &file.checksum, file.checksum_type)
            .await
        {
            Ok(true) => return DownloadResult::Verified,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    worker = %self.name,
                    path = %destination.display(),
                    error = %e,
                    "Could not verify existing file, downloading again"
                );
            }
        }

        match self.downloader.download_file(file, &destination).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    worker = %self.name,
                    instance_id = %item.instance_id,
                    url = %file.url,
                    error = %e,
                    "Downloader failed"
                );
                DownloadResult::UnknownError
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::events::LogSink;
    use crate::types::ChecksumType;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted downloader keyed by file name
    #[derive(Default)]
    struct Scripted {
        results: HashMap<String, DownloadResult>,
        erroring: HashSet<String>,
        panicking: HashSet<String>,
        present: HashSet<PathBuf>,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Downloader for Scripted {
        async fn download_file(&self, file: &FileSpec, _dest: &Path) -> Result<DownloadResult> {
            self.fetched.lock().unwrap().push(file.filename.clone());
            if self.panicking.contains(&file.filename) {
                panic!("downloader exploded on {}", file.filename);
            }
            if self.erroring.contains(&file.filename) {
                return Err(Error::Other("boom".into()));
            }
            Ok(self
                .results
                .get(&file.filename)
                .copied()
                .unwrap_or(DownloadResult::Success))
        }

        async fn verify_file(&self, path: &Path, _: &str, _: ChecksumType) -> Result<bool> {
            Ok(self.present.contains(path))
        }
    }

    fn item(id: &str, files: &[&str]) -> WorkItem {
        WorkItem {
            instance_id: id.to_string(),
            host: "esgf.example.org".to_string(),
            output_dir: PathBuf::from("/data"),
            files: files
                .iter()
                .map(|name| FileSpec {
                    url: format!("https://esgf.example.org/{name}"),
                    filename: name.to_string(),
                    checksum: "abc".to_string(),
                    checksum_type: ChecksumType::Sha256,
                    size: 1,
                })
                .collect(),
        }
    }

    struct Harness {
        tasks: Arc<JoinableQueue<Task>>,
        results: Arc<JoinableQueue<ResultMessage>>,
        log: LogSink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                tasks: Arc::new(JoinableQueue::new()),
                results: Arc::new(JoinableQueue::new()),
                log: LogSink::start(),
            }
        }

        fn worker(&self, downloader: Arc<dyn Downloader>) -> Worker {
            Worker::new(
                "w-0",
                self.tasks.clone(),
                self.results.clone(),
                downloader,
                self.log.sink(),
            )
        }

        fn reports(&self) -> Vec<ResultEnvelope> {
            let mut reports = Vec::new();
            while let Some(message) = self.results.try_pop() {
                match message {
                    ResultMessage::Report(envelope) => reports.push(envelope),
                    ResultMessage::Shutdown => panic!("workers never emit a result sentinel"),
                }
            }
            reports
        }
    }

    async fn run_to_completion(worker: Worker) -> usize {
        tokio::time::timeout(Duration::from_secs(5), worker.run())
            .await
            .expect("worker should stop on its sentinel")
    }

    #[tokio::test]
    async fn one_result_per_item_even_when_every_download_errors() {
        let h = Harness::new();
        let downloader = Arc::new(Scripted {
            erroring: ["a.nc", "b.nc"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });

        h.tasks.push(Task::Work(item("i1", &["a.nc", "b.nc"])));
        h.tasks.push(Task::Work(item("i2", &["a.nc"])));
        h.tasks.push(Task::Shutdown);

        assert_eq!(run_to_completion(h.worker(downloader.clone())).await, 2);

        let reports = h.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == Outcome::Failed));
        assert_eq!(
            downloader.fetched.lock().unwrap().len(),
            3,
            "remaining files are still attempted after an error"
        );
        assert_eq!(h.tasks.unfinished(), 0);
    }

    #[tokio::test]
    async fn any_negative_file_result_fails_the_item() {
        let h = Harness::new();
        let downloader = Arc::new(Scripted {
            results: [("bad.nc".to_string(), DownloadResult::ChecksumMismatch)].into(),
            ..Default::default()
        });

        h.tasks.push(Task::Work(item("first", &["bad.nc", "ok.nc"])));
        h.tasks.push(Task::Work(item("last", &["ok.nc", "bad.nc"])));
        h.tasks.push(Task::Work(item("clean", &["ok.nc", "ok2.nc"])));
        h.tasks.push(Task::Shutdown);

        run_to_completion(h.worker(downloader)).await;

        let outcomes: HashMap<_, _> = h
            .reports()
            .into_iter()
            .map(|r| (r.item.instance_id, r.outcome))
            .collect();
        assert_eq!(outcomes["first"], Outcome::Failed);
        assert_eq!(outcomes["last"], Outcome::Failed);
        assert_eq!(outcomes["clean"], Outcome::Success);
    }

    #[tokio::test]
    async fn sentinel_stops_the_worker_without_a_result() {
        let h = Harness::new();
        let downloader = Arc::new(Scripted::default());

        h.tasks.push(Task::Shutdown);
        h.tasks.push(Task::Work(item("after-sentinel", &["a.nc"])));

        assert_eq!(run_to_completion(h.worker(downloader.clone())).await, 0);

        assert!(h.reports().is_empty());
        assert_eq!(h.tasks.len(), 1, "item behind the sentinel is not consumed");
        assert_eq!(h.tasks.unfinished(), 1, "only the sentinel is acknowledged");
        assert!(downloader.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn verified_file_is_not_fetched() {
        let h = Harness::new();
        let downloader = Arc::new(Scripted {
            present: [PathBuf::from("/data/have.nc")].into(),
            ..Default::default()
        });

        h.tasks.push(Task::Work(item("i", &["have.nc", "need.nc"])));
        h.tasks.push(Task::Shutdown);

        run_to_completion(h.worker(downloader.clone())).await;

        assert_eq!(*downloader.fetched.lock().unwrap(), vec!["need.nc".to_string()]);
        assert_eq!(h.reports()[0].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn panic_is_contained_and_reported_failed() {
        let h = Harness::new();
        let downloader = Arc::new(Scripted {
            panicking: ["explode.nc".to_string()].into(),
            ..Default::default()
        });

        h.tasks.push(Task::Work(item("boom", &["explode.nc"])));
        h.tasks.push(Task::Work(item("fine", &["ok.nc"])));
        h.tasks.push(Task::Shutdown);

        assert_eq!(run_to_completion(h.worker(downloader)).await, 2);

        let reports = h.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].item.instance_id, "boom");
        assert_eq!(reports[0].outcome, Outcome::Failed);
        assert_eq!(reports[1].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn emits_item_lifecycle_events() {
        let h = Harness::new();
        let mut rx = h.log.subscribe();
        let downloader = Arc::new(Scripted {
            results: [("bad.nc".to_string(), DownloadResult::NetworkError)].into(),
            ..Default::default()
        });

        h.tasks.push(Task::Work(item("i", &["ok.nc", "bad.nc"])));
        h.tasks.push(Task::Shutdown);
        run_to_completion(h.worker(downloader)).await;

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }

        assert!(matches!(seen[0], Event::ItemStarted { .. }));
        assert!(matches!(seen[1], Event::FileDownloaded { .. }));
        assert!(matches!(
            seen[2],
            Event::FileFailed {
                result: DownloadResult::NetworkError,
                ..
            }
        ));
        assert!(matches!(
            seen[3],
            Event::ItemFinished {
                outcome: Outcome::Failed,
                ..
            }
        ));
    }
}
