//! Event relay for a run.
//!
//! Workers and the collector never log progress directly to a shared
//! resource. They hold an [`EventSink`] and emit [`Event`]s into it; a single
//! [`LogSink`] task owned by the orchestrator writes each event to `tracing`
//! and rebroadcasts it to any subscriber (tests, embedding applications).

use crate::types::Event;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the rebroadcast channel; slow subscribers lag rather than block the relay
const BROADCAST_CAPACITY: usize = 1000;

/// Cloneable handle used to emit events
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    /// Emit an event; dropped silently once the relay has stopped
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event relay stopped, dropping event");
        }
    }
}

/// Owned event relay with an explicit start/stop lifecycle
pub struct LogSink {
    tx: mpsc::UnboundedSender<Event>,
    broadcast_tx: broadcast::Sender<Event>,
    stop: CancellationToken,
    relay: JoinHandle<()>,
}

impl LogSink {
    /// Spawn the relay task
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let stop = CancellationToken::new();

        let relay = tokio::spawn(relay(rx, broadcast_tx.clone(), stop.clone()));

        Self {
            tx,
            broadcast_tx,
            stop,
            relay,
        }
    }

    /// New handle for a worker or the collector
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    /// Receive every event relayed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }

    /// Stop accepting events, flush what is buffered, and wait for the relay to exit
    ///
    /// Outstanding [`EventSink`] clones do not keep the relay alive.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.relay.await {
            tracing::error!(error = %e, "Event relay task failed");
        }
    }
}

async fn relay(
    mut rx: mpsc::UnboundedReceiver<Event>,
    broadcast_tx: broadcast::Sender<Event>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => forward(&broadcast_tx, event),
                None => return,
            },
            _ = stop.cancelled() => break,
        }
    }

    rx.close();
    while let Some(event) = rx.recv().await {
        forward(&broadcast_tx, event);
    }
}

fn forward(broadcast_tx: &broadcast::Sender<Event>, event: Event) {
    log_event(&event);
    // No subscribers is the normal case outside tests
    let _ = broadcast_tx.send(event);
}

fn log_event(event: &Event) {
    match event {
        Event::Distributed { items, rejected } => {
            tracing::info!(items, rejected, "Backlog distributed")
        }
        Event::ItemStarted {
            worker,
            instance_id,
        } => tracing::info!(worker = %worker, instance_id = %instance_id, "Downloading instance"),
        Event::FileVerified {
            instance_id,
            filename,
        } => tracing::debug!(instance_id = %instance_id, filename = %filename, "File already present"),
        Event::FileDownloaded {
            instance_id,
            filename,
        } => tracing::debug!(instance_id = %instance_id, filename = %filename, "File downloaded"),
        Event::FileFailed {
            instance_id,
            filename,
            result,
        } => tracing::warn!(
            instance_id = %instance_id,
            filename = %filename,
            code = result.code(),
            "File failed"
        ),
        Event::ItemFinished {
            instance_id,
            outcome,
        } => tracing::info!(instance_id = %instance_id, outcome = ?outcome, "Instance finished"),
        Event::Recorded { instance_id } => {
            tracing::debug!(instance_id = %instance_id, "Dataset record updated")
        }
        Event::Requeued { instance_id } => {
            tracing::info!(instance_id = %instance_id, "Instance added to failure queue")
        }
        Event::EmergencyDrained { requeued } => {
            tracing::warn!(requeued, "Pending work moved to the failure queue")
        }
        Event::Shutdown => tracing::info!("Run finished"),
    }
}
