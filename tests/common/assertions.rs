//! Event collection helpers

use esgf_dl::Event;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for any single test run
pub const RUN_TIMEOUT: Duration = Duration::from_secs(20);

/// Drain every event still buffered in `rx`
///
/// Call after the run has returned: the relay is stopped by then, so the
/// channel ends once the buffer is empty.
pub fn drain_events(mut rx: broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                panic!("event receiver lagged by {n} events")
            }
            Err(_) => return events,
        }
    }
}

/// Worker name that started each instance
pub fn workers_by_instance(events: &[Event]) -> HashMap<String, String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ItemStarted {
                worker,
                instance_id,
            } => Some((instance_id.clone(), worker.clone())),
            _ => None,
        })
        .collect()
}

/// Number of events matching `predicate`
pub fn count_events(events: &[Event], predicate: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}
