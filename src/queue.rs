//! In-process FIFO queue with join semantics.
//!
//! [`JoinableQueue`] is the channel between the orchestrator, the workers and
//! the result collector. Besides push/pop it counts unfinished items: every
//! push increments the count, every [`JoinableQueue::task_done`] decrements
//! it, and [`JoinableQueue::join`] waits until it reaches zero. "Empty" and
//! "done" are different states: an item may be popped but not yet
//! acknowledged.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct State<T> {
    items: VecDeque<T>,
    unfinished: usize,
}

/// Multi-producer, multi-consumer FIFO queue with `task_done`/`join`
pub struct JoinableQueue<T> {
    state: Mutex<State<T>>,
    item_available: Notify,
    all_done: Notify,
}

impl<T> Default for JoinableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JoinableQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            item_available: Notify::new(),
            all_done: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Queue state stays consistent across a panicking holder: every
        // critical section is a single push/pop/counter update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake one waiting consumer
    pub fn push(&self, item: T) {
        {
            let mut state = self.lock();
            state.items.push_back(item);
            state.unfinished += 1;
        }
        self.item_available.notify_one();
    }

    /// Remove the oldest item, waiting until one is available
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.item_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }

            notified.await;
        }
    }

    /// Remove the oldest item without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Acknowledge one previously popped item
    pub fn task_done(&self) {
        let reached_zero = {
            let mut state = self.lock();
            if state.unfinished == 0 {
                tracing::warn!("task_done called more times than items were pushed");
                return;
            }
            state.unfinished -= 1;
            state.unfinished == 0
        };

        if reached_zero {
            self.all_done.notify_waiters();
        }
    }

    /// Guard that calls [`task_done`](Self::task_done) when dropped
    pub fn done_guard(&self) -> DoneGuard<'_, T> {
        DoneGuard { queue: self }
    }

    /// Wait until every pushed item has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Pop and acknowledge everything still queued, returning the discarded items
    pub fn discard_remaining(&self) -> Vec<T> {
        let mut discarded = Vec::new();
        while let Some(item) = self.try_pop() {
            discarded.push(item);
            self.task_done();
        }
        discarded
    }

    /// Number of items waiting to be popped
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether no items are waiting to be popped
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Number of pushed items not yet acknowledged
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }
}

/// Acknowledges one queue item on drop
pub struct DoneGuard<'a, T> {
    queue: &'a JoinableQueue<T>,
}

impl<T> Drop for DoneGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}
