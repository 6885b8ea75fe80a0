//! # Fetch queue
//!
//! The bounded queue between the scanner and the fetch workers. The
//! capacity follows the scan window, so a full queue suspends the
//! scanner until workers catch up.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Error, Result};

/// A message to fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FetchItem {
    pub sequence_id: u32,
    pub message_id: i64,
}

impl FetchItem {
    pub fn new(sequence_id: u32, message_id: i64) -> Self {
        Self {
            sequence_id,
            message_id,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<FetchItem>,
    capacity: usize,
    closed: bool,
}

/// The bounded, closable, cancellable fetch queue.
#[derive(Debug)]
pub struct FetchQueue {
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
    token: CancellationToken,
}

impl FetchQueue {
    pub fn new(capacity: usize, token: CancellationToken) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            token,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Change the capacity. Items already queued above a smaller
    /// capacity stay, pushes wait until the queue shrinks below it.
    pub fn set_capacity(&self, capacity: usize) {
        let grew = {
            let mut state = self.state.lock();
            let grew = capacity > state.capacity;
            state.capacity = capacity.max(1);
            grew
        };

        if grew {
            self.not_full.notify_waiters();
        }
    }

    /// Push an item, waiting for room if the queue is full.
    pub async fn push(&self, item: FetchItem) -> Result<()> {
        loop {
            if self.token.is_cancelled() {
                return Err(Error::CancelledError);
            }

            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(Error::QueueClosedError(item.message_id));
                }
                if state.items.len() < state.capacity {
                    state.items.push_back(item);
                    drop(state);
                    trace!(id = item.message_id, "message queued");
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(Error::CancelledError),
                _ = notified => (),
            }
        }
    }

    /// Pop the next item, waiting for one if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained, or as
    /// soon as the token is cancelled.
    pub async fn pop(&self) -> Option<FetchItem> {
        loop {
            if self.token.is_cancelled() {
                return None;
            }

            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                _ = notified => (),
            }
        }
    }

    /// Close the queue. Pending items can still be popped, pushes
    /// fail from now on.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
