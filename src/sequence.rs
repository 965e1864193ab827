//! A blocking, order-preserving handoff from one producer thread to any
//! number of consumers

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::MisuseError;

//
// External dependencies
//
use parking_lot::{Condvar, Mutex};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Live `BlockingSequence` handles; close guards do not count
    handles: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    /// Signalled on every publish, take and close
    changed: Condvar,
    capacity: Option<usize>,
}

/// A queue that consumers iterate while a producer is still filling it.
///
/// Cloning yields another handle to the same queue. Items are handed out in
/// publish order, each to exactly one consumer. A producer blocked on a
/// full bounded sequence gives up once it holds the last handle.
pub struct BlockingSequence<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BlockingSequence<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().handles += 1;
        BlockingSequence {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for BlockingSequence<T> {
    fn drop(&mut self) {
        self.shared.state.lock().handles -= 1;
        self.shared.changed.notify_all();
    }
}

impl<T> Shared<T> {
    fn close(&self) -> Result<(), MisuseError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MisuseError::AlreadyClosed);
        }
        state.closed = true;
        self.changed.notify_all();
        Ok(())
    }
}

impl<T> Default for BlockingSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BlockingSequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BlockingSequence")
            .field("buffered", &state.items.len())
            .field("closed", &state.closed)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl<T> BlockingSequence<T> {
    /// An unbounded sequence; `publish` never blocks
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// A sequence buffering at most `capacity` items; `publish` blocks
    /// while it is full
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        BlockingSequence {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    closed: false,
                    handles: 1,
                }),
                changed: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Append an item and wake waiting consumers. On a full bounded
    /// sequence this waits for a consumer, and fails if no other handle
    /// is left to consume.
    pub fn publish(&self, item: T) -> Result<(), MisuseError> {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(MisuseError::PublishAfterClose);
            }
            match self.shared.capacity {
                Some(capacity) if state.items.len() >= capacity => {
                    if state.handles <= 1 {
                        return Err(MisuseError::NoConsumers);
                    }
                    self.shared.changed.wait(&mut state)
                }
                _ => break,
            }
        }
        state.items.push_back(item);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Mark the end of the sequence. Items already published stay available.
    pub fn close(&self) -> Result<(), MisuseError> {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Take the next item, waiting while the sequence is empty but open.
    /// Returns `None` once the sequence is closed and drained.
    pub fn take_next(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.shared.changed.notify_all();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.shared.changed.wait(&mut state);
        }
    }

    /// Iterate the remaining items, blocking between them
    pub fn iter(&self) -> BlockingIter<T> {
        BlockingIter { sequence: self.clone() }
    }

    /// A guard that closes the sequence when dropped, meant to be held by
    /// the producer thread
    pub fn close_guard(&self) -> CloseGuard<T> {
        CloseGuard {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> IntoIterator for BlockingSequence<T> {
    type Item = T;
    type IntoIter = BlockingIter<T>;

    fn into_iter(self) -> BlockingIter<T> {
        BlockingIter { sequence: self }
    }
}

/// Single-pass iterator over a [`BlockingSequence`]
#[derive(Debug)]
pub struct BlockingIter<T> {
    sequence: BlockingSequence<T>,
}

impl<T> Iterator for BlockingIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.sequence.take_next()
    }
}

/// Closes its sequence on drop, also when the producer panics
pub struct CloseGuard<T> {
    shared: Arc<Shared<T>>,
}

impl<T> std::fmt::Debug for CloseGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseGuard").finish_non_exhaustive()
    }
}

impl<T> Drop for CloseGuard<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::warn!("producer thread panicked, closing its sequence");
        }
        // Closing an already closed sequence is fine here
        let _ = self.shared.close();
    }
}
