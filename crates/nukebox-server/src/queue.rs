//! Shared FIFO of pending plays.
//!
//! Transfer sessions push, the playback worker pops. One mutex guards the
//! contents; a condvar wakes the worker when something arrives or the queue closes.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// One pending playback: who uploaded it and where it landed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayRequest {
    pub mac_id: String,
    pub path: PathBuf,
}

impl PlayRequest {
    pub fn new(mac_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            mac_id: mac_id.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for PlayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mac_id, self.path.display())
    }
}

struct QueueInner {
    items: VecDeque<PlayRequest>,
    closed: bool,
}

pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append unless an equal request is already waiting. Returns whether it was added.
    ///
    /// Only current contents count: a request that was already played can be queued again.
    pub fn enqueue(&self, req: PlayRequest) -> bool {
        let mut g = self.lock();
        if g.closed || g.items.iter().any(|r| r == &req) {
            return false;
        }
        g.items.push_back(req);
        drop(g);
        self.cv.notify_one();
        true
    }

    /// Block until an entry exists, then remove and return the oldest one.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn dequeue_front(&self) -> Option<PlayRequest> {
        let mut g = self.lock();
        loop {
            if let Some(req) = g.items.pop_front() {
                return Some(req);
            }
            if g.closed {
                return None;
            }
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_dequeue_front(&self) -> Option<PlayRequest> {
        self.lock().items.pop_front()
    }

    pub fn contains(&self, req: &PlayRequest) -> bool {
        self.lock().items.iter().any(|r| r == req)
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<PlayRequest> {
        self.lock().items.iter().cloned().collect()
    }

    /// Refuse further entries and wake any blocked consumer.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }
}
