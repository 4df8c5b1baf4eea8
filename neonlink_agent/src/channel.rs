//! Bounded snapshot queue between the sampler and the broadcaster.
//! Overflow evicts the oldest buffered snapshot; stale telemetry is worth less
//! than an occasional gap.

use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

use crate::types::SystemSnapshot;

pub const DEFAULT_CAPACITY: usize = 100;

pub struct TelemetryChannel {
    buf: Mutex<VecDeque<SystemSnapshot>>,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

impl TelemetryChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshots evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue without blocking. Returns false only if the channel is closed
    /// (or its buffer is unusable); never panics.
    pub fn write(&self, snapshot: SystemSnapshot) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut buf = match self.buf.lock() {
            Ok(b) => b,
            Err(e) => {
                warn!("telemetry channel lock poisoned, dropping snapshot: {e}");
                return false;
            }
        };
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(snapshot);
        drop(buf);
        self.notify.notify_one();
        true
    }

    /// Async flavor of [`write`](Self::write). Drop-oldest never waits for a
    /// slot, so this completes immediately.
    pub async fn write_async(&self, snapshot: SystemSnapshot) -> bool {
        self.write(snapshot)
    }

    pub fn try_read(&self) -> Option<SystemSnapshot> {
        self.buf.lock().ok()?.pop_front()
    }

    /// Wait for the next snapshot. `None` once the channel is closed and
    /// drained.
    pub async fn read(&self) -> Option<SystemSnapshot> {
        loop {
            let notified = self.notify.notified();
            if let Some(s) = self.try_read() {
                return Some(s);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// A fresh stream over the channel. Several subscribers may drain at the
    /// same time; each snapshot goes to exactly one of them.
    pub fn subscribe(self: &Arc<Self>) -> impl Stream<Item = SystemSnapshot> + Send + 'static {
        stream::unfold(Arc::clone(self), |ch| async move {
            let next = ch.read().await?;
            Some((next, ch))
        })
    }

    /// Idempotent. Later writes return false; buffered items can still be read.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }
}

impl Default for TelemetryChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
