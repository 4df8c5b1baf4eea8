//! Live client sessions: admission cap, activity timestamps, outbound queues.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

/// One serialized frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Server at capacity ({max} connections)")]
    AtCapacity { max: usize },
    #[error("Origin not allowed: {0}")]
    OriginRejected(String),
    #[error("Connection id already registered: {0}")]
    Duplicate(String),
    #[error("Unauthorized")]
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// Queue full: the frame was skipped for this client only.
    Lagged,
    Closed,
}

struct Activity {
    at: Instant,
    wall: DateTime<Utc>,
}

pub struct Connection {
    id: String,
    remote_address: String,
    connected_at: DateTime<Utc>,
    activity: Mutex<Activity>,
    state: AtomicU8,
    tx: mpsc::Sender<Frame>,
    close_reason: OnceCell<String>,
    closing: watch::Sender<bool>,
}

impl Connection {
    fn new(id: String, remote_address: String, queue: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let (closing, _) = watch::channel(false);
        let now = Utc::now();
        let conn = Connection {
            id,
            remote_address,
            connected_at: now,
            activity: Mutex::new(Activity {
                at: Instant::now(),
                wall: now,
            }),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            tx,
            close_reason: OnceCell::new(),
            closing,
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wall
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        let at = self
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .at;
        now.saturating_duration_since(at)
    }

    pub fn touch(&self) {
        let mut a = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        a.at = Instant::now();
        a.wall = Utc::now();
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Non-blocking enqueue used by the broadcaster.
    pub fn try_push(&self, frame: Frame) -> Push {
        if self.is_closing() {
            return Push::Closed;
        }
        match self.tx.try_send(frame) {
            Ok(()) => Push::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Push::Lagged,
            Err(mpsc::error::TrySendError::Closed(_)) => Push::Closed,
        }
    }

    /// Enqueue a reply, waiting for queue space. False once the writer is gone.
    pub async fn send(&self, frame: Frame) -> bool {
        if self.is_closing() {
            return false;
        }
        self.tx.send(frame).await.is_ok()
    }

    /// Ask this connection to close. The first reason wins.
    pub fn close(&self, reason: &str) {
        let _ = self.close_reason.set(reason.to_string());
        let _ = self.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.closing.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.get().map(String::as_str)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closing.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub lagged: usize,
    pub removed: usize,
}

pub struct ConnectionRegistry {
    conns: RwLock<HashMap<String, Arc<Connection>>>,
    max: usize,
    queue: usize,
    registered: Notify,
}

impl ConnectionRegistry {
    pub fn new(max: usize, queue: usize) -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
            max,
            queue,
            registered: Notify::new(),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max
    }

    /// Check the cap and insert in one critical section.
    pub fn register(
        &self,
        id: Option<String>,
        remote_address: &str,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Frame>), AdmissionError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut conns = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        if conns.contains_key(&id) {
            return Err(AdmissionError::Duplicate(id));
        }
        if conns.len() >= self.max {
            return Err(AdmissionError::AtCapacity { max: self.max });
        }
        let (conn, rx) = Connection::new(id.clone(), remote_address.to_string(), self.queue);
        conns.insert(id, Arc::clone(&conn));
        drop(conns);
        debug!(conn = %conn.id(), addr = %remote_address, "registered");
        self.registered.notify_waiters();
        Ok((conn, rx))
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self
            .conns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            debug!(conn = %id, "unregistered");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn touch(&self, id: &str) -> bool {
        match self.get(id) {
            Some(c) => {
                c.touch();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn can_accept(&self) -> bool {
        self.len() < self.max
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Remove and return every connection idle for at least `timeout`.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        self.evict_idle_at(timeout, Instant::now())
    }

    pub fn evict_idle_at(&self, timeout: Duration, now: Instant) -> Vec<Arc<Connection>> {
        let mut conns = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<String> = conns
            .values()
            .filter(|c| c.idle_for(now) >= timeout)
            .map(|c| c.id().to_string())
            .collect();
        stale.iter().filter_map(|id| conns.remove(id)).collect()
    }

    /// Queue one frame for every connection without waiting on any of them.
    /// Connections whose writer has gone away are dropped from the registry.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();
        for conn in self.connections() {
            match conn.try_push(Arc::clone(frame)) {
                Push::Queued => report.delivered += 1,
                Push::Lagged => {
                    report.lagged += 1;
                    warn!(conn = %conn.id(), "client queue full, skipping snapshot");
                }
                Push::Closed => dead.push(conn),
            }
        }
        for conn in dead {
            if self.unregister(conn.id()).is_some() {
                report.removed += 1;
            }
            conn.close("Send failed");
        }
        report
    }

    /// Close every open connection (server shutdown).
    pub fn close_all(&self, reason: &str) {
        for conn in self.connections() {
            conn.close(reason);
        }
    }

    /// Wait until at least one client is registered.
    pub async fn wait_for_clients(&self) {
        loop {
            let notified = self.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_is_enforced_at_registration() {
        let reg = ConnectionRegistry::new(2, 4);
        let _a = reg.register(None, "10.0.0.1").unwrap();
        let _b = reg.register(None, "10.0.0.2").unwrap();
        assert!(!reg.can_accept());
        assert!(matches!(
            reg.register(None, "10.0.0.3"),
            Err(AdmissionError::AtCapacity { max: 2 })
        ));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn duplicate_ids_rejected_and_unregister_is_idempotent() {
        let reg = ConnectionRegistry::new(4, 4);
        let (c, _rx) = reg.register(Some("abc".into()), "127.0.0.1").unwrap();
        assert_eq!(c.id(), "abc");
        assert!(matches!(
            reg.register(Some("abc".into()), "127.0.0.1"),
            Err(AdmissionError::Duplicate(_))
        ));
        assert!(reg.unregister("abc").is_some());
        assert!(reg.unregister("abc").is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn idle_connections_are_evicted() {
        let reg = ConnectionRegistry::new(4, 4);
        let (a, _ra) = reg.register(Some("a".into()), "127.0.0.1").unwrap();
        let (_b, _rb) = reg.register(Some("b".into()), "127.0.0.1").unwrap();
        let later = Instant::now() + Duration::from_secs(30);
        assert!(reg.evict_idle_at(Duration::from_secs(60), later).is_empty());
        a.touch();
        let much_later = Instant::now() + Duration::from_secs(61);
        let evicted = reg.evict_idle_at(Duration::from_secs(60), much_later);
        assert_eq!(evicted.len(), 2);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_and_drops_dead() {
        let reg = ConnectionRegistry::new(4, 1);
        let (_a, mut ra) = reg.register(Some("a".into()), "127.0.0.1").unwrap();
        let (_b, rb) = reg.register(Some("b".into()), "127.0.0.1").unwrap();
        drop(rb);

        let frame: Frame = Arc::from("{}");
        let r = reg.broadcast(&frame);
        assert_eq!(r, BroadcastReport { delivered: 1, lagged: 0, removed: 1 });
        assert_eq!(reg.len(), 1);
        assert_eq!(ra.recv().await.as_deref(), Some("{}"));

        // queue of one: second frame lags while the first is unread
        reg.broadcast(&frame);
        let r = reg.broadcast(&frame);
        assert_eq!(r.lagged, 1);
    }

    #[tokio::test]
    async fn close_records_first_reason() {
        let reg = ConnectionRegistry::new(4, 4);
        let (c, _rx) = reg.register(None, "127.0.0.1").unwrap();
        c.mark_open();
        assert_eq!(c.state(), ConnectionState::Open);
        c.close("Idle timeout");
        c.close("Server shutdown");
        c.closed().await;
        assert_eq!(c.close_reason(), Some("Idle timeout"));
        assert_eq!(c.state(), ConnectionState::Closing);
        assert_eq!(c.try_push(Arc::from("x")), Push::Closed);
    }

    #[tokio::test]
    async fn wait_for_clients_wakes_on_register() {
        let reg = Arc::new(ConnectionRegistry::new(4, 4));
        let waiter = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.wait_for_clients().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _c = reg.register(None, "127.0.0.1").unwrap();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
