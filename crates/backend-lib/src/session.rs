// ============================
// crates/backend-lib/src/session.rs
// ============================
//! Per-connection outbound session queue.
//!
//! Each WebSocket connection owns one [`SessionHandle`]. Room actors push
//! events into it without ever awaiting; the connection's writer task drains
//! it. The queue is bounded: when a slow consumer falls behind, the oldest
//! *signaling* frame is shed first (WebRTC renegotiates), and chat or
//! lifecycle events are only shed once no signaling frames remain.
//!
//! A handle is single-consumer: exactly one task may call [`SessionHandle::recv`].

use metrics::counter;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use teleconsult_common::ServerEvent;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::SESSION_EVENTS_DROPPED;

/// Cloneable handle to one connection's outbound queue
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    /// Distinguishes this socket from a later reconnect by the same user
    connection_id: Uuid,
    capacity: usize,
    queue: Mutex<VecDeque<ServerEvent>>,
    /// Woken on enqueue (single consumer)
    wakeup: Notify,
    /// Woken exactly once, when the session closes
    shutdown: Notify,
    closed: AtomicBool,
}

impl SessionHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                connection_id: Uuid::new_v4(),
                capacity: capacity.max(1),
                queue: Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                shutdown: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Identity of the underlying socket. Room actors use this to ignore
    /// disconnect notices from a socket that has already been replaced.
    pub fn connection_id(&self) -> Uuid {
        self.inner.connection_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Enqueue an event for delivery. Never blocks; silently discarded once
    /// the session is closed. On overflow the oldest signaling frame is
    /// dropped, falling back to the queue head if none is present.
    pub fn send(&self, event: ServerEvent) {
        if self.is_closed() {
            return;
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                let victim = queue
                    .iter()
                    .position(ServerEvent::is_signaling)
                    .unwrap_or(0);
                if let Some(dropped) = queue.remove(victim) {
                    debug!(
                        connection_id = %self.inner.connection_id,
                        kind = dropped.kind(),
                        "outbound queue full, dropping oldest event"
                    );
                    counter!(SESSION_EVENTS_DROPPED).increment(1);
                }
            }
            queue.push_back(event);
        }

        self.inner.wakeup.notify_one();
    }

    /// Dequeue the next event, waiting if the queue is empty. Returns `None`
    /// once the session is closed and the queue is drained.
    pub async fn recv(&self) -> Option<ServerEvent> {
        loop {
            let notified = self.inner.wakeup.notified();

            if let Some(event) = self.inner.queue.lock().pop_front() {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    /// Close the session. Idempotent; wakes the consumer and anyone parked
    /// on [`SessionHandle::closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.wakeup.notify_waiters();
            self.inner.shutdown.notify_waiters();
        }
    }

    /// Resolves once the session has been closed, by whichever side.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.shutdown.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("connection_id", &self.inner.connection_id)
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}
