//! Per-client socket handle.
//!
//! The WebSocket itself is split: a writer task owns the sink, and everything
//! else talks to it through a [`ClientSocket`]. Closing the handle tells the
//! writer to send a close frame and stop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use palaver_core::SessionId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Policy violation (capacity reached).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Handle to one connected client.
pub struct ClientSocket {
    /// Session identity (`host:port`).
    pub id: SessionId,
    /// Wall-clock connect time, for reporting.
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
    created: Instant,
    connected: AtomicBool,
    closed: CancellationToken,
    close_frame: Mutex<Option<(u16, String)>>,
    frames_sent: AtomicU64,
}

impl ClientSocket {
    /// Wrap the sending half of a writer channel.
    pub fn new(id: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            tx,
            created: Instant::now(),
            connected: AtomicBool::new(true),
            closed: CancellationToken::new(),
            close_frame: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Queue a text frame.
    ///
    /// Waits for buffer space. Returns `false` if the socket is closed or the
    /// writer is gone.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        if !self.is_connected() {
            return false;
        }
        let text = text.into();
        let sent = tokio::select! {
            biased;
            () = self.closed.cancelled() => false,
            result = self.tx.send(text) => result.is_ok(),
        };
        if sent {
            let _ = self.frames_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.mark_disconnected();
        }
        sent
    }

    /// Close the socket with `code`. Only the first close takes effect.
    pub fn close(&self, code: u16, reason: &str) {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_some() {
                return;
            }
            *frame = Some((code, reason.to_string()));
        }
        self.mark_disconnected();
        self.closed.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Code and reason passed to [`close`](Self::close).
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.close_frame.lock().clone()
    }

    /// Whether the transport is still believed to be up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record that the transport went away.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Frames successfully queued.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocket")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::*;

    /// Socket plus the receiving end a writer task would own.
    pub(crate) fn socket(id: &str) -> (Arc<ClientSocket>, mpsc::Receiver<String>) {
        socket_with_capacity(id, 64)
    }

    pub(crate) fn socket_with_capacity(
        id: &str,
        capacity: usize,
    ) -> (Arc<ClientSocket>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ClientSocket::new(SessionId::from_raw(id), tx)), rx)
    }

    /// Everything queued so far.
    pub(crate) fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn new_socket_is_connected() {
        let (socket, _rx) = socket("1.1.1.1:1");
        assert!(socket.is_connected());
        assert!(!socket.is_closed());
        assert_eq!(socket.id.as_str(), "1.1.1.1:1");
        assert!(socket.close_frame().is_none());
    }

    #[tokio::test]
    async fn send_text_queues_frame() {
        let (socket, mut rx) = socket("a:1");
        assert!(socket.send_text("hello").await);
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert_eq!(socket.frames_sent(), 1);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_fails() {
        let (socket, rx) = socket("a:2");
        drop(rx);
        assert!(!socket.send_text("x").await);
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (socket, mut rx) = socket("a:3");
        socket.close(CLOSE_NORMAL, "bye");
        assert!(!socket.send_text("x").await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_unblocks_waiting_sender() {
        let (socket, _rx) = socket_with_capacity("a:4", 1);
        assert!(socket.send_text("fill").await);
        let waiter = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.send_text("blocked").await })
        };
        tokio::task::yield_now().await;
        socket.close(CLOSE_NORMAL, "");
        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn first_close_wins() {
        let (socket, _rx) = socket("a:5");
        socket.close(CLOSE_POLICY_VIOLATION, "full");
        socket.close(CLOSE_NORMAL, "later");
        assert_eq!(socket.close_frame(), Some((CLOSE_POLICY_VIOLATION, "full".into())));
        assert!(socket.is_closed());
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn closed_future_resolves() {
        let (socket, _rx) = socket("a:6");
        socket.close(CLOSE_GOING_AWAY, "shutdown");
        socket.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_time() {
        let (socket, _rx) = socket("a:7");
        tokio::time::advance(Duration::from_secs(42)).await;
        assert!(socket.age() >= Duration::from_secs(42));
    }

    #[test]
    fn mark_disconnected_keeps_open_handle() {
        let (socket, _rx) = socket("a:8");
        socket.mark_disconnected();
        assert!(!socket.is_connected());
        assert!(!socket.is_closed());
    }
}
