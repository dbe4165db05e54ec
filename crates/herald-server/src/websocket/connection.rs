//! Client connection handle.
//!
//! A [`ClientConnection`] is what the registry and the relay share: an
//! outbound queue drained by the socket writer task, plus a close signal the
//! shutdown coordinator can fire. It knows nothing about the socket itself.
//!
//! The queue holds [`CONTROL_SLOTS`] more frames than the echo budget, and
//! echoes never take those slots. A client that stops reading still has room
//! for its shutdown notice and its close frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use herald_core::Message;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Queue slots only control frames may use: one notice, one close.
pub const CONTROL_SLOTS: usize = 2;

/// A frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(Arc<String>),
    /// Close frame; the writer stops after sending it.
    Close {
        /// `WebSocket` close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Failure to close a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The writer is gone; the socket is already closed.
    #[error("connection already closed")]
    AlreadyClosed,
    /// The outbound queue is full; the close frame could not be queued.
    #[error("outbound queue full")]
    QueueFull,
}

/// A connected client, as seen by the registry and its relay.
pub struct ClientConnection {
    tx: mpsc::Sender<Outbound>,
    close: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a handle whose frames go to `tx`.
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            close: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a handle together with the receiving end of its queue.
    ///
    /// `buffer` is the echo budget; the queue gets [`CONTROL_SLOTS`] on top.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1) + CONTROL_SLOTS);
        (Self::new(tx), rx)
    }

    /// Queue a best-effort message for the client.
    ///
    /// Returns `false` if only control slots are left or the queue is closed,
    /// and counts the drop.
    pub fn send_message(&self, message: &Message) -> bool {
        match serialize(message) {
            Some(json) => self.send_text(Arc::new(json)),
            None => false,
        }
    }

    /// Queue a pre-serialized best-effort text frame.
    pub fn send_text(&self, text: Arc<String>) -> bool {
        if self.tx.capacity() > CONTROL_SLOTS && self.tx.try_send(Outbound::Text(text)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Queue a control message (welcome, shutdown notice), waiting up to
    /// `wait` for room. Control messages may use the reserved slots.
    pub async fn send_control(&self, message: &Message, wait: Duration) -> bool {
        let Some(json) = serialize(message) else {
            return false;
        };
        matches!(
            tokio::time::timeout(wait, self.tx.send(Outbound::Text(Arc::new(json)))).await,
            Ok(Ok(()))
        )
    }

    /// Close the connection with `code` and `reason`.
    ///
    /// The close signal fires even when the close frame cannot be queued,
    /// so a relay blocked on this connection still stops.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        self.close.cancel();
        self.tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ConnectionError::AlreadyClosed,
            })
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

fn serialize(message: &Message) -> Option<String> {
    match message.to_json() {
        Ok(json) => Some(json),
        Err(error) => {
            warn!(%error, "failed to serialize outbound message");
            None
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("closed", &self.is_closed())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use herald_core::MessageType;

    use super::*;

    fn text(frame: Outbound) -> String {
        match frame {
            Outbound::Text(t) => (*t).clone(),
            Outbound::Close { .. } => panic!("expected text frame"),
        }
    }

    #[tokio::test]
    async fn send_message_serializes() {
        let (conn, mut rx) = ClientConnection::channel(8);
        assert!(conn.send_message(&Message::welcome()));
        let parsed: Message = serde_json::from_str(&text(rx.recv().await.unwrap())).unwrap();
        assert_eq!(parsed.kind, MessageType::Welcome);
    }

    #[tokio::test]
    async fn send_to_closed_queue_counts_drop() {
        let (conn, rx) = ClientConnection::channel(8);
        drop(rx);
        assert!(!conn.send_message(&Message::welcome()));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_queue_counts_drop() {
        let (conn, _rx) = ClientConnection::channel(1);
        assert!(conn.send_text(Arc::new("a".into())));
        assert!(!conn.send_text(Arc::new("b".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_queues_frame_and_fires_signal() {
        let (conn, mut rx) = ClientConnection::channel(8);
        assert!(!conn.is_closed());
        conn.close(1001, "bye").unwrap();
        assert!(conn.is_closed());
        conn.closed().await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Close {
                code: 1001,
                reason: "bye".into()
            }
        );
    }

    #[tokio::test]
    async fn close_after_writer_gone_reports_error_but_signals() {
        let (conn, rx) = ClientConnection::channel(8);
        drop(rx);
        assert_eq!(conn.close(1000, ""), Err(ConnectionError::AlreadyClosed));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn echoes_never_take_control_slots() {
        let (conn, mut rx) = ClientConnection::channel(2);
        let sent = (0..5).filter(|_| conn.send_text(Arc::new("echo".into()))).count();
        assert_eq!(sent, 2);
        assert_eq!(conn.drop_count(), 3);

        let wait = Duration::from_millis(10);
        assert!(conn.send_control(&Message::shutdown_notice(), wait).await);
        conn.close(1001, "bye").unwrap();

        let frames: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(frames.len(), 4);
        let notice: Message = serde_json::from_str(&text(frames[2].clone())).unwrap();
        assert_eq!(notice.kind, MessageType::ShutdownNotice);
        assert_matches!(frames[3], Outbound::Close { code: 1001, .. });
    }

    #[tokio::test]
    async fn control_send_times_out_when_queue_is_full() {
        let (conn, _rx) = ClientConnection::channel(1);
        let wait = Duration::from_millis(10);
        assert!(conn.send_text(Arc::new("a".into())));
        assert!(conn.send_control(&Message::welcome(), wait).await);
        assert!(conn.send_control(&Message::welcome(), wait).await);
        assert!(!conn.send_control(&Message::welcome(), wait).await);
    }

    #[tokio::test]
    async fn close_on_full_queue_reports_error() {
        let (conn, _rx) = ClientConnection::channel(1);
        let wait = Duration::from_millis(10);
        assert!(conn.send_text(Arc::new("a".into())));
        assert!(conn.send_control(&Message::welcome(), wait).await);
        assert!(conn.send_control(&Message::welcome(), wait).await);
        assert_eq!(conn.close(1001, "x"), Err(ConnectionError::QueueFull));
        assert!(conn.is_closed());
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = ClientConnection::channel(1);
        let first = conn.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.age() > first);
    }
}
