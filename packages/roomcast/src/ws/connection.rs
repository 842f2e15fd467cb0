//! Outbound side of one live WebSocket connection.
//!
//! The socket writer task owns the receiving half of a bounded channel; everyone
//! else (the session itself, broadcasts from other sessions) holds a cloneable
//! [`ConnectionHandle`]. Closing the handle cancels the session's read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ids::ConnectionId;

use super::protocol::ServerEvent;

/// Why an event could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
    closed: CancellationToken,
    superseded: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
            superseded: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting. Used for fan-out, where one slow peer must
    /// not hold up the rest of the room.
    pub fn try_send(&self, event: ServerEvent) -> Result<(), SendFailure> {
        if self.closed.is_cancelled() {
            return Err(SendFailure::Closed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Queue an event, waiting for room in the queue. Used for replies to this
    /// connection's own client. Gives up with `Closed` as soon as the handle is
    /// closed, even while the queue is still full.
    pub async fn send(&self, event: ServerEvent) -> Result<(), SendFailure> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(SendFailure::Closed),
            sent = self.tx.send(event) => sent.map_err(|_| SendFailure::Closed),
        }
    }

    /// Ask the session owning this connection to shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Close because a newer connection took over the same room and user.
    pub fn supersede(&self) {
        self.superseded.store(true, Ordering::Release);
        self.close();
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called on any clone.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_receiver() {
        let (handle, mut rx) = ConnectionHandle::channel(4);
        handle.try_send(ServerEvent::pong()).unwrap();
        handle.send(ServerEvent::pong()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), "pong");
        assert_eq!(rx.recv().await.unwrap().kind(), "pong");
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        handle.try_send(ServerEvent::pong()).unwrap();
        assert_eq!(
            handle.try_send(ServerEvent::pong()),
            Err(SendFailure::Full)
        );
    }

    #[tokio::test]
    async fn dropped_receiver_is_closed() {
        let (handle, rx) = ConnectionHandle::channel(4);
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(
            handle.try_send(ServerEvent::pong()),
            Err(SendFailure::Closed)
        );
        assert_eq!(
            handle.send(ServerEvent::pong()).await,
            Err(SendFailure::Closed)
        );
    }

    #[tokio::test]
    async fn close_wakes_waiters_on_clones() {
        let (handle, _rx) = ConnectionHandle::channel(4);
        let clone = handle.clone();
        let waiter = tokio::spawn(async move { clone.closed().await });

        handle.close();
        waiter.await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(
            handle.try_send(ServerEvent::pong()),
            Err(SendFailure::Closed)
        );
    }

    #[tokio::test]
    async fn close_unblocks_send_on_full_queue() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        handle.try_send(ServerEvent::pong()).unwrap();

        let sender = handle.clone();
        let pending = tokio::spawn(async move { sender.send(ServerEvent::pong()).await });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        handle.close();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), pending)
            .await
            .expect("send stayed blocked after close")
            .unwrap();
        assert_eq!(result, Err(SendFailure::Closed));
    }

    #[test]
    fn supersede_closes_and_is_visible_on_clones() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        let clone = handle.clone();
        assert!(!clone.is_superseded());

        handle.supersede();
        assert!(clone.is_superseded());
        assert!(clone.is_closed());

        let (plain, _rx) = ConnectionHandle::channel(1);
        plain.close();
        assert!(!plain.is_superseded());
    }

    #[test]
    fn handles_get_distinct_ids() {
        let (a, _) = ConnectionHandle::channel(1);
        let (b, _) = ConnectionHandle::channel(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
