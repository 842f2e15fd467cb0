//! Room fan-out.
//!
//! A broadcast takes a snapshot of the room's connections, then sends to each one
//! without holding the registry lock. Sends never wait: a recipient whose queue is
//! closed or full is skipped for this event and evicted once the sweep is done.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::ids::{RoomId, UserId};
use crate::metrics::ServerMetrics;

use super::protocol::ServerEvent;
use super::registry::ConnectionRegistry;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients removed from the room because their send failed.
    pub evicted: Vec<UserId>,
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<ServerMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Send `event` to everyone connected to the room, except `exclude`.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        event: &ServerEvent,
        exclude: Option<UserId>,
    ) -> BroadcastReport {
        let recipients = self.registry.connections_in_room(room_id).await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (user_id, handle) in recipients {
            if exclude == Some(user_id) {
                continue;
            }
            match handle.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        room_id = %room_id,
                        user_id = %user_id,
                        event = event.kind(),
                        "Broadcast send failed: {}",
                        e
                    );
                    failed.push((user_id, handle));
                }
            }
        }

        let failures = failed.len();
        let mut evicted = Vec::new();
        for (user_id, handle) in failed {
            if self
                .registry
                .unregister_connection(room_id, user_id, handle.id())
                .await
            {
                evicted.push(user_id);
            }
            handle.close();
        }

        self.metrics
            .record_broadcast(delivered, failures, evicted.len());
        debug!(
            room_id = %room_id,
            event = event.kind(),
            delivered,
            evicted = evicted.len(),
            "Broadcast complete"
        );

        BroadcastReport { delivered, evicted }
    }
}

/// Per-room gate that keeps "store then broadcast" atomic with respect to other
/// senders in the same room, so every member observes messages in storage order.
#[derive(Default)]
pub struct RoomSequencer {
    gates: Mutex<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl RoomSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the room's gate. Hold the guard across append and broadcast.
    pub async fn enter(&self, room_id: RoomId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().await;
            // Gates nobody is waiting on or holding are dropped as we go.
            gates.retain(|id, gate| *id == room_id || Arc::strong_count(gate) > 1);
            gates.entry(room_id).or_default().clone()
        };
        gate.lock_owned().await
    }

    pub async fn gate_count(&self) -> usize {
        self.gates.lock().await.len()
    }
}
