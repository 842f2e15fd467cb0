//! Shared chat state handed to every room session.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ChatConfig;
use crate::metrics::{HealthStatus, RoomHealth, ServerMetrics};
use crate::services::ChatServices;

use super::broadcast::{Broadcaster, RoomSequencer};
use super::presence::PresenceView;
use super::registry::ConnectionRegistry;

pub struct ChatHub {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
    pub presence: PresenceView,
    pub sequencer: RoomSequencer,
    pub services: ChatServices,
    pub config: ChatConfig,
    pub metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
}

impl ChatHub {
    pub fn new(services: ChatServices, config: ChatConfig, metrics: Arc<ServerMetrics>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(registry.clone(), metrics.clone()),
            presence: PresenceView::new(registry.clone(), services.identities.clone()),
            sequencer: RoomSequencer::new(),
            registry,
            services,
            config,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn health(&self) -> HealthStatus {
        HealthStatus {
            status: if self.is_shutting_down() {
                "shutting_down".to_string()
            } else {
                "healthy".to_string()
            },
            rooms: RoomHealth {
                active: self.registry.room_count().await as u64,
                members_online: self.registry.connection_count().await as u64,
            },
            connections: self.metrics.active_connections.load(Ordering::Relaxed),
            uptime_secs: self.metrics.uptime_secs(),
        }
    }

    /// Tell every running session to close. Each one runs its own teardown.
    pub async fn shutdown(&self) {
        info!(
            "Closing {} room connection(s)",
            self.registry.connection_count().await
        );
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn shutting_down(&self) {
        self.shutdown.cancelled().await;
    }
}
