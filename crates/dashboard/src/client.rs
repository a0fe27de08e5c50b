//! Connected dashboard clients.
//!
//! Uses lock-free DashMap for concurrent register/broadcast.

use crate::error::{DashboardError, Result};
use crate::protocol::ServerMessage;
use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique client identifier.
pub type ClientId = Uuid;

/// Buffer size for client message channels. Dashboard traffic is a handful
/// of messages per order, so a slow client is dropped well before this fills.
pub const CLIENT_CHANNEL_BUFFER_SIZE: usize = 64;

/// State for a single connected client.
pub struct ClientState {
    pub id: ClientId,
    /// Channel to the client's WebSocket writer.
    pub tx: mpsc::Sender<Message>,
    /// Timestamp of last ping received.
    pub last_ping: AtomicI64,
}

impl ClientState {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            tx,
            last_ping: AtomicI64::new(now),
        }
    }

    /// Send a message to this client. Fails if its buffer is full.
    pub fn send(&self, msg: ServerMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .try_send(Message::Text(json.into()))
            .map_err(|_| DashboardError::ChannelSend)
    }

    pub fn update_ping(&self) {
        self.last_ping
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_ping_time(&self) -> i64 {
        self.last_ping.load(Ordering::Relaxed)
    }
}

/// Registry of connected clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientState>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn register(&self, client: Arc<ClientState>) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        info!("Client {} registered", id);
        id
    }

    pub fn unregister(&self, client_id: &ClientId) {
        if self.clients.remove(client_id).is_some() {
            info!("Client {} unregistered", client_id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Send a message to every client. Returns how many accepted it.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        if self.clients.is_empty() {
            return 0;
        }

        // Serialize once for all clients
        let json = match serde_json::to_string(msg) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize broadcast message: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            match client.tx.try_send(Message::Text(json.clone().into())) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Failed to send to client {}: {}", client.id, e),
            }
        }
        delivered
    }

    /// Remove clients that haven't pinged within `max_idle_ms`.
    pub fn cleanup_stale_clients(&self, max_idle_ms: i64) -> usize {
        let now = Utc::now().timestamp_millis();
        let stale_ids: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| now - entry.value().last_ping_time() > max_idle_ms)
            .map(|entry| *entry.key())
            .collect();

        for id in &stale_ids {
            warn!("Removing stale client {}", id);
            self.unregister(id);
        }
        stale_ids.len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
