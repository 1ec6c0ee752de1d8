use crate::metrics::ACTIVE_CONNECTIONS;
use crate::models::ConversationId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod dispatcher;
pub mod events;

pub use dispatcher::{
    ConnectionContext, ConnectionState, Dispatcher, Identity, MessageTarget, UploadInput,
};
pub use events::{InboundEvent, OutboundEvent};

/// Unique identifier for a live connection
///
/// A user may hold several at once (one per device or tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Connection {
    sender: UnboundedSender<String>,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    // room -> subscribed connections
    rooms: HashMap<ConversationId, HashSet<ConnectionId>>,
}

/// Outbound side of every live connection.
///
/// Holds the frame sender of each connection and the room channels it has
/// joined. Knows nothing about users; the presence registry maps users to
/// connection ids.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    ///
    /// Returns the connection id and the receiver its session drains.
    pub async fn add_connection(&self) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            id,
            Connection {
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        ACTIVE_CONNECTIONS.set(guard.connections.len() as i64);

        tracing::debug!(
            "Added connection {}, total connections: {}",
            id,
            guard.connections.len()
        );

        (id, rx)
    }

    /// Drop a connection and all of its room subscriptions. Unknown ids are ignored.
    pub async fn remove_connection(&self, id: ConnectionId) {
        let mut guard = self.inner.write().await;

        let Some(connection) = guard.connections.remove(&id) else {
            return;
        };

        for room in connection.rooms {
            if let Some(members) = guard.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    guard.rooms.remove(&room);
                    tracing::debug!("Removed empty room {} from registry", room);
                }
            }
        }
        ACTIVE_CONNECTIONS.set(guard.connections.len() as i64);

        tracing::debug!(
            "Removed connection {}, remaining: {}",
            id,
            guard.connections.len()
        );
    }

    /// Subscribe a connection to a room channel. Returns false for unknown connections.
    pub async fn join_room(&self, id: ConnectionId, room: ConversationId) -> bool {
        let mut guard = self.inner.write().await;
        match guard.connections.get_mut(&id) {
            Some(connection) => {
                connection.rooms.insert(room);
            }
            None => return false,
        }
        guard.rooms.entry(room).or_default().insert(id);
        true
    }

    /// Send a frame to specific connections. Returns how many accepted it.
    pub async fn send_to(&self, ids: &[ConnectionId], msg: &str) -> usize {
        let guard = self.inner.read().await;
        ids.iter()
            .filter_map(|id| guard.connections.get(id))
            .filter(|c| c.sender.send(msg.to_string()).is_ok())
            .count()
    }

    /// Send a frame to every connection subscribed to `room`
    pub async fn send_to_room(&self, room: ConversationId, msg: &str) -> usize {
        let guard = self.inner.read().await;
        let Some(members) = guard.rooms.get(&room) else {
            return 0;
        };
        let delivered = members
            .iter()
            .filter_map(|id| guard.connections.get(id))
            .filter(|c| c.sender.send(msg.to_string()).is_ok())
            .count();

        if delivered < members.len() {
            tracing::debug!(
                "Room {}: {} of {} subscribers unreachable",
                room,
                members.len() - delivered,
                members.len()
            );
        }
        delivered
    }

    /// Send a frame to every open connection, anonymous ones included
    pub async fn broadcast_all(&self, msg: &str) -> usize {
        let guard = self.inner.read().await;
        guard
            .connections
            .values()
            .filter(|c| c.sender.send(msg.to_string()).is_ok())
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Get subscriber count for a room (for debugging/metrics)
    pub async fn room_subscriber_count(&self, room: ConversationId) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(&room).map(|m| m.len()).unwrap_or(0)
    }
}
