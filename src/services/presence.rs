//! Identity and presence registry.
//!
//! Maps each user to the set of live connections they hold. The first
//! connection of a user flips them online, removing the last one flips them
//! offline; each flip is persisted and broadcast to every open connection.

use super::bounded;
use crate::metrics::ONLINE_USERS;
use crate::models::UserId;
use crate::store::UserStore;
use crate::websocket::{ConnectionId, ConnectionRegistry, OutboundEvent};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct Bindings {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_handle: HashMap<ConnectionId, UserId>,
    // Serializes the transitions of one user
    gates: HashMap<UserId, Arc<Mutex<()>>>,
}

impl Bindings {
    fn gate(&mut self, user: UserId) -> Arc<Mutex<()>> {
        self.gates.entry(user).or_default().clone()
    }

    /// Forget the gate of an offline user nobody else is waiting on.
    /// Gates are only cloned under the bindings lock, so a count of two
    /// (map plus caller) means no other holder.
    fn release_gate(&mut self, user: UserId, gate: &Arc<Mutex<()>>) {
        if !self.by_user.contains_key(&user) && Arc::strong_count(gate) == 2 {
            self.gates.remove(&user);
        }
    }
}

pub struct PresenceRegistry {
    // Only held for map updates. Persisting and broadcasting happen under
    // the per-user gate so other users' deliveries never wait on them.
    bindings: Mutex<Bindings>,
    users: Arc<dyn UserStore>,
    connections: ConnectionRegistry,
    io_timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(
        users: Arc<dyn UserStore>,
        connections: ConnectionRegistry,
        io_timeout: Duration,
    ) -> Self {
        Self {
            bindings: Mutex::new(Bindings::default()),
            users,
            connections,
            io_timeout,
        }
    }

    /// Bind a connection to a user. Returns true when the user came online.
    pub async fn register(&self, user: UserId, handle: ConnectionId) -> bool {
        let gate = self.bindings.lock().await.gate(user);
        let _turn = gate.lock().await;

        let came_online = {
            let mut bindings = self.bindings.lock().await;
            if bindings.by_handle.contains_key(&handle) {
                false
            } else {
                bindings.by_handle.insert(handle, user);
                let handles = bindings.by_user.entry(user).or_default();
                let came_online = handles.is_empty();
                handles.insert(handle);
                ONLINE_USERS.set(bindings.by_user.len() as i64);
                came_online
            }
        };

        if came_online {
            self.publish(user, true, Utc::now()).await;
        }
        came_online
    }

    /// Remove a connection. Returns the user when this was their last
    /// connection. Unknown handles are a no-op.
    pub async fn unregister(&self, handle: ConnectionId) -> Option<UserId> {
        let (user, gate) = {
            let mut bindings = self.bindings.lock().await;
            let user = *bindings.by_handle.get(&handle)?;
            (user, bindings.gate(user))
        };
        let _turn = gate.lock().await;

        let went_offline = {
            let mut bindings = self.bindings.lock().await;
            // False when a concurrent unregister of the same handle got here first
            let bound = bindings.by_handle.remove(&handle).is_some();

            let went_offline = bound
                && match bindings.by_user.get_mut(&user) {
                    Some(handles) => {
                        handles.remove(&handle);
                        handles.is_empty()
                    }
                    None => false,
                };
            if went_offline {
                bindings.by_user.remove(&user);
            }
            ONLINE_USERS.set(bindings.by_user.len() as i64);
            went_offline
        };

        if went_offline {
            self.publish(user, false, Utc::now()).await;
        }

        self.bindings.lock().await.release_gate(user, &gate);
        went_offline.then_some(user)
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.bindings.lock().await.by_user.contains_key(&user)
    }

    /// Live connections of a user, empty when offline
    pub async fn handles_for(&self, user: UserId) -> Vec<ConnectionId> {
        let bindings = self.bindings.lock().await;
        let mut handles: Vec<ConnectionId> = bindings
            .by_user
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    pub async fn online_count(&self) -> usize {
        self.bindings.lock().await.by_user.len()
    }

    /// Shutdown path: forget every binding and persist everyone offline
    pub async fn flush_offline(&self) -> usize {
        let users: Vec<UserId> = {
            let mut bindings = self.bindings.lock().await;
            bindings.by_handle.clear();
            bindings.gates.clear();
            ONLINE_USERS.set(0);
            bindings.by_user.drain().map(|(user, _)| user).collect()
        };

        let now = Utc::now();
        for user in &users {
            self.persist(*user, false, now).await;
        }
        tracing::info!(count = users.len(), "presence flushed to offline");
        users.len()
    }

    async fn persist(&self, user: UserId, online: bool, at: DateTime<Utc>) {
        if let Err(e) = bounded(
            self.io_timeout,
            "persist presence",
            self.users.set_presence(user, online, at),
        )
        .await
        {
            tracing::warn!(user_id = %user, online, error = %e, "failed to persist presence");
        }
    }

    async fn publish(&self, user: UserId, online: bool, at: DateTime<Utc>) {
        self.persist(user, online, at).await;

        let frame = OutboundEvent::PresenceChanged {
            user_id: user,
            is_online: online,
            last_seen: Some(at),
        }
        .to_frame();
        let reached = self.connections.broadcast_all(&frame).await;
        tracing::debug!(user_id = %user, online, reached, "presence changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn registry() -> (Arc<MemoryStore>, PresenceRegistry, ConnectionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let connections = ConnectionRegistry::new();
        let presence =
            PresenceRegistry::new(store.clone(), connections.clone(), Duration::from_secs(1));
        (store, presence, connections)
    }

    #[tokio::test]
    async fn test_multiple_handles_per_user() {
        let (store, presence, _connections) = registry().await;
        let user = UserId::random();
        store.upsert_identity(user, "alice").await.unwrap();
        let (h1, h2) = (ConnectionId::new(), ConnectionId::new());

        assert!(presence.register(user, h1).await);
        assert!(!presence.register(user, h2).await);
        assert_eq!(presence.handles_for(user).await.len(), 2);

        assert_eq!(presence.unregister(h1).await, None);
        assert!(presence.is_online(user).await);

        assert_eq!(presence.unregister(h2).await, Some(user));
        assert!(!presence.is_online(user).await);
        assert!(presence.handles_for(user).await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let (_store, presence, _connections) = registry().await;
        assert_eq!(presence.unregister(ConnectionId::new()).await, None);
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let (store, presence, connections) = registry().await;
        let (_watcher, mut rx) = connections.add_connection().await;
        let user = UserId::random();
        store.upsert_identity(user, "alice").await.unwrap();
        let handle = ConnectionId::new();

        presence.register(user, handle).await;
        let frame = rx.recv().await.unwrap();
        let event: OutboundEvent = serde_json::from_str(&frame).unwrap();
        assert!(matches!(event, OutboundEvent::PresenceChanged { is_online: true, .. }));

        presence.unregister(handle).await;
        let frame = rx.recv().await.unwrap();
        let event: OutboundEvent = serde_json::from_str(&frame).unwrap();
        assert!(matches!(event, OutboundEvent::PresenceChanged { is_online: false, .. }));
    }

    #[tokio::test]
    async fn test_flush_offline_persists() {
        let (store, presence, _connections) = registry().await;
        let user = UserId::random();
        store.upsert_identity(user, "alice").await.unwrap();
        presence.register(user, ConnectionId::new()).await;

        assert_eq!(presence.flush_offline().await, 1);
        let stored = UserStore::get(store.as_ref(), user).await.unwrap().unwrap();
        assert!(!stored.is_online);
        assert_eq!(presence.online_count().await, 0);
    }
}
