//! Presence transitions seen through live connections

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{send_to_user, TestHarness};
use realtime_chat_core::error::AppResult;
use realtime_chat_core::models::{User, UserId};
use realtime_chat_core::store::{MemoryStore, Stores, UserStore};
use realtime_chat_core::websocket::{ConnectionId, OutboundEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLOW_PERSIST: Duration = Duration::from_millis(1500);

/// Users store whose online writes for one user take a while
struct SlowOnlineWrites {
    inner: Arc<MemoryStore>,
    slow_user: UserId,
}

#[async_trait]
impl UserStore for SlowOnlineWrites {
    async fn upsert_identity(&self, id: UserId, username: &str) -> AppResult<User> {
        self.inner.upsert_identity(id, username).await
    }

    async fn get(&self, id: UserId) -> AppResult<Option<User>> {
        UserStore::get(self.inner.as_ref(), id).await
    }

    async fn set_presence(&self, id: UserId, online: bool, at: DateTime<Utc>) -> AppResult<()> {
        if online && id == self.slow_user {
            tokio::time::sleep(SLOW_PERSIST).await;
        }
        self.inner.set_presence(id, online, at).await
    }

    async fn reset_presence(&self) -> AppResult<u64> {
        self.inner.reset_presence().await
    }

    async fn block(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner.block(owner, target).await
    }

    async fn unblock(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner.unblock(owner, target).await
    }

    async fn star(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner.star(owner, target).await
    }

    async fn unstar(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner.unstar(owner, target).await
    }

    async fn is_blocked_by(&self, owner: UserId, target: UserId) -> AppResult<bool> {
        self.inner.is_blocked_by(owner, target).await
    }
}

fn slow_for(user: UserId) -> TestHarness {
    let memory = Arc::new(MemoryStore::new());
    let stores = Stores {
        users: Arc::new(SlowOnlineWrites {
            inner: memory.clone(),
            slow_user: user,
        }),
        conversations: memory.clone(),
        messages: memory.clone(),
    };
    TestHarness::with_stores(memory, stores)
}

fn presence_of(events: &[OutboundEvent], user: UserId) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::PresenceChanged {
                user_id, is_online, ..
            } if *user_id == user => Some(*is_online),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_second_connection_does_not_rebroadcast_online() {
    let harness = TestHarness::new();
    let (alice, bob) = (UserId::random(), UserId::random());
    let mut watcher = harness.connect(bob, "bob").await;

    let mut first = harness.connect(alice, "alice").await;
    let mut second = harness.connect(alice, "alice").await;
    assert_eq!(presence_of(&watcher.drain(), alice), vec![true]);

    harness.disconnect(&mut first).await;
    assert!(presence_of(&watcher.drain(), alice).is_empty());
    assert!(harness.state.presence.is_online(alice).await);

    harness.disconnect(&mut second).await;
    assert_eq!(presence_of(&watcher.drain(), alice), vec![false]);
    assert!(!harness.state.presence.is_online(alice).await);
}

#[tokio::test]
async fn test_presence_is_persisted_with_last_seen() {
    let harness = TestHarness::new();
    let alice = UserId::random();

    let mut client = harness.connect(alice, "alice").await;
    let stored = harness.store.get(alice).await.unwrap().unwrap();
    assert!(stored.is_online);
    assert_eq!(stored.username, "alice");
    let online_at = stored.last_seen.expect("last seen set on connect");

    harness.disconnect(&mut client).await;
    let stored = harness.store.get(alice).await.unwrap().unwrap();
    assert!(!stored.is_online);
    assert!(stored.last_seen.unwrap() >= online_at);
}

#[tokio::test]
async fn test_flush_on_shutdown_marks_everyone_offline() {
    let harness = TestHarness::new();
    let users = [UserId::random(), UserId::random()];
    let mut clients = Vec::new();
    for (i, user) in users.into_iter().enumerate() {
        clients.push(harness.connect(user, &format!("user{i}")).await);
    }

    assert_eq!(harness.state.presence.flush_offline().await, 2);
    for user in users {
        assert!(!harness.store.get(user).await.unwrap().unwrap().is_online);
        assert!(!harness.state.presence.is_online(user).await);
    }
}

#[tokio::test]
async fn test_slow_presence_write_does_not_delay_other_deliveries() {
    let (alice, bob, carol) = (UserId::random(), UserId::random(), UserId::random());
    let harness = slow_for(carol);
    let mut a = harness.connect(alice, "alice").await;
    let mut b = harness.connect(bob, "bob").await;

    let carol_connects = harness.connect(carol, "carol");
    let alice_sends = async {
        // Let carol's connect reach the store first
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        harness.send(&mut a, send_to_user(bob, "still here")).await;
        started.elapsed()
    };
    let (_carol, elapsed) = tokio::join!(carol_connects, alice_sends);

    assert!(elapsed < Duration::from_millis(500), "send took {elapsed:?}");
    assert!(matches!(
        &b.drain_non_presence()[..],
        [OutboundEvent::ReceivePrivateMessage(_)]
    ));
}

#[tokio::test]
async fn test_transitions_of_one_user_land_in_order() {
    let (bob, carol) = (UserId::random(), UserId::random());
    let harness = slow_for(carol);
    let mut watcher = harness.connect(bob, "bob").await;
    harness.store.upsert_identity(carol, "carol").await.unwrap();

    let presence = harness.state.presence.clone();
    let handle = ConnectionId::new();
    let goes_online = presence.register(carol, handle);
    let goes_offline = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        presence.unregister(handle).await
    };
    let (came_online, went_offline) = tokio::join!(goes_online, goes_offline);

    assert!(came_online);
    assert_eq!(went_offline, Some(carol));
    assert_eq!(presence_of(&watcher.drain(), carol), vec![true, false]);
    assert!(!harness.store.get(carol).await.unwrap().unwrap().is_online);
}
