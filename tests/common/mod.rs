//! Shared harness for integration tests: in-memory stores, a temporary
//! upload directory and direct access to the dispatcher.

#![allow(dead_code)]

use realtime_chat_core::config::Config;
use realtime_chat_core::models::UserId;
use realtime_chat_core::state::AppState;
use realtime_chat_core::store::{MemoryStore, Stores};
use realtime_chat_core::websocket::{ConnectionContext, Identity, InboundEvent, OutboundEvent};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct TestHarness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    upload_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), Stores::from_backend(store), adjust)
    }

    /// Use custom stores; `store` still backs direct assertions
    pub fn with_stores(store: Arc<MemoryStore>, stores: Stores) -> Self {
        Self::build(store, stores, |_| {})
    }

    pub fn with_stores_and_config(
        store: Arc<MemoryStore>,
        stores: Stores,
        adjust: impl FnOnce(&mut Config),
    ) -> Self {
        Self::build(store, stores, adjust)
    }

    fn build(store: Arc<MemoryStore>, stores: Stores, adjust: impl FnOnce(&mut Config)) -> Self {
        let upload_dir = tempfile::tempdir().expect("create upload dir");
        let mut config = Config::test_defaults(upload_dir.path());
        adjust(&mut config);
        Self {
            state: AppState::new(config, stores),
            store,
            upload_dir,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        self.upload_dir.path()
    }

    /// Files currently in the upload directory, including partial writes
    pub fn uploaded_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.upload_dir.path()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Open an authenticated live connection and discard its presence chatter
    pub async fn connect(&self, user: UserId, username: &str) -> TestClient {
        let identity = Identity {
            id: user,
            username: username.to_string(),
        };
        let (ctx, rx) = self.state.dispatcher.connect(Some(identity)).await;
        let mut client = TestClient { ctx, rx };
        client.drain();
        client
    }

    pub async fn connect_anonymous(&self) -> TestClient {
        let (ctx, rx) = self.state.dispatcher.connect(None).await;
        TestClient { ctx, rx }
    }

    pub async fn send(&self, client: &mut TestClient, event: InboundEvent) {
        self.state.dispatcher.handle(&mut client.ctx, event).await;
    }

    pub async fn disconnect(&self, client: &mut TestClient) {
        self.state.dispatcher.disconnect(&mut client.ctx).await;
    }
}

pub struct TestClient {
    pub ctx: ConnectionContext,
    pub rx: UnboundedReceiver<String>,
}

impl TestClient {
    /// Every frame queued so far, parsed
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            events.push(serde_json::from_str(&frame).expect("outbound frame is valid JSON"));
        }
        events
    }

    /// Queued frames other than presence broadcasts
    pub fn drain_non_presence(&mut self) -> Vec<OutboundEvent> {
        self.drain()
            .into_iter()
            .filter(|e| !matches!(e, OutboundEvent::PresenceChanged { .. }))
            .collect()
    }
}

pub fn send_to_user(receiver: UserId, text: &str) -> InboundEvent {
    InboundEvent::SendMessage {
        receiver_id: Some(receiver.to_string()),
        room_id: None,
        text: Some(text.to_string()),
    }
}

pub fn send_to_room(room: impl ToString, text: &str) -> InboundEvent {
    InboundEvent::SendMessage {
        receiver_id: None,
        room_id: Some(room.to_string()),
        text: Some(text.to_string()),
    }
}
