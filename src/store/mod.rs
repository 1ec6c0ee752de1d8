//! Durable record stores.
//!
//! The chat core never talks to a database directly; it goes through these
//! traits so the same services run against PostgreSQL in production and the
//! in-memory backend in tests and local runs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationDraft, ConversationId, Message, MessageDraft, MessageId, User,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user record on first sight of an identity. An existing
    /// record is returned untouched.
    async fn upsert_identity(&self, id: UserId, username: &str) -> AppResult<User>;

    async fn get(&self, id: UserId) -> AppResult<Option<User>>;

    async fn set_presence(&self, id: UserId, online: bool, at: DateTime<Utc>) -> AppResult<()>;

    /// Mark every user offline. Returns the number of rows changed.
    async fn reset_presence(&self) -> AppResult<u64>;

    async fn block(&self, owner: UserId, target: UserId) -> AppResult<()>;

    async fn unblock(&self, owner: UserId, target: UserId) -> AppResult<()>;

    async fn star(&self, owner: UserId, target: UserId) -> AppResult<()>;

    async fn unstar(&self, owner: UserId, target: UserId) -> AppResult<()>;

    /// Whether `owner` has `target` in their block list
    async fn is_blocked_by(&self, owner: UserId, target: UserId) -> AppResult<bool>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Single atomic insert-or-return keyed by the draft's canonical key.
    /// Concurrent callers with the same key all receive the same record.
    async fn upsert_by_key(&self, draft: &ConversationDraft) -> AppResult<Conversation>;

    async fn find_by_key(&self, canonical_key: &str) -> AppResult<Option<Conversation>>;

    async fn get(&self, id: ConversationId) -> AppResult<Option<Conversation>>;

    async fn list_for_member(&self, user: UserId) -> AppResult<Vec<Conversation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assigns id, sequence number and server timestamp
    async fn append(&self, draft: MessageDraft) -> AppResult<Message>;

    async fn get(&self, id: MessageId) -> AppResult<Option<Message>>;

    /// Flip unread private messages addressed to `reader`. Returns only the
    /// rows that changed.
    async fn mark_read(
        &self,
        ids: &[MessageId],
        reader: UserId,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Message>>;

    /// Messages of a conversation in append order
    async fn history(&self, conversation: ConversationId) -> AppResult<Vec<Message>>;

    /// Latest message of every conversation `user` belongs to, newest first.
    /// Ties on timestamp go to the higher sequence number.
    async fn latest_per_conversation(&self, user: UserId)
        -> AppResult<Vec<(Conversation, Message)>>;
}

/// The three stores as trait objects, usually backed by one value
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserStore + ConversationStore + MessageStore + 'static,
    {
        Self {
            users: backend.clone(),
            conversations: backend.clone(),
            messages: backend,
        }
    }
}
