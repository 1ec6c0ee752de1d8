use super::{ConversationStore, MessageStore, UserStore};
use crate::error::{AppError, AppResult, Resource};
use crate::models::{
    Addressing, Conversation, ConversationDraft, ConversationId, Message, MessageDraft,
    MessageId, User, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    conversations: HashMap<ConversationId, Conversation>,
    by_key: HashMap<String, ConversationId>,
    /// Append order; index = seq - 1
    messages: Vec<Message>,
    message_index: HashMap<MessageId, usize>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Process-local backend. Every mutation happens under one write lock,
/// which makes upserts atomic and keeps `seq` and `created_at` in step.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn user_mut(&mut self, id: UserId) -> AppResult<&mut User> {
        self.users
            .get_mut(&id)
            .ok_or(AppError::NotFound(Resource::User))
    }

    /// Server clock, never running backwards relative to earlier appends
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_identity(&self, id: UserId, username: &str) -> AppResult<User> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get(&id) {
            return Ok(user.clone());
        }
        if inner.users.values().any(|u| u.username == username) {
            return Err(AppError::BadRequest(format!(
                "username {username:?} is already taken"
            )));
        }
        let user = User::new(id, username);
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn set_presence(&self, id: UserId, online: bool, at: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.is_online = online;
        user.last_seen = Some(at);
        Ok(())
    }

    async fn reset_presence(&self) -> AppResult<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for user in inner.users.values_mut().filter(|u| u.is_online) {
            user.is_online = false;
            user.last_seen = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn block(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner
            .write()
            .await
            .user_mut(owner)?
            .blocked_users
            .insert(target);
        Ok(())
    }

    async fn unblock(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner
            .write()
            .await
            .user_mut(owner)?
            .blocked_users
            .remove(&target);
        Ok(())
    }

    async fn star(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner
            .write()
            .await
            .user_mut(owner)?
            .starred_users
            .insert(target);
        Ok(())
    }

    async fn unstar(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.inner
            .write()
            .await
            .user_mut(owner)?
            .starred_users
            .remove(&target);
        Ok(())
    }

    async fn is_blocked_by(&self, owner: UserId, target: UserId) -> AppResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(&owner)
            .map(|u| u.has_blocked(&target))
            .unwrap_or(false))
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn upsert_by_key(&self, draft: &ConversationDraft) -> AppResult<Conversation> {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_key.get(draft.canonical_key()) {
            if let Some(existing) = inner.conversations.get(id) {
                return Ok(existing.clone());
            }
        }

        let conversation = draft
            .clone()
            .into_conversation(ConversationId::random(), Utc::now());
        inner
            .by_key
            .insert(conversation.canonical_key.clone(), conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_key(&self, canonical_key: &str) -> AppResult<Option<Conversation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_key
            .get(canonical_key)
            .and_then(|id| inner.conversations.get(id))
            .cloned())
    }

    async fn get(&self, id: ConversationId) -> AppResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn list_for_member(&self, user: UserId) -> AppResult<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_member(&user))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, draft: MessageDraft) -> AppResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&draft.conversation_id) {
            return Err(AppError::NotFound(Resource::Conversation));
        }

        if inner.message_index.contains_key(&draft.id) {
            return Err(AppError::BadRequest(format!("message {} already exists", draft.id)));
        }

        let created_at = inner.next_timestamp();
        let message = Message {
            id: draft.id,
            seq: inner.messages.len() as i64 + 1,
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            addressing: draft.addressing,
            text: draft.text,
            attachment: draft.attachment,
            created_at,
            is_read: false,
            read_at: None,
        };
        let position = inner.messages.len();
        inner.message_index.insert(message.id, position);
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> AppResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .message_index
            .get(&id)
            .map(|&pos| inner.messages[pos].clone()))
    }

    async fn mark_read(
        &self,
        ids: &[MessageId],
        reader: UserId,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let mut inner = self.inner.write().await;
        let wanted: HashSet<MessageId> = ids.iter().copied().collect();
        let positions: Vec<usize> = wanted
            .iter()
            .filter_map(|id| inner.message_index.get(id).copied())
            .collect();

        let mut updated = Vec::new();
        for pos in positions {
            let message = &mut inner.messages[pos];
            let addressed_to_reader = matches!(
                message.addressing,
                Addressing::Private { receiver_id } if receiver_id == reader
            );
            if addressed_to_reader && !message.is_read {
                message.is_read = true;
                message.read_at = Some(at);
                updated.push(message.clone());
            }
        }
        updated.sort_by_key(|m| m.seq);
        Ok(updated)
    }

    async fn history(&self, conversation: ConversationId) -> AppResult<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation)
            .cloned()
            .collect())
    }

    async fn latest_per_conversation(
        &self,
        user: UserId,
    ) -> AppResult<Vec<(Conversation, Message)>> {
        let inner = self.inner.read().await;
        let mut latest: HashMap<ConversationId, &Message> = HashMap::new();
        for message in &inner.messages {
            let member = inner
                .conversations
                .get(&message.conversation_id)
                .map(|c| c.is_member(&user))
                .unwrap_or(false);
            if !member {
                continue;
            }
            latest
                .entry(message.conversation_id)
                .and_modify(|current| {
                    if (message.created_at, message.seq) > (current.created_at, current.seq) {
                        *current = message;
                    }
                })
                .or_insert(message);
        }

        let mut rows: Vec<(Conversation, Message)> = latest
            .into_iter()
            .filter_map(|(id, message)| {
                inner
                    .conversations
                    .get(&id)
                    .map(|c| (c.clone(), message.clone()))
            })
            .collect();
        rows.sort_by(|(_, a), (_, b)| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        Ok(rows)
    }
}
