use super::{bounded, bounded_task};
use crate::error::{AppError, AppResult, Resource};
use crate::metrics::MESSAGES_PERSISTED_TOTAL;
use crate::models::conversation::private_key;
use crate::models::{
    Conversation, ConversationId, Message, MessageDraft, MessageId, MessagePayload, UserId,
};
use crate::store::{ConversationStore, MessageStore};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Which thread a history query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySelector {
    Conversation(ConversationId),
    PrivatePair(UserId, UserId),
}

/// One row of a conversation list: the thread and its latest message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentConversation {
    pub conversation_id: ConversationId,
    pub is_group: bool,
    /// Other participant of a private conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<ConversationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    pub last_message: MessagePayload,
}

impl RecentConversation {
    fn new(viewer: UserId, conversation: Conversation, message: Message) -> Self {
        let peer_id = conversation.peer_of(&viewer);
        let is_group = conversation.is_group;
        Self {
            conversation_id: conversation.id,
            is_group,
            peer_id,
            room_id: is_group.then_some(conversation.id),
            room_name: if is_group { conversation.name } else { None },
            last_message: message.to_payload(),
        }
    }
}

/// Durable append and retrieval of messages
#[derive(Clone)]
pub struct MessageService {
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    io_timeout: Duration,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            messages,
            conversations,
            io_timeout,
        }
    }

    /// Persist a message. Sequence and timestamp are assigned by the store.
    pub async fn append(&self, draft: MessageDraft) -> AppResult<Message> {
        self.append_or_else(draft, || async {}).await
    }

    /// Persist a message; `on_failure` runs once the append is known to
    /// have failed, however late that turns out to be.
    ///
    /// The store call is never cancelled midway. When it outlives the
    /// timeout the draft id is looked up: a row that already landed counts
    /// as success. Otherwise the caller gets `Timeout` and the still-running
    /// append settles in the background, calling `on_failure` only if it
    /// does fail.
    pub async fn append_or_else<C, Fut>(&self, draft: MessageDraft, on_failure: C) -> AppResult<Message>
    where
        C: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = draft.id;
        let store = self.messages.clone();
        let pending = bounded_task(self.io_timeout, "append message", async move {
            store.append(draft).await
        })
        .await;

        let message = match pending {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                on_failure().await;
                return Err(e);
            }
            Err(task) => match self.get(id).await {
                Ok(message) => {
                    tracing::warn!(message_id = %id, "append outlived its timeout but landed");
                    message
                }
                Err(_) => {
                    tokio::spawn(async move {
                        match task.await {
                            Ok(Ok(_)) => {
                                tracing::warn!(message_id = %id, "append landed after its send was reported failed");
                            }
                            _ => on_failure().await,
                        }
                    });
                    return Err(AppError::Timeout("append message".into()));
                }
            },
        };

        MESSAGES_PERSISTED_TOTAL
            .with_label_values(&[message.kind()])
            .inc();
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            seq = message.seq,
            "message appended"
        );
        Ok(message)
    }

    pub async fn get(&self, id: MessageId) -> AppResult<Message> {
        bounded(self.io_timeout, "load message", self.messages.get(id))
            .await?
            .ok_or(AppError::NotFound(Resource::Message))
    }

    /// Flip the read flag on messages addressed to `reader`. Messages the
    /// reader sent, group messages and already-read ones are left alone.
    pub async fn mark_read(&self, ids: &[MessageId], reader: UserId) -> AppResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        bounded(
            self.io_timeout,
            "mark messages read",
            self.messages.mark_read(ids, reader, Utc::now()),
        )
        .await
    }

    /// Messages of a thread, ascending by sequence
    pub async fn history(&self, selector: HistorySelector) -> AppResult<Vec<Message>> {
        let conversation_id = match selector {
            HistorySelector::Conversation(id) => {
                bounded(self.io_timeout, "load conversation", self.conversations.get(id))
                    .await?
                    .ok_or(AppError::NotFound(Resource::Conversation))?
                    .id
            }
            HistorySelector::PrivatePair(a, b) => {
                if a == b {
                    return Err(AppError::InvalidMembership(
                        "a private conversation needs two distinct users".into(),
                    ));
                }
                let found = bounded(
                    self.io_timeout,
                    "find private conversation",
                    self.conversations.find_by_key(&private_key(&a, &b)),
                )
                .await?;
                match found {
                    Some(conversation) => conversation.id,
                    // Nobody has written yet
                    None => return Ok(Vec::new()),
                }
            }
        };

        let mut history = bounded(
            self.io_timeout,
            "load history",
            self.messages.history(conversation_id),
        )
        .await?;
        history.sort_by_key(|m| m.seq);
        Ok(history)
    }

    /// Latest message per private peer and per group, newest first
    pub async fn recent_per_peer(&self, user: UserId) -> AppResult<Vec<RecentConversation>> {
        let rows = bounded(
            self.io_timeout,
            "load recent conversations",
            self.messages.latest_per_conversation(user),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(conversation, message)| RecentConversation::new(user, conversation, message))
            .collect())
    }
}
