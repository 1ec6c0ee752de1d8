use super::bounded;
use crate::error::{AppError, AppResult, Resource};
use crate::models::conversation::private_key;
use crate::models::{Conversation, ConversationDraft, ConversationId, UserId};
use crate::store::ConversationStore;
use std::sync::Arc;
use std::time::Duration;

/// Resolves member sets to their canonical conversation.
///
/// All creation goes through the store's keyed upsert, so concurrent first
/// contact between the same users converges on one record.
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    io_timeout: Duration,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, io_timeout: Duration) -> Self {
        Self { store, io_timeout }
    }

    /// Lookup-or-create the private conversation of an unordered pair
    pub async fn resolve_private(&self, a: UserId, b: UserId) -> AppResult<Conversation> {
        let draft = ConversationDraft::private(a, b)?;
        bounded(
            self.io_timeout,
            "resolve private conversation",
            self.store.upsert_by_key(&draft),
        )
        .await
    }

    /// Lookup-or-create the group with exactly this member set
    pub async fn resolve_group(
        &self,
        members: impl IntoIterator<Item = UserId>,
        name: Option<String>,
    ) -> AppResult<Conversation> {
        let draft = ConversationDraft::group(members, name)?;
        let conversation = bounded(
            self.io_timeout,
            "resolve group conversation",
            self.store.upsert_by_key(&draft),
        )
        .await?;

        tracing::debug!(
            conversation_id = %conversation.id,
            members = conversation.members.len(),
            "group resolved"
        );
        Ok(conversation)
    }

    pub async fn by_id(&self, id: ConversationId) -> AppResult<Conversation> {
        bounded(self.io_timeout, "load conversation", self.store.get(id))
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))
    }

    /// Conversation `id`, provided `user` belongs to it
    pub async fn for_member(&self, id: ConversationId, user: UserId) -> AppResult<Conversation> {
        let conversation = self.by_id(id).await?;
        if !conversation.is_member(&user) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    /// Existing private conversation of a pair, without creating one
    pub async fn find_private(&self, a: UserId, b: UserId) -> AppResult<Option<Conversation>> {
        bounded(
            self.io_timeout,
            "find private conversation",
            self.store.find_by_key(&private_key(&a, &b)),
        )
        .await
    }

    pub async fn list_for_member(&self, user: UserId) -> AppResult<Vec<Conversation>> {
        bounded(
            self.io_timeout,
            "list conversations",
            self.store.list_for_member(user),
        )
        .await
    }
}
