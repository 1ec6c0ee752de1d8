use super::{ConversationStore, MessageStore, UserStore};
use crate::error::{AppError, AppResult, Resource};
use crate::models::{
    Addressing, Attachment, Conversation, ConversationDraft, ConversationId, Message,
    MessageDraft, MessageId, User, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

const FOREIGN_KEY_VIOLATION: &str = "23503";

const CONVERSATION_COLUMNS: &str = r#"
    c.id, c.canonical_key, c.is_group, c.name, c.created_at,
    COALESCE(
        ARRAY_AGG(cm.user_id ORDER BY cm.user_id) FILTER (WHERE cm.user_id IS NOT NULL),
        '{}'::uuid[]
    ) AS members
"#;

const MESSAGE_COLUMNS: &str = r#"
    seq, id, conversation_id, sender_id, receiver_id, is_group, text,
    attachment_url, attachment_mime_type, created_at, is_read, read_at
"#;

/// PostgreSQL backend.
///
/// Conversation uniqueness is enforced by `UNIQUE(canonical_key)` and message
/// order by the `seq` BIGSERIAL; neither relies on application-side checks.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_conversations(&self, ids: &[Uuid]) -> AppResult<Vec<Conversation>> {
        let sql = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            LEFT JOIN conversation_members cm ON cm.conversation_id = c.id
            WHERE c.id = ANY($1)
            GROUP BY c.id
            "#
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(conversation_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn insert_relationship(&self, table: &str, owner: UserId, target: UserId) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO {table} (owner_id, target_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(owner.0)
            .bind(target.0)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let fk = e
                    .as_database_error()
                    .and_then(|d| d.code())
                    .map(|code| code == FOREIGN_KEY_VIOLATION)
                    .unwrap_or(false);
                if fk {
                    AppError::NotFound(Resource::User)
                } else {
                    AppError::from(e)
                }
            })?;
        Ok(())
    }

    async fn delete_relationship(&self, table: &str, owner: UserId, target: UserId) -> AppResult<()> {
        let sql = format!("DELETE FROM {table} WHERE owner_id = $1 AND target_id = $2");
        sqlx::query(&sql)
            .bind(owner.0)
            .bind(target.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation, sqlx::Error> {
    let mut members: Vec<UserId> = row
        .try_get::<Vec<Uuid>, _>("members")?
        .into_iter()
        .map(UserId::from)
        .collect();
    members.sort();
    Ok(Conversation {
        id: ConversationId::from(row.try_get::<Uuid, _>("id")?),
        is_group: row.try_get("is_group")?,
        name: row.try_get("name")?,
        members,
        canonical_key: row.try_get("canonical_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, sqlx::Error> {
    let is_group: bool = row.try_get("is_group")?;
    let receiver_id: Option<Uuid> = row.try_get("receiver_id")?;
    let addressing = match (is_group, receiver_id) {
        (false, Some(receiver)) => Addressing::Private {
            receiver_id: UserId::from(receiver),
        },
        (true, None) => Addressing::Group,
        _ => {
            return Err(sqlx::Error::Decode(
                "message row has inconsistent addressing".into(),
            ))
        }
    };

    let url: Option<String> = row.try_get("attachment_url")?;
    let mime_type: Option<String> = row.try_get("attachment_mime_type")?;
    let attachment = match (url, mime_type) {
        (Some(url), Some(mime_type)) => Some(Attachment { url, mime_type }),
        _ => None,
    };

    Ok(Message {
        id: MessageId::from(row.try_get::<Uuid, _>("id")?),
        seq: row.try_get("seq")?,
        conversation_id: ConversationId::from(row.try_get::<Uuid, _>("conversation_id")?),
        sender_id: UserId::from(row.try_get::<Uuid, _>("sender_id")?),
        addressing,
        text: row.try_get("text")?,
        attachment,
        created_at: row.try_get("created_at")?,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get("read_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let to_set = |ids: Vec<Uuid>| ids.into_iter().map(UserId::from).collect();
    Ok(User {
        id: UserId::from(row.try_get::<Uuid, _>("id")?),
        username: row.try_get("username")?,
        is_online: row.try_get("is_online")?,
        last_seen: row.try_get("last_seen")?,
        blocked_users: to_set(row.try_get("blocked_users")?),
        starred_users: to_set(row.try_get("starred_users")?),
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn upsert_identity(&self, id: UserId, username: &str) -> AppResult<User> {
        sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(id.0)
            .bind(username)
            .execute(&self.pool)
            .await?;

        UserStore::get(self, id).await?.ok_or_else(|| {
            AppError::BadRequest(format!("username {username:?} is already taken"))
        })
    }

    async fn get(&self, id: UserId) -> AppResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT
                u.id, u.username, u.is_online, u.last_seen,
                COALESCE(
                    (SELECT ARRAY_AGG(b.target_id) FROM user_blocks b WHERE b.owner_id = u.id),
                    '{}'::uuid[]
                ) AS blocked_users,
                COALESCE(
                    (SELECT ARRAY_AGG(s.target_id) FROM user_stars s WHERE s.owner_id = u.id),
                    '{}'::uuid[]
                ) AS starred_users
            FROM users u
            WHERE u.id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn set_presence(&self, id: UserId, online: bool, at: DateTime<Utc>) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET is_online = $2, last_seen = $3 WHERE id = $1")
            .bind(id.0)
            .bind(online)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(Resource::User));
        }
        Ok(())
    }

    async fn reset_presence(&self) -> AppResult<u64> {
        let result =
            sqlx::query("UPDATE users SET is_online = FALSE, last_seen = NOW() WHERE is_online")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn block(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.insert_relationship("user_blocks", owner, target).await
    }

    async fn unblock(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.delete_relationship("user_blocks", owner, target).await
    }

    async fn star(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.insert_relationship("user_stars", owner, target).await
    }

    async fn unstar(&self, owner: UserId, target: UserId) -> AppResult<()> {
        self.delete_relationship("user_stars", owner, target).await
    }

    async fn is_blocked_by(&self, owner: UserId, target: UserId) -> AppResult<bool> {
        let blocked: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_blocks WHERE owner_id = $1 AND target_id = $2)",
        )
        .bind(owner.0)
        .bind(target.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(blocked)
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn upsert_by_key(&self, draft: &ConversationDraft) -> AppResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        // The no-op update makes RETURNING yield the existing row on conflict;
        // xmax = 0 only for a freshly inserted tuple.
        let row = sqlx::query(
            r#"
            INSERT INTO conversations (id, canonical_key, is_group, name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (canonical_key) DO UPDATE SET canonical_key = EXCLUDED.canonical_key
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.canonical_key())
        .bind(draft.is_group())
        .bind(draft.name())
        .fetch_one(&mut *tx)
        .await?;

        let id: Uuid = row.try_get("id")?;
        let inserted: bool = row.try_get("inserted")?;

        if inserted {
            for member in draft.members() {
                sqlx::query(
                    r#"
                    INSERT INTO conversation_members (conversation_id, user_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(id)
                .bind(member.0)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        debug!(
            conversation_id = %id,
            key = %draft.canonical_key(),
            inserted,
            "Conversation resolved"
        );

        ConversationStore::get(self, ConversationId::from(id))
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))
    }

    async fn find_by_key(&self, canonical_key: &str) -> AppResult<Option<Conversation>> {
        let sql = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            LEFT JOIN conversation_members cm ON cm.conversation_id = c.id
            WHERE c.canonical_key = $1
            GROUP BY c.id
            "#
        );
        let row = sqlx::query(&sql)
            .bind(canonical_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(conversation_from_row).transpose()?)
    }

    async fn get(&self, id: ConversationId) -> AppResult<Option<Conversation>> {
        Ok(self.fetch_conversations(&[id.0]).await?.into_iter().next())
    }

    async fn list_for_member(&self, user: UserId) -> AppResult<Vec<Conversation>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT c.id
            FROM conversations c
            JOIN conversation_members cm ON cm.conversation_id = c.id
            WHERE cm.user_id = $1
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = self.fetch_conversations(&ids).await?;
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append(&self, draft: MessageDraft) -> AppResult<Message> {
        let (receiver_id, is_group) = match draft.addressing {
            Addressing::Private { receiver_id } => (Some(receiver_id.0), false),
            Addressing::Group => (None, true),
        };
        let (url, mime_type) = match &draft.attachment {
            Some(a) => (Some(a.url.as_str()), Some(a.mime_type.as_str())),
            None => (None, None),
        };

        let sql = format!(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, receiver_id, is_group,
                text, attachment_url, attachment_mime_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(draft.id.0)
            .bind(draft.conversation_id.0)
            .bind(draft.sender_id.0)
            .bind(receiver_id)
            .bind(is_group)
            .bind(draft.text.as_deref())
            .bind(url)
            .bind(mime_type)
            .fetch_one(&self.pool)
            .await?;

        Ok(message_from_row(&row)?)
    }

    async fn get(&self, id: MessageId) -> AppResult<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row).transpose()?)
    }

    async fn mark_read(
        &self,
        ids: &[MessageId],
        reader: UserId,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let sql = format!(
            r#"
            UPDATE messages
            SET is_read = TRUE, read_at = $3
            WHERE id = ANY($1) AND receiver_id = $2 AND NOT is_read
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&ids)
            .bind(reader.0)
            .bind(at)
            .fetch_all(&self.pool)
            .await?;

        let mut updated = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        updated.sort_by_key(|m| m.seq);
        Ok(updated)
    }

    async fn history(&self, conversation: ConversationId) -> AppResult<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(conversation.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn latest_per_conversation(
        &self,
        user: UserId,
    ) -> AppResult<Vec<(Conversation, Message)>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM (
                SELECT DISTINCT ON (m.conversation_id) m.*
                FROM messages m
                JOIN conversation_members cm
                  ON cm.conversation_id = m.conversation_id
                 AND cm.user_id = $1
                ORDER BY m.conversation_id, m.created_at DESC, m.seq DESC
            ) latest
            ORDER BY created_at DESC, seq DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user.0)
            .fetch_all(&self.pool)
            .await?;
        let messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let ids: Vec<Uuid> = messages.iter().map(|m| m.conversation_id.0).collect();
        let conversations = self.fetch_conversations(&ids).await?;

        Ok(messages
            .into_iter()
            .filter_map(|message| {
                conversations
                    .iter()
                    .find(|c| c.id == message.conversation_id)
                    .map(|c| (c.clone(), message))
            })
            .collect())
    }
}
