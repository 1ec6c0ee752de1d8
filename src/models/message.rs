use super::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a message is addressed. Exactly one mode per message; the group flag
/// seen by clients is derived from this, never taken from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Addressing {
    Private { receiver_id: UserId },
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Server-assigned append order
    pub seq: i64,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub addressing: Addressing,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_group(&self) -> bool {
        matches!(self.addressing, Addressing::Group)
    }

    pub fn receiver_id(&self) -> Option<UserId> {
        match self.addressing {
            Addressing::Private { receiver_id } => Some(receiver_id),
            Addressing::Group => None,
        }
    }

    /// Metric label
    pub fn kind(&self) -> &'static str {
        match (&self.attachment, self.is_group()) {
            (Some(_), _) => "attachment",
            (None, true) => "group",
            (None, false) => "private",
        }
    }

    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            seq: self.seq,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id(),
            room_id: self.is_group().then_some(self.conversation_id),
            text: self.text.clone(),
            attachment: self.attachment.clone(),
            timestamp: self.created_at,
            is_group: self.is_group(),
            is_read: self.is_read,
            read_at: self.read_at,
        }
    }
}

/// Message before persistence. The id is fixed up front so an append whose
/// outcome is unknown can be looked up; seq and timestamp come from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub addressing: Addressing,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

/// Client-facing shape shared by HTTP responses and live channel events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub seq: i64,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<ConversationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
    pub is_group: bool,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}
