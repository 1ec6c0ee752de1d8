use crate::models::{ConversationId, MessageId, MessagePayload, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound live channel events from client to server.
///
/// Ids stay strings here so a malformed id surfaces as `InvalidId` from the
/// dispatcher instead of a generic parse failure. Sender and reader identity
/// never come from the payload; unknown fields such as `senderId` or
/// `isGroup` are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "joinRoom", rename_all = "camelCase")]
    JoinRoom { room_id: String },

    #[serde(rename = "typing")]
    Typing { to: String },

    #[serde(rename = "stopTyping")]
    StopTyping { to: String },

    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        #[serde(default)]
        receiver_id: Option<String>,
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },

    /// File bytes travel base64-encoded in `data`
    #[serde(rename = "uploadMessage", rename_all = "camelCase")]
    UploadMessage {
        #[serde(default)]
        receiver_id: Option<String>,
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
        file_name: String,
        mime_type: String,
        data: String,
    },

    #[serde(rename = "messageRead", rename_all = "camelCase")]
    MessageRead { message_id: String },
}

impl InboundEvent {
    /// Metric label
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::JoinRoom { .. } => "joinRoom",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::StopTyping { .. } => "stopTyping",
            InboundEvent::SendMessage { .. } => "sendMessage",
            InboundEvent::UploadMessage { .. } => "uploadMessage",
            InboundEvent::MessageRead { .. } => "messageRead",
        }
    }
}

/// Outbound live channel events from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "presence-changed", rename_all = "camelCase")]
    PresenceChanged {
        user_id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    },

    #[serde(rename = "memberJoined", rename_all = "camelCase")]
    MemberJoined {
        room_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename = "typing")]
    Typing { from: UserId },

    #[serde(rename = "stopTyping")]
    StopTyping { from: UserId },

    /// Group delivery
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(MessagePayload),

    #[serde(rename = "receivePrivateMessage")]
    ReceivePrivateMessage(MessagePayload),

    #[serde(rename = "messageSeen", rename_all = "camelCase")]
    MessageSeen {
        message_id: MessageId,
        seen_by: UserId,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "sendFailed")]
    SendFailed {
        code: String,
        reason: String,
        /// Whether sending the same event again may succeed
        retryable: bool,
    },

    #[serde(rename = "uploadFailed")]
    UploadFailed {
        code: String,
        reason: String,
        retryable: bool,
    },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl OutboundEvent {
    /// Serialize to a text frame
    pub fn to_frame(&self) -> String {
        match serde_json::to_string(self) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound event");
                r#"{"type":"error","code":"INTERNAL_SERVER_ERROR","message":"serialization failed"}"#
                    .to_string()
            }
        }
    }
}
