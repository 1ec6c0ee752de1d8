//! Event dispatcher.
//!
//! Turns typed inbound events into conversation resolution, persistence and
//! targeted delivery. One dispatcher serves every connection; each
//! connection feeds it through its own queue, so events of a single
//! connection are handled strictly in order.

use super::{ConnectionId, ConnectionRegistry, InboundEvent, OutboundEvent};
use crate::error::{AppError, AppResult};
use crate::metrics::{BLOCKED_DROPS_TOTAL, INBOUND_EVENTS_TOTAL, SEND_FAILURES_TOTAL};
use crate::models::{
    Addressing, Conversation, ConversationId, Message, MessageDraft, MessageId, UserId,
};
use crate::services::{
    AttachmentService, ConversationService, MessageService, PresenceRegistry,
    RelationshipService, StoredAttachment,
};
use crate::store::UserStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Anonymous,
    Active,
    Disconnected,
}

/// Per-connection state owned by the connection's event loop
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub user: Option<UserId>,
    pub state: ConnectionState,
}

/// Identity attached by the auth collaborator at handshake time
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
}

/// Where a send is addressed. Exactly one of user or room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    User(UserId),
    Room(ConversationId),
}

impl MessageTarget {
    /// Build from the optional `receiverId` / `roomId` pair of a payload
    pub fn from_fields(receiver_id: Option<&str>, room_id: Option<&str>) -> AppResult<Self> {
        let receiver_id = receiver_id.map(str::trim).filter(|s| !s.is_empty());
        let room_id = room_id.map(str::trim).filter(|s| !s.is_empty());
        match (receiver_id, room_id) {
            (Some(receiver), None) => Ok(MessageTarget::User(UserId::parse(receiver)?)),
            (None, Some(room)) => Ok(MessageTarget::Room(ConversationId::parse(room)?)),
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "set either receiverId or roomId, not both".into(),
            )),
            (None, None) => Err(AppError::BadRequest("receiverId or roomId is required".into())),
        }
    }
}

/// Raw upload as received from a client
#[derive(Debug, Clone)]
pub struct UploadInput {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Resolved delivery route of a send
enum Route {
    Private {
        conversation: Conversation,
        receiver: UserId,
    },
    Group {
        conversation: Conversation,
    },
}

impl Route {
    fn draft(
        &self,
        sender: UserId,
        text: Option<String>,
        stored: Option<&StoredAttachment>,
    ) -> MessageDraft {
        let (conversation_id, addressing) = match self {
            Route::Private {
                conversation,
                receiver,
            } => (
                conversation.id,
                Addressing::Private {
                    receiver_id: *receiver,
                },
            ),
            Route::Group { conversation } => (conversation.id, Addressing::Group),
        };
        MessageDraft {
            id: MessageId::random(),
            conversation_id,
            sender_id: sender,
            addressing,
            text,
            attachment: stored.map(StoredAttachment::attachment),
        }
    }
}

pub struct Dispatcher {
    connections: ConnectionRegistry,
    presence: Arc<PresenceRegistry>,
    users: Arc<dyn UserStore>,
    conversations: ConversationService,
    messages: MessageService,
    attachments: AttachmentService,
    relationships: RelationshipService,
}

impl Dispatcher {
    pub fn new(
        connections: ConnectionRegistry,
        presence: Arc<PresenceRegistry>,
        users: Arc<dyn UserStore>,
        conversations: ConversationService,
        messages: MessageService,
        attachments: AttachmentService,
        relationships: RelationshipService,
    ) -> Self {
        Self {
            connections,
            presence,
            users,
            conversations,
            messages,
            attachments,
            relationships,
        }
    }

    /// Open a connection. With an identity the user is materialized and
    /// registered in presence; without one the connection stays anonymous
    /// and only receives broadcasts.
    pub async fn connect(
        &self,
        identity: Option<Identity>,
    ) -> (ConnectionContext, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (id, rx) = self.connections.add_connection().await;
        let mut ctx = ConnectionContext {
            id,
            user: None,
            state: ConnectionState::Connecting,
        };

        match identity {
            Some(identity) => {
                if let Err(e) = self.users.upsert_identity(identity.id, &identity.username).await {
                    warn!(user_id = %identity.id, error = %e, "failed to materialize user");
                }
                ctx.user = Some(identity.id);
                ctx.state = ConnectionState::Authenticated;
                self.presence.register(identity.id, id).await;
                ctx.state = ConnectionState::Active;
                info!(connection_id = %id, user_id = %identity.id, "live connection opened");
            }
            None => {
                ctx.state = ConnectionState::Anonymous;
                info!(connection_id = %id, "anonymous live connection opened");
            }
        }

        (ctx, rx)
    }

    /// Close a connection. Safe to call more than once.
    pub async fn disconnect(&self, ctx: &mut ConnectionContext) {
        if ctx.state == ConnectionState::Disconnected {
            return;
        }
        ctx.state = ConnectionState::Disconnected;
        self.connections.remove_connection(ctx.id).await;
        if let Some(user) = self.presence.unregister(ctx.id).await {
            debug!(user_id = %user, "last connection closed");
        }
        info!(connection_id = %ctx.id, "live connection closed");
    }

    /// Handle one inbound event of a connection
    pub async fn handle(&self, ctx: &mut ConnectionContext, event: InboundEvent) {
        INBOUND_EVENTS_TOTAL
            .with_label_values(&[event.name()])
            .inc();

        if ctx.state == ConnectionState::Disconnected {
            return;
        }

        let Some(user) = ctx.user else {
            debug!(connection_id = %ctx.id, event = event.name(), "anonymous event rejected");
            self.reply(ctx.id, error_event(&AppError::Unauthorized)).await;
            return;
        };

        match event {
            InboundEvent::JoinRoom { room_id } => {
                if let Err(e) = self.join_room(ctx.id, user, &room_id).await {
                    self.reply(ctx.id, error_event(&e)).await;
                }
            }
            InboundEvent::Typing { to } => {
                let result = self.forward_typing(user, &to, true).await;
                if let Err(e) = result {
                    self.reply(ctx.id, error_event(&e)).await;
                }
            }
            InboundEvent::StopTyping { to } => {
                let result = self.forward_typing(user, &to, false).await;
                if let Err(e) = result {
                    self.reply(ctx.id, error_event(&e)).await;
                }
            }
            InboundEvent::SendMessage {
                receiver_id,
                room_id,
                text,
            } => {
                let result = match MessageTarget::from_fields(
                    receiver_id.as_deref(),
                    room_id.as_deref(),
                ) {
                    Ok(target) => self.send_message(user, target, text).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    SEND_FAILURES_TOTAL.with_label_values(&[e.kind()]).inc();
                    self.reply(
                        ctx.id,
                        OutboundEvent::SendFailed {
                            code: e.code().to_string(),
                            reason: e.to_string(),
                            retryable: e.is_retryable(),
                        },
                    )
                    .await;
                }
            }
            InboundEvent::UploadMessage {
                receiver_id,
                room_id,
                text,
                file_name,
                mime_type,
                data,
            } => {
                let result = async {
                    let target =
                        MessageTarget::from_fields(receiver_id.as_deref(), room_id.as_deref())?;
                    let bytes = STANDARD
                        .decode(data.as_bytes())
                        .map_err(|_| AppError::BadRequest("data is not valid base64".into()))?;
                    let upload = UploadInput {
                        file_name,
                        mime_type,
                        bytes,
                    };
                    self.upload_message(user, target, text, upload).await
                }
                .await;
                if let Err(e) = result {
                    SEND_FAILURES_TOTAL.with_label_values(&[e.kind()]).inc();
                    self.reply(
                        ctx.id,
                        OutboundEvent::UploadFailed {
                            code: e.code().to_string(),
                            reason: e.to_string(),
                            retryable: e.is_retryable(),
                        },
                    )
                    .await;
                }
            }
            InboundEvent::MessageRead { message_id } => {
                let result = match MessageId::parse(&message_id) {
                    Ok(id) => self.read_one(user, id).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    self.reply(ctx.id, error_event(&e)).await;
                }
            }
        }
    }

    async fn join_room(&self, connection: ConnectionId, user: UserId, room_id: &str) -> AppResult<()> {
        let room = ConversationId::parse(room_id)?;
        self.conversations.for_member(room, user).await?;

        if self.connections.join_room(connection, room).await {
            let frame = OutboundEvent::MemberJoined {
                room_id: room,
                user_id: user,
            }
            .to_frame();
            self.connections.send_to_room(room, &frame).await;
        }
        Ok(())
    }

    async fn forward_typing(&self, from: UserId, to: &str, started: bool) -> AppResult<()> {
        let target = UserId::parse(to)?;
        let handles = self.presence.handles_for(target).await;
        if handles.is_empty() {
            return Ok(());
        }
        let event = if started {
            OutboundEvent::Typing { from }
        } else {
            OutboundEvent::StopTyping { from }
        };
        self.connections.send_to(&handles, &event.to_frame()).await;
        Ok(())
    }

    /// Resolve where a send goes. A private route whose receiver blocked
    /// the sender yields `Blocked` before anything is created.
    async fn resolve_route(&self, sender: UserId, target: MessageTarget) -> AppResult<Route> {
        match target {
            MessageTarget::User(receiver) => {
                if receiver != sender && self.relationships.is_blocked(receiver, sender).await? {
                    return Err(AppError::Blocked);
                }
                let conversation = self.conversations.resolve_private(sender, receiver).await?;
                Ok(Route::Private {
                    conversation,
                    receiver,
                })
            }
            MessageTarget::Room(room) => {
                let conversation = self.conversations.for_member(room, sender).await?;
                if conversation.is_group {
                    return Ok(Route::Group { conversation });
                }
                // A room id naming a private conversation is a private send
                let receiver = conversation.peer_of(&sender).ok_or(AppError::Internal)?;
                if self.relationships.is_blocked(receiver, sender).await? {
                    return Err(AppError::Blocked);
                }
                Ok(Route::Private {
                    conversation,
                    receiver,
                })
            }
        }
    }

    /// Send a text message. `Ok(None)` means the receiver blocked the
    /// sender and the message was dropped without a trace.
    pub async fn send_message(
        &self,
        sender: UserId,
        target: MessageTarget,
        text: Option<String>,
    ) -> AppResult<Option<Message>> {
        let text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("text is required".into()))?;

        let route = match self.resolve_route(sender, target).await {
            Ok(route) => route,
            Err(AppError::Blocked) => {
                BLOCKED_DROPS_TOTAL.inc();
                debug!(sender_id = %sender, "message dropped: sender is blocked");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let message = self
            .messages
            .append(route.draft(sender, Some(text), None))
            .await?;
        self.deliver(&route, &message).await;
        Ok(Some(message))
    }

    /// Send an attachment. Bytes are validated first and only written once
    /// the route is known. The file is removed only when the append is
    /// known to have failed, so a stored message never points at nothing.
    pub async fn upload_message(
        &self,
        sender: UserId,
        target: MessageTarget,
        text: Option<String>,
        upload: UploadInput,
    ) -> AppResult<Option<Message>> {
        self.attachments
            .check(&upload.file_name, &upload.mime_type, upload.bytes.len())?;

        let route = match self.resolve_route(sender, target).await {
            Ok(route) => route,
            Err(AppError::Blocked) => {
                BLOCKED_DROPS_TOTAL.inc();
                debug!(sender_id = %sender, "upload dropped: sender is blocked");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let stored = self
            .attachments
            .store(&upload.bytes, &upload.file_name, &upload.mime_type)
            .await?;

        let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let draft = route.draft(sender, text, Some(&stored));
        let attachments = self.attachments.clone();
        let message = self
            .messages
            .append_or_else(draft, move || async move {
                attachments.discard(&stored).await;
            })
            .await?;

        self.deliver(&route, &message).await;
        Ok(Some(message))
    }

    /// Read receipt for a single message sent over the live channel
    async fn read_one(&self, reader: UserId, id: MessageId) -> AppResult<()> {
        let message = self.messages.get(id).await?;
        if message.receiver_id() != Some(reader) {
            return Err(AppError::Unauthorized);
        }
        self.mark_read(reader, &[id]).await?;
        Ok(())
    }

    /// Mark messages read and tell each original sender. Only messages
    /// addressed to `reader` change; the rest are ignored.
    pub async fn mark_read(&self, reader: UserId, ids: &[MessageId]) -> AppResult<Vec<Message>> {
        let updated = self.messages.mark_read(ids, reader).await?;

        let reader_handles = self.presence.handles_for(reader).await;
        for message in &updated {
            let Some(read_at) = message.read_at else {
                continue;
            };
            let frame = OutboundEvent::MessageSeen {
                message_id: message.id,
                seen_by: reader,
                read_at,
            }
            .to_frame();
            let mut targets = self.presence.handles_for(message.sender_id).await;
            targets.extend(reader_handles.iter().copied());
            self.connections.send_to(&targets, &frame).await;
        }
        Ok(updated)
    }

    async fn deliver(&self, route: &Route, message: &Message) {
        let payload = message.to_payload();
        match route {
            Route::Private { receiver, .. } => {
                let frame = OutboundEvent::ReceivePrivateMessage(payload).to_frame();
                let mut targets = self.presence.handles_for(*receiver).await;
                targets.extend(self.presence.handles_for(message.sender_id).await);
                let reached = self.connections.send_to(&targets, &frame).await;
                debug!(message_id = %message.id, reached, "private message delivered");
            }
            Route::Group { conversation } => {
                let frame = OutboundEvent::ReceiveMessage(payload).to_frame();
                let reached = self.connections.send_to_room(conversation.id, &frame).await;
                debug!(message_id = %message.id, reached, "group message delivered");
            }
        }
    }

    async fn reply(&self, connection: ConnectionId, event: OutboundEvent) {
        self.connections
            .send_to(&[connection], &event.to_frame())
            .await;
    }
}

fn error_event(err: &AppError) -> OutboundEvent {
    OutboundEvent::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    }
}
