use crate::{
    error::AppError,
    middleware::guards::User,
    models::{MessageId, MessagePayload},
    state::AppState,
    websocket::MessageTarget,
};
use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(alias = "receiverId")]
    pub receiver_id: Option<String>,
    #[serde(alias = "roomId")]
    pub room_id: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    #[serde(alias = "messageIds")]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub updated: usize,
    pub message_ids: Vec<MessageId>,
}

/// Send a text message through the same path as the live channel
/// POST /api/chat/messages
#[post("/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    state.ensure_user(user.id, &user.display_name()).await?;

    let target = MessageTarget::from_fields(body.receiver_id.as_deref(), body.room_id.as_deref())?;
    match state.dispatcher.send_message(user.id, target, body.text).await? {
        Some(message) => {
            let payload: MessagePayload = message.to_payload();
            Ok(HttpResponse::Created().json(payload))
        }
        // Dropped for a block; the sender is not told
        None => Ok(HttpResponse::Accepted().json(serde_json::json!({ "status": "accepted" }))),
    }
}

/// Mark messages addressed to the caller as read
/// POST /api/chat/messages/read
#[post("/messages/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    let ids = body
        .message_ids
        .iter()
        .map(|raw| MessageId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let updated = state.dispatcher.mark_read(user.id, &ids).await?;
    Ok(HttpResponse::Ok().json(MarkReadResponse {
        updated: updated.len(),
        message_ids: updated.iter().map(|m| m.id).collect(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(mark_read).service(send_message);
}
