use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ConversationId, MessagePayload, UserId},
    services::HistorySelector,
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreatePrivateRequest {
    pub peer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub member_ids: Vec<String>,
    pub name: Option<String>,
}

/// Create or fetch the private conversation with a peer
/// POST /api/chat/conversations/private
#[post("/conversations/private")]
pub async fn create_private(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreatePrivateRequest>,
) -> Result<HttpResponse, AppError> {
    let peer = UserId::parse(&body.peer_id)?;
    let conversation = state.conversations.resolve_private(user.id, peer).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// Create or fetch the group with exactly these members (caller included)
/// POST /api/chat/conversations/group
#[post("/conversations/group")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let mut members = body
        .member_ids
        .iter()
        .map(|raw| UserId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    members.push(user.id);

    let conversation = state.conversations.resolve_group(members, body.name).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// GET /api/chat/conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversations = state.conversations.list_for_member(user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// GET /api/chat/conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = ConversationId::parse(&path.into_inner())?;
    let conversation = state.conversations.for_member(id, user.id).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// Message history of a conversation, oldest first
/// GET /api/chat/conversations/{id}/messages
#[get("/conversations/{id}/messages")]
pub async fn conversation_messages(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = ConversationId::parse(&path.into_inner())?;
    state.conversations.for_member(id, user.id).await?;

    let history = state
        .messages
        .history(HistorySelector::Conversation(id))
        .await?;
    let payload: Vec<MessagePayload> = history.iter().map(|m| m.to_payload()).collect();
    Ok(HttpResponse::Ok().json(payload))
}

/// Message history between two users, oldest first. The caller must be one of them.
/// GET /api/chat/private/{user_a}/{user_b}/messages
#[get("/private/{user_a}/{user_b}/messages")]
pub async fn private_messages(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (raw_a, raw_b) = path.into_inner();
    let a = UserId::parse(&raw_a)?;
    let b = UserId::parse(&raw_b)?;
    if user.id != a && user.id != b {
        return Err(AppError::Forbidden);
    }

    let history = state
        .messages
        .history(HistorySelector::PrivatePair(a, b))
        .await?;
    let payload: Vec<MessagePayload> = history.iter().map(|m| m.to_payload()).collect();
    Ok(HttpResponse::Ok().json(payload))
}

/// Latest message per peer and per group
/// GET /api/chat/recent
#[get("/recent")]
pub async fn recent(state: web::Data<AppState>, user: User) -> Result<HttpResponse, AppError> {
    let rows = state.messages.recent_per_peer(user.id).await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_private)
        .service(create_group)
        .service(list_conversations)
        .service(conversation_messages)
        .service(get_conversation)
        .service(private_messages)
        .service(recent);
}
