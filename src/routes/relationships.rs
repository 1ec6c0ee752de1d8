use crate::{error::AppError, middleware::guards::User, models::UserId, state::AppState};
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target_id: String,
}

enum Action {
    Block,
    Unblock,
    Star,
    Unstar,
}

async fn apply(
    state: &AppState,
    user: &User,
    body: &TargetRequest,
    action: Action,
) -> Result<HttpResponse, AppError> {
    let target = UserId::parse(&body.target_id)?;
    state.ensure_user(user.id, &user.display_name()).await?;

    let service = &state.relationships;
    let message = match action {
        Action::Block => {
            service.block(user.id, target).await?;
            "User blocked"
        }
        Action::Unblock => {
            service.unblock(user.id, target).await?;
            "User unblocked"
        }
        Action::Star => {
            service.star(user.id, target).await?;
            "User starred"
        }
        Action::Unstar => {
            service.unstar(user.id, target).await?;
            "User unstarred"
        }
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": message
    })))
}

/// POST /api/chat/block
#[post("/block")]
pub async fn block_user(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<TargetRequest>,
) -> Result<HttpResponse, AppError> {
    apply(&state, &user, &body, Action::Block).await
}

/// POST /api/chat/unblock
#[post("/unblock")]
pub async fn unblock_user(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<TargetRequest>,
) -> Result<HttpResponse, AppError> {
    apply(&state, &user, &body, Action::Unblock).await
}

/// POST /api/chat/star
#[post("/star")]
pub async fn star_user(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<TargetRequest>,
) -> Result<HttpResponse, AppError> {
    apply(&state, &user, &body, Action::Star).await
}

/// POST /api/chat/unstar
#[post("/unstar")]
pub async fn unstar_user(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<TargetRequest>,
) -> Result<HttpResponse, AppError> {
    apply(&state, &user, &body, Action::Unstar).await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(block_user)
        .service(unblock_user)
        .service(star_user)
        .service(unstar_user);
}
