use crate::{
    error::{AppError, Resource},
    middleware::guards::User,
    models::UserId,
    state::AppState,
};
use actix_web::{get, web, HttpResponse};

/// Echo the authenticated identity, creating its record on first call
/// GET /api/chat/me
#[get("/me")]
pub async fn me(state: web::Data<AppState>, user: User) -> Result<HttpResponse, AppError> {
    let mut record = state.ensure_user(user.id, &user.display_name()).await?;
    record.is_online = state.presence.is_online(user.id).await;
    Ok(HttpResponse::Ok().json(record))
}

/// GET /api/chat/users/{id}/presence
#[get("/users/{id}/presence")]
pub async fn get_presence(
    state: web::Data<AppState>,
    _user: User,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = UserId::parse(&path.into_inner())?;
    let record = state
        .stores
        .users
        .get(id)
        .await?
        .ok_or(AppError::NotFound(Resource::User))?;

    let mut presence = record.presence();
    presence.is_online = state.presence.is_online(id).await;
    Ok(HttpResponse::Ok().json(presence))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(me).service(get_presence);
}
