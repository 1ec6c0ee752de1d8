// Re-export route modules
pub mod attachments;
pub mod conversations;
pub mod messages;
pub mod relationships;
pub mod users;
pub mod wsroute;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use actix_middleware::JwtAuthMiddleware;
use actix_web::web;

/// Mount every endpoint. REST calls live under `/api/chat` behind bearer
/// auth; the live channel authenticates itself during the handshake.
pub fn configure(state: AppState) -> impl Fn(&mut web::ServiceConfig) + Clone {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(state.clone()))
            .service(
                web::scope("/api/chat")
                    .wrap(JwtAuthMiddleware::new(state.jwt.clone()))
                    .configure(users::configure)
                    .configure(conversations::configure)
                    .configure(messages::configure)
                    .configure(attachments::configure)
                    .configure(relationships::configure),
            )
            .service(wsroute::ws_handler)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics_handler));
    }
}
