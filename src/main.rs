use actix_web::{App, HttpServer};
use realtime_chat_core::{
    config, db, error, logging, routes,
    state::AppState,
    store::{MemoryStore, PgStore, Stores},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let stores = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Stores::from_backend(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    // Nobody is connected yet, whatever the last run left behind
    let reset = stores.users.reset_presence().await?;
    tracing::info!(users = reset, "presence reset to offline");

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-chat-core");

    let state = AppState::new(cfg, stores);
    let presence = state.presence.clone();
    let configure = routes::configure(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(actix_middleware::RequestTracing)
            .configure(configure.clone())
    })
    .disable_signals()
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run();
    let handle = server.handle();

    tokio::select! {
        res = server => {
            res.map_err(|e| error::AppError::StartServer(format!("server: {e}")))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            handle.stop(true).await;
        }
    }

    let flushed = presence.flush_offline().await;
    tracing::info!(users = flushed, "shutdown complete");
    Ok(())
}
