use crate::middleware::guards::User;
use crate::models::UserId;
use crate::state::AppState;
use crate::websocket::{ConnectionId, Identity, InboundEvent, OutboundEvent};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_middleware::JwtValidator;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use error_types::error_codes;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

// WebSocket Actor
//
// Parses frames and pushes events onto the connection's queue. A single task
// drains that queue through the dispatcher, so the actor never awaits
// storage itself.
struct WsSession {
    connection_id: ConnectionId,
    user_id: Option<UserId>,
    inbound: Option<UnboundedSender<InboundEvent>>,
    outbound: Option<UnboundedReceiver<String>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    max_frame_size: usize,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(connection_id = %act.connection_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn reject(&self, ctx: &mut ws::WebsocketContext<Self>, message: String) {
        let frame = OutboundEvent::Error {
            code: error_codes::INVALID_REQUEST.to_string(),
            message,
        }
        .to_frame();
        ctx.text(frame);
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            connection_id = %self.connection_id,
            user_id = ?self.user_id,
            "WebSocket session started"
        );

        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session stopped");
        // Closing the queue lets the event loop finish and disconnect
        self.inbound.take();
    }
}

// Frames addressed to this connection
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(event) => {
                        let queued = self
                            .inbound
                            .as_ref()
                            .map(|tx| tx.send(event).is_ok())
                            .unwrap_or(false);
                        if !queued {
                            ctx.stop();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(connection_id = %self.connection_id, error = %e, "Failed to parse WS message");
                        self.reject(ctx, format!("malformed event: {e}"));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
                self.reject(ctx, "binary frames are not supported".into());
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.connection_id, ?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(ws::ProtocolError::Overflow) => {
                // Only an upload can be this large; the codec cannot resync after it
                tracing::warn!(
                    connection_id = %self.connection_id,
                    limit = self.max_frame_size,
                    "WebSocket frame too large"
                );
                let frame = OutboundEvent::UploadFailed {
                    code: error_codes::UNSUPPORTED_MEDIA.to_string(),
                    reason: format!("frame exceeds {} bytes", self.max_frame_size),
                    retryable: false,
                }
                .to_frame();
                ctx.text(frame);
                ctx.close(Some(ws::CloseCode::Size.into()));
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Resolve the handshake identity. A missing or invalid token leaves the
/// connection anonymous.
fn handshake_identity(jwt: &JwtValidator, params: &WsParams, req: &HttpRequest) -> Option<Identity> {
    let token = params.token.clone().or_else(|| {
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(JwtValidator::bearer_token)
            .map(str::to_string)
    })?;

    match jwt.verify(&token) {
        Ok(authenticated) => {
            let user = User {
                id: UserId::from(authenticated.id),
                username: authenticated.username,
            };
            Some(Identity {
                id: user.id,
                username: user.display_name(),
            })
        }
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket token rejected, continuing anonymously");
            None
        }
    }
}

// HTTP handler
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let identity = handshake_identity(&state.jwt, &query, &req);

    let dispatcher = state.dispatcher.clone();
    let (mut conn, outbound) = dispatcher.connect(identity).await;
    let (tx, mut rx) = unbounded_channel::<InboundEvent>();

    let max_frame_size = state.config.upload.max_frame_size();
    let session = WsSession {
        connection_id: conn.id,
        user_id: conn.user,
        inbound: Some(tx),
        outbound: Some(outbound),
        hb: Instant::now(),
        heartbeat_interval: state.config.websocket.heartbeat_interval,
        client_timeout: state.config.websocket.client_timeout,
        max_frame_size,
    };

    let started = ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(max_frame_size)
        .start();

    match started {
        Ok(response) => {
            actix::spawn(async move {
                while let Some(event) = rx.recv().await {
                    dispatcher.handle(&mut conn, event).await;
                }
                dispatcher.disconnect(&mut conn).await;
            });
            Ok(response)
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed");
            dispatcher.disconnect(&mut conn).await;
            Err(e)
        }
    }
}
