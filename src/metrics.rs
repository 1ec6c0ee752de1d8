use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "chat_core_active_connections",
        "Live channel connections currently open",
    )
    .expect("failed to create chat_core_active_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_core_active_connections");
    gauge
});

pub static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "chat_core_online_users",
        "Users with at least one live connection",
    )
    .expect("failed to create chat_core_online_users");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_core_online_users");
    gauge
});

pub static INBOUND_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_core_inbound_events_total",
            "Inbound live channel events by type",
        ),
        &["event"],
    )
    .expect("failed to create chat_core_inbound_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_core_inbound_events_total");
    counter
});

pub static MESSAGES_PERSISTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_core_messages_persisted_total",
            "Messages durably appended, by kind",
        ),
        &["kind"],
    )
    .expect("failed to create chat_core_messages_persisted_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_core_messages_persisted_total");
    counter
});

pub static SEND_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_core_send_failures_total",
            "Send/upload attempts reported back as failures, by reason",
        ),
        &["reason"],
    )
    .expect("failed to create chat_core_send_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_core_send_failures_total");
    counter
});

pub static BLOCKED_DROPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_core_blocked_drops_total",
        "Private messages silently dropped because the receiver blocked the sender",
    )
    .expect("failed to create chat_core_blocked_drops_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_core_blocked_drops_total");
    counter
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
