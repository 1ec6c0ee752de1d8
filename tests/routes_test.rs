//! HTTP surface under /api/chat

mod common;

use actix_web::http::{header, StatusCode};
use actix_web::{test, App};
use common::TestHarness;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use realtime_chat_core::models::UserId;
use realtime_chat_core::routes;
use realtime_chat_core::websocket::OutboundEvent;
use serde_json::{json, Value};

fn token_for(user: UserId, username: &str) -> String {
    let claims = json!({
        "sub": user.to_string(),
        "username": username,
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

fn bearer(user: UserId, username: &str) -> (header::HeaderName, String) {
    (
        header::AUTHORIZATION,
        format!("Bearer {}", token_for(user, username)),
    )
}

#[actix_web::test]
async fn test_me_materializes_the_caller() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let alice = UserId::random();

    let req = test::TestRequest::get()
        .uri("/api/chat/me")
        .insert_header(bearer(alice, "alice"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["id"], alice.to_string());
    assert_eq!(body["username"], "alice");
    assert_eq!(body["isOnline"], false);
}

#[actix_web::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;

    let req = test::TestRequest::get().uri("/api/chat/me").to_request();
    let err = test::try_call_service(&app, req).await.unwrap_err();
    assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/api/chat/me")
        .insert_header((header::AUTHORIZATION, "Bearer not.a.jwt"))
        .to_request();
    let err = test::try_call_service(&app, req).await.unwrap_err();
    assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_health_is_public() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, "OK");
}

#[actix_web::test]
async fn test_private_conversation_is_created_once() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let (alice, bob) = (UserId::random(), UserId::random());

    let mut ids = Vec::new();
    for (me, peer, name) in [(alice, bob, "alice"), (bob, alice, "bob")] {
        let req = test::TestRequest::post()
            .uri("/api/chat/conversations/private")
            .insert_header(bearer(me, name))
            .set_json(json!({ "peer_id": peer.to_string() }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["isGroup"], false);
        ids.push(body["id"].clone());
    }
    assert_eq!(ids[0], ids[1]);
}

#[actix_web::test]
async fn test_invalid_peer_id_is_bad_request() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;

    let req = test::TestRequest::post()
        .uri("/api/chat/conversations/private")
        .insert_header(bearer(UserId::random(), "alice"))
        .set_json(json!({ "peer_id": "bob" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INVALID_ID");
}

#[actix_web::test]
async fn test_rest_send_delivers_live_and_reads_back() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let (alice, bob) = (UserId::random(), UserId::random());
    let mut b = harness.connect(bob, "bob").await;

    let req = test::TestRequest::post()
        .uri("/api/chat/messages")
        .insert_header(bearer(alice, "alice"))
        .set_json(json!({ "receiver_id": bob.to_string(), "text": "over http" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: Value = test::read_body_json(resp).await;
    assert_eq!(sent["text"], "over http");
    assert_eq!(sent["isGroup"], false);

    assert!(matches!(
        &b.drain_non_presence()[..],
        [OutboundEvent::ReceivePrivateMessage(_)]
    ));

    let req = test::TestRequest::get()
        .uri(&format!("/api/chat/private/{bob}/{alice}/messages"))
        .insert_header(bearer(bob, "bob"))
        .to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));

    let message_id = sent["id"].clone();
    let req = test::TestRequest::post()
        .uri("/api/chat/messages/read")
        .insert_header(bearer(bob, "bob"))
        .set_json(json!({ "message_ids": [message_id] }))
        .to_request();
    let read: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(read["updated"], 1);
}

#[actix_web::test]
async fn test_outsider_cannot_read_private_history() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let (alice, bob, eve) = (UserId::random(), UserId::random(), UserId::random());

    let req = test::TestRequest::get()
        .uri(&format!("/api/chat/private/{alice}/{bob}/messages"))
        .insert_header(bearer(eve, "eve"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_blocked_rest_send_is_accepted_without_delivery() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let (alice, bob) = (UserId::random(), UserId::random());
    let mut b = harness.connect(bob, "bob").await;

    let req = test::TestRequest::post()
        .uri("/api/chat/block")
        .insert_header(bearer(bob, "bob"))
        .set_json(json!({ "target_id": alice.to_string() }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);

    let req = test::TestRequest::post()
        .uri("/api/chat/messages")
        .insert_header(bearer(alice, "alice"))
        .set_json(json!({ "receiver_id": bob.to_string(), "text": "hello?" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert!(b.drain_non_presence().is_empty());
}

#[actix_web::test]
async fn test_send_file_over_multipart() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let (alice, bob) = (UserId::random(), UserId::random());

    let boundary = "chatcoreboundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"receiverId\"\r\n\r\n\
         {bob}\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"notes.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n\
         %PDF-1.4 notes\r\n\
         --{boundary}--\r\n"
    );

    let req = test::TestRequest::post()
        .uri("/api/chat/send-file")
        .insert_header(bearer(alice, "alice"))
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: Value = test::read_body_json(resp).await;
    assert_eq!(sent["attachment"]["mimeType"], "application/pdf");
    assert_eq!(harness.uploaded_files().len(), 1);
}

#[actix_web::test]
async fn test_presence_lookup() {
    let harness = TestHarness::new();
    let app = test::init_service(App::new().configure(routes::configure(harness.state.clone()))).await;
    let (alice, bob) = (UserId::random(), UserId::random());
    let _b = harness.connect(bob, "bob").await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/chat/users/{bob}/presence"))
        .insert_header(bearer(alice, "alice"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["isOnline"], true);
    assert!(body["lastSeen"].is_string());

    let req = test::TestRequest::get()
        .uri(&format!("/api/chat/users/{}/presence", UserId::random()))
        .insert_header(bearer(alice, "alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
