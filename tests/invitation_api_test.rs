//! Invitation API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot`
use uuid::Uuid;
use vidcall::domain::media::ProviderKind;
use vidcall::infrastructure::persistence::InMemoryInvitationStore;
use vidcall::infrastructure::signaling::SignalingBus;
use vidcall::interface::api::{build_router, AppState};

fn setup_api_test() -> Router {
    let store = Arc::new(InMemoryInvitationStore::default());
    let bus = SignalingBus::new(store.clone(), ProviderKind::PeerLink);
    let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
    build_router(AppState { store, bus }, prometheus_handle)
}

fn new_invitation(caller: &str, recipient: &str) -> Value {
    json!({
        "conversationId": "conv-1",
        "callerId": caller,
        "callerName": caller.to_uppercase(),
        "recipientId": recipient,
        "sessionId": Uuid::new_v4(),
        "callId": Uuid::new_v4(),
        "providerPayload": {"provider": "peer_link"}
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn patch_status(id: &str, status: &str) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(format!("/invitations/{id}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "status": status }).to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_create_and_list_pending() {
    let app = setup_api_test();

    let (status, json) = send(&app, post_json("/invitations", &new_invitation("alice", "bob"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["callerName"], "ALICE");

    let (status, json) = send(&app, get("/invitations?userId=bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["invitations"][0]["recipientId"], "bob");

    let (_, json) = send(&app, get("/invitations?userId=carol")).await;
    assert_eq!(json["data"]["total"], 0);
}

#[tokio::test]
async fn test_second_invitation_for_pair_conflicts() {
    let app = setup_api_test();

    let (status, _) = send(&app, post_json("/invitations", &new_invitation("alice", "bob"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(&app, post_json("/invitations", &new_invitation("bob", "alice"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "CONFLICT");
}

#[tokio::test]
async fn test_self_invitation_is_rejected() {
    let app = setup_api_test();
    let (status, json) = send(&app, post_json("/invitations", &new_invitation("alice", "alice"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_status_updates_are_monotonic() {
    let app = setup_api_test();
    let (_, created) = send(&app, post_json("/invitations", &new_invitation("alice", "bob"))).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, json) = send(&app, patch_status(&id, "accepted")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["change"], "applied");

    let (_, json) = send(&app, patch_status(&id, "accepted")).await;
    assert_eq!(json["data"]["change"], "unchanged");

    let (status, json) = send(&app, patch_status(&id, "declined")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "INVALID_TRANSITION");

    let (_, json) = send(&app, get(&format!("/invitations/{id}"))).await;
    assert_eq!(json["data"]["status"], "accepted");
}

#[tokio::test]
async fn test_active_until_session_closed() {
    let app = setup_api_test();
    let (_, created) = send(&app, post_json("/invitations", &new_invitation("alice", "bob"))).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let session_id = created["data"]["sessionId"].as_str().unwrap().to_string();
    send(&app, patch_status(&id, "accepted")).await;

    let (_, json) = send(&app, get("/invitations/active?userId=alice")).await;
    assert_eq!(json["data"]["total"], 1);

    let (status, _) = send(&app, post_json(&format!("/sessions/{session_id}/close"), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(&app, get("/invitations/active?userId=alice")).await;
    assert_eq!(json["data"]["total"], 0);

    let (status, _) = send(&app, post_json("/invitations", &new_invitation("alice", "bob"))).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_closed_pending_invitation_is_not_listed() {
    let app = setup_api_test();
    let (_, created) = send(&app, post_json("/invitations", &new_invitation("alice", "bob"))).await;
    let session_id = created["data"]["sessionId"].as_str().unwrap().to_string();

    let (status, _) = send(&app, post_json(&format!("/sessions/{session_id}/close"), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(&app, get("/invitations?userId=bob")).await;
    assert_eq!(json["data"]["total"], 0);

    let (status, _) = send(&app, post_json("/invitations", &new_invitation("bob", "alice"))).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let app = setup_api_test();

    let (status, json) = send(&app, get(&format!("/invitations/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, _) = send(&app, get("/invitations/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, patch_status(&Uuid::new_v4().to_string(), "declined")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
