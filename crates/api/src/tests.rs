use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::body::to_bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceExt;
use voluntra_domain::ports::store::{DocumentPath, DocumentStore};
use voluntra_domain::store::InMemoryDocumentStore;

use crate::routes;
use crate::state::AppState;
use voluntra_infra::config::AppConfig;

#[derive(Serialize)]
struct Claims {
    sub: String,
    role: String,
    exp: usize,
}

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        data_backend: "memory".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        store_prefix: "voluntra:test".to_string(),
        jwt_secret: "test-secret".to_string(),
        media_backend: "local".to_string(),
        media_root: "./target/test-media".to_string(),
        s3_endpoint: "http://127.0.0.1:9000".to_string(),
        s3_bucket: "voluntra-media-test".to_string(),
        s3_region: "us-east-1".to_string(),
        s3_access_key: "test-access-key".to_string(),
        s3_secret_key: "test-secret-key".to_string(),
        worker_queue_prefix: "voluntra:jobs:test".to_string(),
        worker_metrics_port: 0,
        worker_poll_interval_ms: 1000,
        worker_promote_batch: 10,
        worker_backoff_base_ms: 1000,
        worker_backoff_max_ms: 60000,
        retention_days: 30,
        retention_interval_ms: 86_400_000,
        embedded_triggers: false,
    }
}

fn test_token(role: &str, sub: &str) -> String {
    test_token_with_secret("test-secret", role, sub)
}

fn test_token_with_secret(secret: &str, role: &str, sub: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs();
    let claims = Claims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: (now + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token")
}

fn test_app() -> (InMemoryDocumentStore, axum::Router) {
    let store = InMemoryDocumentStore::new();
    let state = AppState::with_store(test_config(), Arc::new(store.clone()));
    (store, routes::router(state))
}

async fn seed(store: &InMemoryDocumentStore, path: &str, value: Value) {
    store
        .set(
            DocumentPath::parse(path).expect("path"),
            value.as_object().cloned().expect("object"),
            false,
        )
        .await
        .expect("seed");
}

async fn read(store: &InMemoryDocumentStore, path: &str) -> Option<Value> {
    store
        .get(&DocumentPath::parse(path).expect("path"))
        .await
        .expect("get")
        .map(|snapshot| Value::Object(snapshot.fields))
}

async fn seed_event_world(store: &InMemoryDocumentStore) {
    seed(store, "organizations/org1", json!({"name": "Shore Cleanup", "events": ["e1"]})).await;
    seed(store, "organizations/org2", json!({"name": "Other", "events": []})).await;
    seed(
        store,
        "users/u1",
        json!({"displayName": "alice", "registeredEvents": [], "skills": ["first-aid"]}),
    )
    .await;
    seed(store, "users/u2", json!({"displayName": "bob", "registeredEvents": []})).await;
    seed(
        store,
        "events/e1",
        json!({
            "organizationId": "org1",
            "title": "Beach day",
            "status": "active",
            "registeredVolunteers": [],
            "maxVolunteers": 2,
            "withChat": true
        }),
    )
    .await;
    seed(
        store,
        "chatRooms/event_e1",
        json!({"participants": ["org1"], "adminId": "org1", "eventId": "e1"}),
    )
    .await;
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json")
    };
    (status, value)
}

fn error_code(body: &Value) -> &str {
    body.get("error")
        .and_then(|error| error.get("code"))
        .and_then(Value::as_str)
        .expect("error code")
}

#[tokio::test]
async fn health_is_public() {
    let (_, app) = test_app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let (_, app) = test_app();
    let (status, body) = send(&app, "GET", "/v1/events/e1/participants", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "unauthenticated");

    let forged = test_token_with_secret("wrong-secret", "organization", "org1");
    let (status, _) = send(&app, "GET", "/v1/events/e1/participants", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown_role = test_token("guest", "org1");
    let (status, _) =
        send(&app, "GET", "/v1/events/e1/participants", Some(&unknown_role), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn organization_creates_event_with_chat_room() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    let token = test_token("organization", "org1");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/events",
        Some(&token),
        Some(json!({"title": "Park planting", "maxVolunteers": 10, "withChat": true})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let event_id = body["id"].as_str().expect("event id").to_string();
    assert_eq!(body["status"], "active");
    assert_eq!(body["organizationId"], "org1");

    let organization = read(&store, "organizations/org1").await.expect("organization");
    assert!(
        organization["events"]
            .as_array()
            .expect("events")
            .contains(&json!(event_id))
    );
    let room = read(&store, &format!("chatRooms/event_{event_id}"))
        .await
        .expect("room");
    assert_eq!(room["adminId"], "org1");
    assert_eq!(room["participants"], json!(["org1"]));
}

#[tokio::test]
async fn event_creation_validates_input_and_role() {
    let (store, app) = test_app();
    seed_event_world(&store).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/events",
        Some(&test_token("organization", "org1")),
        Some(json!({"title": "No room", "maxVolunteers": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid-argument");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/events",
        Some(&test_token("volunteer", "u1")),
        Some(json!({"title": "Sneaky", "maxVolunteers": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "permission-denied");
}

#[tokio::test]
async fn registration_then_removal_keeps_references_consistent() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    let volunteer = test_token("volunteer", "u1");
    let organization = test_token("organization", "org1");

    let (status, body) =
        send(&app, "POST", "/v1/events/e1/registration", Some(&volunteer), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["registered"], true);

    let (status, body) =
        send(&app, "POST", "/v1/events/e1/registration", Some(&volunteer), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body), "failed-precondition");

    let (status, body) =
        send(&app, "GET", "/v1/events/e1/participants", Some(&organization), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "u1");
    assert_eq!(body[0]["displayName"], "alice");

    let (status, body) = send(
        &app,
        "GET",
        "/v1/events/e1/participants/stats",
        Some(&organization),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalParticipants"], 1);
    assert_eq!(body["availableSpots"], 1);
    assert_eq!(body["fillPercentage"], 50);

    let (status, body) = send(
        &app,
        "DELETE",
        "/v1/events/e1/participants/u1",
        Some(&organization),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
    assert_eq!(body["chatSynced"], true);

    let event = read(&store, "events/e1").await.expect("event");
    assert_eq!(event["registeredVolunteers"], json!([]));
    let user = read(&store, "users/u1").await.expect("user");
    assert_eq!(user["registeredEvents"], json!([]));

    let (status, body) = send(
        &app,
        "DELETE",
        "/v1/events/e1/participants/u1",
        Some(&organization),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body), "failed-precondition");
}

#[tokio::test]
async fn only_the_owner_manages_participants() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    send(
        &app,
        "POST",
        "/v1/events/e1/registration",
        Some(&test_token("volunteer", "u1")),
        None,
    )
    .await;

    let (status, body) = send(
        &app,
        "DELETE",
        "/v1/events/e1/participants/u1",
        Some(&test_token("organization", "org2")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "permission-denied");

    let event = read(&store, "events/e1").await.expect("event");
    assert_eq!(event["registeredVolunteers"], json!(["u1"]));
}

#[tokio::test]
async fn participant_views_are_limited_to_the_owner_and_admins() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    send(
        &app,
        "POST",
        "/v1/events/e1/registration",
        Some(&test_token("volunteer", "u1")),
        None,
    )
    .await;

    let other = test_token("organization", "org2");
    for uri in ["/v1/events/e1/participants", "/v1/events/e1/participants/stats"] {
        let (status, body) = send(&app, "GET", uri, Some(&other), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_code(&body), "permission-denied");
    }

    let admin = test_token("admin", "ops");
    let (status, body) =
        send(&app, "GET", "/v1/events/e1/participants", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "u1");
}

#[tokio::test]
async fn dotted_and_non_ascii_ids_work_end_to_end() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    seed(&store, "users/jane.doe", json!({"displayName": "jane", "registeredEvents": []})).await;
    seed(&store, "users/zoë", json!({"displayName": "zoe", "registeredEvents": []})).await;
    let organization = test_token("organization", "org1");

    for volunteer in ["jane.doe", "zoë"] {
        let (status, _) = send(
            &app,
            "POST",
            "/v1/events/e1/registration",
            Some(&test_token("volunteer", volunteer)),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let event = read(&store, "events/e1").await.expect("event");
    assert!(event["registrationDates"]["jane.doe"].is_i64());
    assert!(event["registrationDates"]["zoë"].is_i64());
    assert!(event["registrationDates"].get("jane").is_none());

    let (status, body) = send(
        &app,
        "PUT",
        "/v1/events/e1/participants/jane.doe/status",
        Some(&organization),
        Some(json!({"status": "attended"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "attended");

    let (status, body) =
        send(&app, "GET", "/v1/events/e1/participants", Some(&organization), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("participants").len(), 2);

    let (status, body) = send(
        &app,
        "DELETE",
        "/v1/events/e1/participants/zo%C3%AB",
        Some(&organization),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
    let event = read(&store, "events/e1").await.expect("event");
    assert_eq!(event["registeredVolunteers"], json!(["jane.doe"]));
    assert_eq!(event["participantStatuses"]["jane.doe"]["status"], "attended");
    let user = read(&store, "users/zoë").await.expect("user");
    assert_eq!(user["registeredEvents"], json!([]));
}

#[tokio::test]
async fn ids_containing_a_slash_are_rejected() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    let organization = test_token("organization", "org1");

    let (status, body) = send(
        &app,
        "DELETE",
        "/v1/events/e1/participants/u1%2Fnested",
        Some(&organization),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid-argument");

    let (status, _) = send(
        &app,
        "POST",
        "/v1/events/e1/registration",
        Some(&test_token("volunteer", "u1/nested")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let event = read(&store, "events/e1").await.expect("event");
    assert_eq!(event["registeredVolunteers"], json!([]));
}

#[tokio::test]
async fn participant_status_updates_follow_event_state() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    send(
        &app,
        "POST",
        "/v1/events/e1/registration",
        Some(&test_token("volunteer", "u1")),
        None,
    )
    .await;
    let organization = test_token("organization", "org1");

    let (status, body) = send(
        &app,
        "PUT",
        "/v1/events/e1/participants/u1/status",
        Some(&organization),
        Some(json!({"status": "attended"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "attended");
    assert_eq!(body["updatedBy"], "org1");

    let (status, body) = send(
        &app,
        "PUT",
        "/v1/events/e1/participants/u1/status",
        Some(&organization),
        Some(json!({"status": "vanished"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid-argument");

    let (status, _) = send(
        &app,
        "PUT",
        "/v1/events/e1/participants/u2/status",
        Some(&organization),
        Some(json!({"status": "attended"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn bulk_remove_reports_partial_failures() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    send(
        &app,
        "POST",
        "/v1/events/e1/registration",
        Some(&test_token("volunteer", "u1")),
        None,
    )
    .await;
    send(
        &app,
        "POST",
        "/v1/events/e1/registration",
        Some(&test_token("volunteer", "u2")),
        None,
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/events/e1/participants/bulk-remove",
        Some(&test_token("organization", "org1")),
        Some(json!({"participantIds": ["u1", "ghost", "u2"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["successful"], 2);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["errors"][0]["participantId"], "ghost");

    let (status, _) = send(
        &app,
        "POST",
        "/v1/events/e1/participants/bulk-remove",
        Some(&test_token("organization", "org1")),
        Some(json!({"participantIds": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn event_status_transitions_are_validated() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    let organization = test_token("organization", "org1");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/events/e1/status",
        Some(&organization),
        Some(json!({"status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/events/e1/status",
        Some(&organization),
        Some(json!({"status": "active"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body), "failed-precondition");
}

#[tokio::test]
async fn organization_event_listing_is_scoped_to_the_caller() {
    let (store, app) = test_app();
    seed_event_world(&store).await;

    let (status, body) = send(
        &app,
        "GET",
        "/v1/organizations/org1/events",
        Some(&test_token("organization", "org1")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["event"]["id"], "e1");
    assert_eq!(body[0]["stats"]["maxCapacity"], 2);

    let (status, _) = send(
        &app,
        "GET",
        "/v1/organizations/org1/events",
        Some(&test_token("organization", "org2")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "GET",
        "/v1/organizations/org1/events",
        Some(&test_token("admin", "root")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn delete_event_requires_ownership() {
    let (store, app) = test_app();
    seed_event_world(&store).await;

    let (status, _) = send(
        &app,
        "DELETE",
        "/v1/events/e1",
        Some(&test_token("organization", "org2")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(read(&store, "events/e1").await.is_some());

    let (status, _) = send(
        &app,
        "DELETE",
        "/v1/events/e1",
        Some(&test_token("organization", "org1")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(read(&store, "events/e1").await.is_none());

    let (status, body) = send(
        &app,
        "DELETE",
        "/v1/events/e1",
        Some(&test_token("organization", "org1")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "not-found");
}

#[tokio::test]
async fn chat_moderation_is_limited_to_the_room_admin() {
    let (store, app) = test_app();
    seed_event_world(&store).await;
    seed(
        &store,
        "chatRooms/event_e1/messages/m1",
        json!({"text": "spam", "senderId": "u1", "createdAt": 1}),
    )
    .await;
    let request = json!({
        "operation": "deleteMessage",
        "chatRoomId": "event_e1",
        "messageId": "m1"
    });

    let (status, body) = send(
        &app,
        "POST",
        "/v1/chat/moderation",
        Some(&test_token("volunteer", "u1")),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "permission-denied");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/chat/moderation",
        Some(&test_token("organization", "org1")),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(read(&store, "chatRooms/event_e1/messages/m1").await.is_none());

    let (status, body) = send(
        &app,
        "POST",
        "/v1/chat/moderation",
        Some(&test_token("organization", "org1")),
        Some(json!({"operation": "removeParticipant", "chatRoomId": "event_e1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "invalid-argument");
}
