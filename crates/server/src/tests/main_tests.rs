use super::*;
use axum::{body, body::Body, http::Request};
use shared::domain::CompartmentStatus;
use tower::ServiceExt;

fn test_app() -> Router {
    let api = ApiContext::new("1234");
    build_router(Arc::new(AppState { api }))
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn login_via_http(app: &Router, username: &str) -> SessionToken {
    let request = Request::post("/login")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "username": username, "password": "secret" }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let dto: LoginResponse = json_body(response).await;
    dto.token
}

async fn post_json(app: &Router, uri: String, payload: serde_json::Value) -> axum::response::Response {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request");
    app.clone().oneshot(request).await.expect("response")
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = test_app();
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(bytes.as_ref(), b"ok");
}

#[tokio::test]
async fn login_rejects_blank_credentials() {
    let app = test_app();
    let response = post_json(
        &app,
        "/login".into(),
        serde_json::json!({ "username": "  ", "password": "secret" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_and_list_compartments() {
    let app = test_app();
    let response = post_json(
        &app,
        "/register".into(),
        serde_json::json!({
            "username": "bob",
            "password": "secret",
            "email": "bob@example.com"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let dto: LoginResponse = json_body(response).await;

    let request = Request::get(format!("/compartments?token={}", dto.token))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let compartments: Vec<CompartmentSummary> = json_body(response).await;
    assert_eq!(compartments.len(), 2);
    assert!(compartments
        .iter()
        .all(|c| c.status == CompartmentStatus::Locked));
}

#[tokio::test]
async fn requests_without_a_session_are_unauthorized() {
    let app = test_app();
    let token = SessionToken::generate();
    let request = Request::get(format!("/logs?token={token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn toggling_an_open_compartment_logs_the_transition() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    let response = post_json(
        &app,
        format!("/compartments/common/toggle?token={token}"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let dto: ToggleResponse = json_body(response).await;
    let ToggleResponse::Toggled { compartment } = dto else {
        panic!("expected an immediate transition");
    };
    assert_eq!(compartment.status, CompartmentStatus::Unlocked);

    let request = Request::get(format!("/logs?token={token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    let dto: AccessLogResponse = json_body(response).await;
    assert_eq!(dto.entries.len(), 1);
    assert_eq!(dto.entries[0].compartment_id, CompartmentId::from("common"));
    assert_eq!(dto.entries[0].action, CompartmentStatus::Unlocked);
    assert_eq!(dto.entries[0].username, "alice");
}

#[tokio::test]
async fn unknown_compartment_is_not_found() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    let response = post_json(
        &app,
        format!("/compartments/ghost/toggle?token={token}"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pin_gated_unlock_over_http() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    let response = post_json(
        &app,
        format!("/compartments/private/toggle?token={token}"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let dto: ToggleResponse = json_body(response).await;
    assert!(matches!(dto, ToggleResponse::PinRequired));

    let response = post_json(
        &app,
        format!("/compartments/private/pin/verify?token={token}"),
        serde_json::json!({ "pin": "0000" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Nothing was logged by the failed attempt.
    let request = Request::get(format!("/logs?token={token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let dto: AccessLogResponse = json_body(response).await;
    assert!(dto.entries.is_empty());

    let response = post_json(
        &app,
        format!("/compartments/private/pin/verify?token={token}"),
        serde_json::json!({ "pin": "1234" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let dto: VerifyPinResponse = json_body(response).await;
    let compartment = dto.compartment.expect("completed toggle");
    assert_eq!(compartment.status, CompartmentStatus::Unlocked);
}

#[tokio::test]
async fn canceling_a_pending_toggle_leaves_no_trace() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    post_json(
        &app,
        format!("/compartments/private/toggle?token={token}"),
        serde_json::json!({}),
    )
    .await;
    let response = post_json(
        &app,
        format!("/compartments/private/toggle/cancel?token={token}"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = post_json(
        &app,
        format!("/compartments/private/pin/verify?token={token}"),
        serde_json::json!({ "pin": "1234" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let dto: VerifyPinResponse = json_body(response).await;
    assert!(dto.compartment.is_none());
}

#[tokio::test]
async fn change_pin_over_http() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    let response = post_json(
        &app,
        format!("/compartments/common/pin?token={token}"),
        serde_json::json!({ "current_pin": "0000", "new_pin": "5678" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = post_json(
        &app,
        format!("/compartments/common/pin?token={token}"),
        serde_json::json!({ "current_pin": "1234", "new_pin": "567" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        &app,
        format!("/compartments/common/pin?token={token}"),
        serde_json::json!({ "current_pin": "1234", "new_pin": "5678" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = post_json(
        &app,
        format!("/compartments/common/pin/verify?token={token}"),
        serde_json::json!({ "pin": "1234" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = post_json(
        &app,
        format!("/compartments/common/pin/verify?token={token}"),
        serde_json::json!({ "pin": "5678" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn feedback_is_accepted_and_validated() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    let response = post_json(
        &app,
        format!("/feedback?token={token}"),
        serde_json::json!({ "kind": "bug", "message": "   " }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        &app,
        format!("/feedback?token={token}"),
        serde_json::json!({ "kind": "suggestion", "message": "add a third compartment" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn decoy_mode_requires_a_session() {
    let app = test_app();

    let response = post_json(
        &app,
        format!("/decoy?token={}", SessionToken::generate()),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = login_via_http(&app, "alice").await;
    let response = post_json(&app, format!("/decoy?token={token}"), serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Notification-only: nothing reaches the access log.
    let request = Request::get(format!("/logs?token={token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    let dto: AccessLogResponse = json_body(response).await;
    assert!(dto.entries.is_empty());
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = test_app();
    let token = login_via_http(&app, "alice").await;

    let response = post_json(
        &app,
        format!("/logout?token={token}"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::get(format!("/compartments?token={token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
