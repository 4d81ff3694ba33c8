use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::{CompartmentId, SessionToken},
    error::{ApiError, ErrorCode},
    protocol::{
        AccessLogResponse, ChangePinRequest, CompartmentSummary, FeedbackRequest, LoginRequest,
        LoginResponse, RegisterRequest, ServerEvent, ToggleResponse, VerifyPinRequest,
        VerifyPinResponse,
    },
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

mod config;

use config::load_settings;

const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: SessionToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let api = ApiContext::new(settings.default_pin);

    let state = AppState { api };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/compartments", get(list_compartments))
        .route("/compartments/:id/toggle", post(request_toggle))
        .route("/compartments/:id/toggle/cancel", post(cancel_pending))
        .route("/compartments/:id/pin/verify", post(verify_pin))
        .route("/compartments/:id/pin", post(change_pin))
        .route("/logs", get(access_log))
        .route("/feedback", post(submit_feedback))
        .route("/decoy", post(activate_decoy))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let response = server_api::register(&state.api, &req).map_err(http_error)?;
    Ok(Json(response))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let response = server_api::login(&state.api, &req).map_err(http_error)?;
    Ok(Json(response))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::logout(&state.api, q.token).map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_compartments(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Vec<CompartmentSummary>>, (StatusCode, Json<ApiError>)> {
    let compartments = server_api::list_compartments(&state.api, q.token).map_err(http_error)?;
    Ok(Json(compartments))
}

async fn request_toggle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<ToggleResponse>, (StatusCode, Json<ApiError>)> {
    let response = server_api::request_toggle(&state.api, q.token, &CompartmentId(id))
        .map_err(http_error)?;
    Ok(Json(response))
}

async fn cancel_pending(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<TokenQuery>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::cancel_pending(&state.api, q.token, &CompartmentId(id)).map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn verify_pin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<TokenQuery>,
    Json(req): Json<VerifyPinRequest>,
) -> Result<Json<VerifyPinResponse>, (StatusCode, Json<ApiError>)> {
    let response = server_api::verify_pin(&state.api, q.token, &CompartmentId(id), &req.pin)
        .map_err(http_error)?;
    Ok(Json(response))
}

async fn change_pin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<TokenQuery>,
    Json(req): Json<ChangePinRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::change_pin(
        &state.api,
        q.token,
        &CompartmentId(id),
        &req.current_pin,
        &req.new_pin,
    )
    .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn access_log(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<AccessLogResponse>, (StatusCode, Json<ApiError>)> {
    let entries = server_api::access_log(&state.api, q.token).map_err(http_error)?;
    Ok(Json(AccessLogResponse { entries }))
}

async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
    Json(req): Json<FeedbackRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::submit_feedback(&state.api, q.token, &req).map_err(http_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn activate_decoy(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    server_api::activate_decoy(&state.api, q.token).map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    // Subscribing validates the token before the upgrade; the receiver is
    // bound to the requesting session's channel only.
    let events_rx = server_api::subscribe_events(&state.api, q.token).map_err(http_error)?;
    Ok(ws.on_upgrade(move |socket| ws_connection(socket, events_rx)))
}

async fn ws_connection(
    socket: axum::extract::ws::WebSocket,
    mut events_rx: tokio::sync::broadcast::Receiver<ServerEvent>,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

fn http_error(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidPin | ErrorCode::InvalidCurrentPin => StatusCode::FORBIDDEN,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
