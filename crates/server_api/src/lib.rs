//! Session registry and operation layer between the HTTP surface and the
//! per-session access controllers.
//!
//! Every login creates its own [`AccessController`]; nothing is shared
//! between sessions and nothing survives logout. The state lives in the
//! context handed to the handlers, never in a process-wide singleton.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use locker_core::{
    AccessController, AccessError, AnnouncementSink, CompartmentSpec, NotificationSink,
    ToggleOutcome,
};
use shared::{
    domain::{AccessLogEntry, CompartmentId, Notification, Severity, SessionToken},
    error::{ApiError, ErrorCode},
    protocol::{
        CompartmentSummary, FeedbackRequest, LoginRequest, LoginResponse, RegisterRequest,
        ServerEvent, ToggleResponse, VerifyPinResponse,
    },
};
use tokio::sync::broadcast;
use tracing::info;

/// Capacity of each session's event channel; a lagging or absent client
/// loses events, never correctness.
const SESSION_EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct ApiContext {
    sessions: Arc<Mutex<HashMap<SessionToken, Session>>>,
    default_pin: String,
}

struct Session {
    controller: AccessController,
    /// Event channel private to this session; notifications and
    /// announcements never cross session boundaries.
    events: broadcast::Sender<ServerEvent>,
}

/// Bridges the controller's sink seams onto one session's event channel.
/// Sends are best effort; a channel with no subscribers drops the event.
struct BroadcastSink {
    events: broadcast::Sender<ServerEvent>,
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: &Notification) {
        let _ = self
            .events
            .send(ServerEvent::Notification(notification.clone()));
    }
}

impl AnnouncementSink for BroadcastSink {
    fn announce(&self, text: &str) {
        let _ = self.events.send(ServerEvent::Announcement {
            text: text.to_string(),
        });
    }
}

/// The layout every fresh session starts with: one open compartment and one
/// PIN-protected compartment, both Locked.
pub fn default_compartments() -> Vec<CompartmentSpec> {
    vec![
        CompartmentSpec::new("common", "Common Compartment"),
        CompartmentSpec::new("private", "Private Compartment (A)").with_pin(),
    ]
}

impl ApiContext {
    pub fn new(default_pin: impl Into<String>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            default_pin: default_pin.into(),
        }
    }

    fn start_session(&self, username: &str) -> Result<LoginResponse, ApiError> {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let sink = Arc::new(BroadcastSink {
            events: events.clone(),
        });
        let controller = AccessController::new(
            username,
            default_compartments(),
            &self.default_pin,
            sink.clone(),
            sink,
        );
        let token = SessionToken::generate();
        self.lock_sessions()?
            .insert(token, Session { controller, events });
        info!(user = %username, "session established");
        Ok(LoginResponse {
            token,
            username: username.to_string(),
        })
    }

    fn lock_sessions(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<SessionToken, Session>>, ApiError> {
        self.sessions
            .lock()
            .map_err(|_| ApiError::new(ErrorCode::Internal, "session registry poisoned"))
    }
}

/// Registration collects credentials but has no account store behind it; a
/// successful registration establishes a session exactly like a login.
pub fn register(ctx: &ApiContext, req: &RegisterRequest) -> Result<LoginResponse, ApiError> {
    let username = non_empty(&req.username, "username")?;
    non_empty(&req.password, "password")?;
    non_empty(&req.email, "email")?;
    ctx.start_session(username)
}

pub fn login(ctx: &ApiContext, req: &LoginRequest) -> Result<LoginResponse, ApiError> {
    let username = non_empty(&req.username, "username")?;
    non_empty(&req.password, "password")?;
    ctx.start_session(username)
}

/// Removes the session and everything it owns: compartment states, PIN
/// registry and access log are discarded together. Idempotent.
pub fn logout(ctx: &ApiContext, token: SessionToken) -> Result<(), ApiError> {
    if let Some(session) = ctx.lock_sessions()?.remove(&token) {
        info!(user = %session.controller.username(), "session closed");
    }
    Ok(())
}

pub fn list_compartments(
    ctx: &ApiContext,
    token: SessionToken,
) -> Result<Vec<CompartmentSummary>, ApiError> {
    with_session(ctx, token, |controller| {
        Ok(controller
            .compartments()
            .iter()
            .map(CompartmentSummary::from)
            .collect())
    })
}

pub fn request_toggle(
    ctx: &ApiContext,
    token: SessionToken,
    id: &CompartmentId,
) -> Result<ToggleResponse, ApiError> {
    with_session(ctx, token, |controller| {
        match controller.request_toggle(id).map_err(access_error)? {
            ToggleOutcome::Toggled(compartment) => Ok(ToggleResponse::Toggled {
                compartment: CompartmentSummary::from(&compartment),
            }),
            ToggleOutcome::PinRequired => Ok(ToggleResponse::PinRequired),
        }
    })
}

pub fn verify_pin(
    ctx: &ApiContext,
    token: SessionToken,
    id: &CompartmentId,
    candidate: &str,
) -> Result<VerifyPinResponse, ApiError> {
    with_session(ctx, token, |controller| {
        let completed = controller.verify_pin(id, candidate).map_err(access_error)?;
        Ok(VerifyPinResponse {
            compartment: completed.as_ref().map(CompartmentSummary::from),
        })
    })
}

pub fn cancel_pending(
    ctx: &ApiContext,
    token: SessionToken,
    id: &CompartmentId,
) -> Result<(), ApiError> {
    with_session(ctx, token, |controller| {
        controller.cancel_pending(id);
        Ok(())
    })
}

pub fn change_pin(
    ctx: &ApiContext,
    token: SessionToken,
    id: &CompartmentId,
    current: &str,
    new: &str,
) -> Result<(), ApiError> {
    with_session(ctx, token, |controller| {
        controller.change_pin(id, current, new).map_err(access_error)
    })
}

/// Opens a receiver on the session's private event channel, for the
/// websocket fan-out. Each session hears only its own transitions.
pub fn subscribe_events(
    ctx: &ApiContext,
    token: SessionToken,
) -> Result<broadcast::Receiver<ServerEvent>, ApiError> {
    let sessions = ctx.lock_sessions()?;
    let session = sessions
        .get(&token)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown session token"))?;
    Ok(session.events.subscribe())
}

/// Decoy mode is notification-only: it changes no compartment state and
/// logs nothing, it just makes the client look busy.
pub fn activate_decoy(ctx: &ApiContext, token: SessionToken) -> Result<(), ApiError> {
    let sessions = ctx.lock_sessions()?;
    let session = sessions
        .get(&token)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown session token"))?;
    info!(user = %session.controller.username(), "decoy mode activated");
    let _ = session.events.send(ServerEvent::Notification(Notification::new(
        "Decoy Mode Activated",
        "Decoy mode is now active",
        Severity::Info,
    )));
    Ok(())
}

pub fn access_log(ctx: &ApiContext, token: SessionToken) -> Result<Vec<AccessLogEntry>, ApiError> {
    with_session(ctx, token, |controller| Ok(controller.access_log().to_vec()))
}

/// Feedback is acknowledged and traced, nothing more; there is no store and
/// no downstream consumer.
pub fn submit_feedback(
    ctx: &ApiContext,
    token: SessionToken,
    req: &FeedbackRequest,
) -> Result<(), ApiError> {
    with_session(ctx, token, |controller| {
        if req.message.trim().is_empty() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "feedback message cannot be empty",
            ));
        }
        info!(
            user = %controller.username(),
            kind = ?req.kind,
            "feedback received"
        );
        Ok(())
    })
}

fn with_session<T>(
    ctx: &ApiContext,
    token: SessionToken,
    op: impl FnOnce(&mut AccessController) -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let mut sessions = ctx.lock_sessions()?;
    let session = sessions
        .get_mut(&token)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown session token"))?;
    op(&mut session.controller)
}

fn non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("{field} cannot be empty"),
        ));
    }
    Ok(trimmed)
}

fn access_error(err: AccessError) -> ApiError {
    let code = match err {
        AccessError::NotFound(_) => ErrorCode::NotFound,
        AccessError::InvalidPin => ErrorCode::InvalidPin,
        AccessError::InvalidCurrentPin => ErrorCode::InvalidCurrentPin,
        AccessError::InvalidNewPin => ErrorCode::Validation,
    };
    ApiError::new(code, err.to_string())
}
