use serde::{Deserialize, Serialize};

use crate::domain::{
    AccessLogEntry, Compartment, CompartmentId, CompartmentStatus, FeedbackKind, Notification,
    SessionToken,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: SessionToken,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompartmentSummary {
    pub id: CompartmentId,
    pub name: String,
    pub status: CompartmentStatus,
    pub requires_pin: bool,
}

impl From<&Compartment> for CompartmentSummary {
    fn from(value: &Compartment) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
            status: value.status,
            requires_pin: value.requires_pin,
        }
    }
}

/// Result of a toggle request. `PinRequired` means no transition happened
/// yet; the caller is expected to collect a PIN and call the verify route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ToggleResponse {
    Toggled { compartment: CompartmentSummary },
    PinRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPinRequest {
    pub pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPinResponse {
    /// Present when the verification completed a pending toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment: Option<CompartmentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePinRequest {
    pub current_pin: String,
    pub new_pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub kind: FeedbackKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogResponse {
    pub entries: Vec<AccessLogEntry>,
}

/// Events fanned out to connected websocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Notification(Notification),
    Announcement { text: String },
}
