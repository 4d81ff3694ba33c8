//! Session-scoped access controller for a bank of lockable compartments.
//!
//! One controller instance owns the compartment list, the PIN registry and
//! the access log for exactly one authenticated session. Execution is
//! synchronous and single-actor; the "awaiting PIN" pause between a toggle
//! request and its verification is plain data, not a suspension point.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use shared::domain::{
    AccessLogEntry, Compartment, CompartmentId, CompartmentStatus, Notification, Severity,
};
use thiserror::Error;
use tracing::info;

pub const PIN_LENGTH: usize = 4;

/// Receives a notification after every completed transition. Fire-and-forget;
/// the controller never consumes a return value.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Receives a spoken-style announcement after every completed transition.
/// Best effort; a no-op implementation must not affect correctness.
pub trait AnnouncementSink: Send + Sync {
    fn announce(&self, text: &str);
}

pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _notification: &Notification) {}
}

pub struct NoopAnnouncer;

impl AnnouncementSink for NoopAnnouncer {
    fn announce(&self, _text: &str) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("compartment not found: {0}")]
    NotFound(CompartmentId),
    #[error("PIN does not match")]
    InvalidPin,
    #[error("current PIN does not match")]
    InvalidCurrentPin,
    #[error("new PIN must be exactly {PIN_LENGTH} digits")]
    InvalidNewPin,
}

/// Layout entry used to seed a controller. Every compartment starts Locked
/// and gets a registry entry for the default PIN, whether or not its toggle
/// gates on PIN entry (the change-PIN flow covers both kinds).
#[derive(Debug, Clone)]
pub struct CompartmentSpec {
    pub id: CompartmentId,
    pub name: String,
    pub requires_pin: bool,
}

impl CompartmentSpec {
    pub fn new(id: impl Into<CompartmentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            requires_pin: false,
        }
    }

    pub fn with_pin(mut self) -> Self {
        self.requires_pin = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum ToggleOutcome {
    /// The transition completed; snapshot of the compartment afterwards.
    Toggled(Compartment),
    /// The compartment gates on a PIN; nothing was mutated. The caller is
    /// expected to collect a candidate and call [`AccessController::verify_pin`],
    /// or abandon the attempt via [`AccessController::cancel_pending`].
    PinRequired,
}

pub struct AccessController {
    username: String,
    compartments: Vec<Compartment>,
    pins: HashMap<CompartmentId, String>,
    log: Vec<AccessLogEntry>,
    next_log_id: u64,
    awaiting_pin: HashSet<CompartmentId>,
    notifier: Arc<dyn NotificationSink>,
    announcer: Arc<dyn AnnouncementSink>,
}

impl AccessController {
    pub fn new(
        username: impl Into<String>,
        layout: Vec<CompartmentSpec>,
        default_pin: &str,
        notifier: Arc<dyn NotificationSink>,
        announcer: Arc<dyn AnnouncementSink>,
    ) -> Self {
        let mut compartments = Vec::with_capacity(layout.len());
        let mut pins = HashMap::with_capacity(layout.len());
        for spec in layout {
            pins.insert(spec.id.clone(), default_pin.to_string());
            compartments.push(Compartment {
                id: spec.id,
                name: spec.name,
                status: CompartmentStatus::Locked,
                requires_pin: spec.requires_pin,
            });
        }
        Self {
            username: username.into(),
            compartments,
            pins,
            log: Vec::new(),
            next_log_id: 1,
            awaiting_pin: HashSet::new(),
            notifier,
            announcer,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    /// Access log, newest entry first. Read-only; entries are immutable and
    /// never deleted for the lifetime of the session.
    pub fn access_log(&self) -> &[AccessLogEntry] {
        &self.log
    }

    /// Requests a lock/unlock toggle. Unlocking a PIN-protected compartment
    /// suspends the transition until [`Self::verify_pin`] succeeds; locking
    /// never gates on a PIN.
    pub fn request_toggle(&mut self, id: &CompartmentId) -> Result<ToggleOutcome, AccessError> {
        let index = self.index_of(id)?;
        let compartment = &self.compartments[index];
        if compartment.requires_pin && compartment.status == CompartmentStatus::Locked {
            self.awaiting_pin.insert(id.clone());
            info!(compartment = %id, "toggle suspended awaiting PIN");
            return Ok(ToggleOutcome::PinRequired);
        }
        Ok(ToggleOutcome::Toggled(self.transition(index)))
    }

    /// Checks a candidate PIN against the registry. A match completes the
    /// pending toggle for that compartment, if one exists; a mismatch mutates
    /// nothing and may be retried without limit. Returns the post-transition
    /// snapshot when a pending toggle was completed.
    pub fn verify_pin(
        &mut self,
        id: &CompartmentId,
        candidate: &str,
    ) -> Result<Option<Compartment>, AccessError> {
        let index = self.index_of(id)?;
        let registered = self.pins.get(id).ok_or_else(|| AccessError::NotFound(id.clone()))?;
        if candidate != registered.as_str() {
            return Err(AccessError::InvalidPin);
        }
        if self.awaiting_pin.remove(id) {
            return Ok(Some(self.transition(index)));
        }
        Ok(None)
    }

    /// Abandons an awaiting-PIN toggle (the user closed the PIN prompt).
    /// No side effects; unknown or non-pending ids are ignored.
    pub fn cancel_pending(&mut self, id: &CompartmentId) {
        self.awaiting_pin.remove(id);
    }

    /// Replaces the registered PIN. The current PIN must match and the new
    /// PIN must be exactly [`PIN_LENGTH`] ASCII digits; format enforcement
    /// lives here rather than in the input widgets.
    pub fn change_pin(
        &mut self,
        id: &CompartmentId,
        current: &str,
        new: &str,
    ) -> Result<(), AccessError> {
        let registered = self.pins.get(id).ok_or_else(|| AccessError::NotFound(id.clone()))?;
        if current != registered.as_str() {
            return Err(AccessError::InvalidCurrentPin);
        }
        if !is_valid_pin(new) {
            return Err(AccessError::InvalidNewPin);
        }
        self.pins.insert(id.clone(), new.to_string());
        info!(compartment = %id, "PIN changed");
        Ok(())
    }

    fn index_of(&self, id: &CompartmentId) -> Result<usize, AccessError> {
        self.compartments
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| AccessError::NotFound(id.clone()))
    }

    fn transition(&mut self, index: usize) -> Compartment {
        let compartment = &mut self.compartments[index];
        compartment.status = compartment.status.toggled();
        let snapshot = compartment.clone();

        let entry = AccessLogEntry {
            id: self.next_log_id,
            compartment_id: snapshot.id.clone(),
            compartment_name: snapshot.name.clone(),
            action: snapshot.status,
            timestamp: Utc::now(),
            username: self.username.clone(),
        };
        self.next_log_id += 1;
        // Newest-first is the presentation contract.
        self.log.insert(0, entry);

        info!(
            compartment = %snapshot.id,
            status = %snapshot.status,
            user = %self.username,
            "compartment toggled"
        );

        let severity = match snapshot.status {
            CompartmentStatus::Unlocked => Severity::Warning,
            CompartmentStatus::Locked => Severity::Info,
        };
        self.notifier.notify(&Notification::new(
            format!("Compartment {}", snapshot.status),
            format!("{} has been {}", snapshot.name, snapshot.status),
            severity,
        ));
        self.announcer.announce(&format!("{} {}", snapshot.name, snapshot.status));

        snapshot
    }
}

pub fn is_valid_pin(candidate: &str) -> bool {
    candidate.len() == PIN_LENGTH && candidate.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
