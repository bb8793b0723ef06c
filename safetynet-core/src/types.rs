//! Domain types shared by every SafetyNet crate.
//!
//! The [`Actor`] record is the only document written by more than one device.
//! It is never overwritten wholesale: every mutation goes through an
//! [`ActorPatch`] so that concurrent writers only touch the fields they own.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identifier of an actor. A dependent's id doubles as its pairing code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guardian,
    Dependent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Guardian => write!(f, "guardian"),
            Role::Dependent => write!(f, "dependent"),
        }
    }
}

/// Persisted safety status of a dependent. `overdue` is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyStatus {
    #[default]
    Pending,
    Safe,
    Sos,
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyStatus::Pending => write!(f, "pending"),
            SafetyStatus::Safe => write!(f, "safe"),
            SafetyStatus::Sos => write!(f, "sos"),
        }
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One reading from the location sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub coords: Coordinates,
    /// Horizontal accuracy radius in meters, when the sensor reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// One timestamped location sample attributed to an actor. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub owner_id: ActorId,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl Breadcrumb {
    pub fn new(owner_id: ActorId, coords: Coordinates, captured_at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            latitude: coords.latitude,
            longitude: coords.longitude,
            captured_at,
        }
    }

    pub fn coords(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Actor record
// ---------------------------------------------------------------------------

/// Label used when a destination is set without one.
pub const DEFAULT_DESTINATION_LABEL: &str = "Target Location";

/// Arrival target set by a dependent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
    #[serde(default)]
    pub arrived: bool,
}

impl Destination {
    /// A fresh, not-yet-reached destination.
    pub fn new(coords: Coordinates, label: Option<String>) -> Self {
        Self {
            latitude: coords.latitude,
            longitude: coords.longitude,
            label: label.unwrap_or_else(|| DEFAULT_DESTINATION_LABEL.to_string()),
            arrived: false,
        }
    }

    pub fn coords(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Check-in state embedded in a dependent's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SafetyState {
    #[serde(default)]
    pub status: SafetyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_duration_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_check_in_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ping_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    pub email: String,
    /// The paired actor. Written only by the pairing protocol.
    #[serde(default)]
    pub linked_id: Option<ActorId>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub safety: SafetyState,
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl Actor {
    /// A freshly registered actor: unlinked, `pending`, no destination.
    pub fn new(id: impl Into<ActorId>, role: Role, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            email: email.into(),
            linked_id: None,
            push_token: None,
            safety: SafetyState::default(),
            destination: None,
        }
    }

    pub fn is_dependent(&self) -> bool {
        self.role == Role::Dependent
    }
}

// ---------------------------------------------------------------------------
// Field-scoped updates
// ---------------------------------------------------------------------------

/// A single field write on an [`Actor`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Status(SafetyStatus),
    CheckInDurationHours(Option<f64>),
    NextCheckInDeadline(Option<DateTime<Utc>>),
    LastPingAt(DateTime<Utc>),
    PanicAt(Option<DateTime<Utc>>),
    Destination(Option<Destination>),
    DestinationArrived(bool),
    LinkedId(Option<ActorId>),
    PushToken(Option<String>),
}

/// An ordered set of field writes applied atomically to one actor document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActorPatch {
    pub updates: Vec<FieldUpdate>,
}

impl ActorPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, update: FieldUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Apply every update in order. Fields not named by the patch are untouched.
    ///
    /// `DestinationArrived` is a no-op when no destination is set.
    pub fn apply(&self, actor: &mut Actor) {
        for update in &self.updates {
            match update {
                FieldUpdate::Status(status) => actor.safety.status = *status,
                FieldUpdate::CheckInDurationHours(hours) => {
                    actor.safety.check_in_duration_hours = *hours
                }
                FieldUpdate::NextCheckInDeadline(at) => actor.safety.next_check_in_deadline = *at,
                FieldUpdate::LastPingAt(at) => actor.safety.last_ping_at = Some(*at),
                FieldUpdate::PanicAt(at) => actor.safety.panic_at = *at,
                FieldUpdate::Destination(dest) => actor.destination = dest.clone(),
                FieldUpdate::DestinationArrived(arrived) => {
                    if let Some(dest) = actor.destination.as_mut() {
                        dest.arrived = *arrived;
                    }
                }
                FieldUpdate::LinkedId(id) => actor.linked_id = id.clone(),
                FieldUpdate::PushToken(token) => actor.push_token = token.clone(),
            }
        }
    }
}

/// Guard evaluated by the store atomically with a conditional patch.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The actor's destination is at these coordinates and not yet reached.
    DestinationUnarrived(Coordinates),
    /// The actor is not linked to anyone, or already linked to this id.
    LinkedToNoneOr(ActorId),
}

impl Precondition {
    pub fn holds(&self, actor: &Actor) -> bool {
        match self {
            Precondition::DestinationUnarrived(coords) => actor
                .destination
                .as_ref()
                .map(|d| !d.arrived && d.coords() == *coords)
                .unwrap_or(false),
            Precondition::LinkedToNoneOr(id) => match &actor.linked_id {
                None => true,
                Some(linked) => linked == id,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
