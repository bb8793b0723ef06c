//! Check-in deadline state machine and destination management.
//!
//! Every write is a field-scoped [`ActorPatch`]: a ping never touches the
//! destination and setting a destination never touches the check-in fields,
//! so writes from two devices cannot erase each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use safetynet_core::checkin::{self, Countdown};
use safetynet_core::{
    Actor, ActorId, ActorPatch, Coordinates, Destination, FieldUpdate, LocationSensor, Notifier,
    RemoteStore, SafetyConfig, SafetyStatus,
};
use safetynet_sync::SyncEngine;

use crate::error::DaemonError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingOutcome {
    pub deadline: DateTime<Utc>,
    pub duration_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanicOutcome {
    pub panic_at: DateTime<Utc>,
    /// Local log sequence of the panic breadcrumb, if a fix was available.
    pub breadcrumb_seq: Option<u64>,
    /// Whether that breadcrumb is confirmed remotely.
    pub replicated: bool,
    /// Whether an SOS push was handed to the transport.
    pub notified: bool,
}

pub struct SafetyService {
    store: Arc<dyn RemoteStore>,
    sensor: Arc<dyn LocationSensor>,
    engine: Arc<SyncEngine>,
    notifier: Notifier,
    config: SafetyConfig,
}

impl SafetyService {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        sensor: Arc<dyn LocationSensor>,
        engine: Arc<SyncEngine>,
        notifier: Notifier,
        config: SafetyConfig,
    ) -> Self {
        Self {
            store,
            sensor,
            engine,
            notifier,
            config,
        }
    }

    /// Store the check-in window. Does not arm a deadline.
    ///
    /// The raw value is kept; invalid values fall back to the default at ping.
    pub async fn set_duration(&self, id: &ActorId, hours: f64) -> Result<(), DaemonError> {
        self.store
            .update_actor(
                id,
                &ActorPatch::new().set(FieldUpdate::CheckInDurationHours(Some(hours))),
            )
            .await?;
        tracing::info!(actor = %id, hours, "check-in duration set");
        Ok(())
    }

    pub async fn ping(&self, id: &ActorId) -> Result<PingOutcome, DaemonError> {
        self.ping_at(id, Utc::now()).await
    }

    /// Arm a fresh deadline from `now`. The only way back to `safe`.
    pub async fn ping_at(&self, id: &ActorId, now: DateTime<Utc>) -> Result<PingOutcome, DaemonError> {
        let actor = self.require(id).await?;
        let duration_hours = checkin::effective_duration_hours(
            actor.safety.check_in_duration_hours,
            self.config.default_check_in_hours,
        );
        let deadline = checkin::deadline_from(now, duration_hours).ok_or(
            DaemonError::InvalidDuration {
                hours: duration_hours,
            },
        )?;

        let patch = ActorPatch::new()
            .set(FieldUpdate::Status(SafetyStatus::Safe))
            .set(FieldUpdate::NextCheckInDeadline(Some(deadline)))
            .set(FieldUpdate::LastPingAt(now));
        self.store.update_actor(id, &patch).await?;

        tracing::info!(actor = %id, %deadline, duration_hours, "check-in recorded");
        Ok(PingOutcome {
            deadline,
            duration_hours,
        })
    }

    pub async fn panic(&self, id: &ActorId) -> Result<PanicOutcome, DaemonError> {
        self.panic_at(id, Utc::now()).await
    }

    /// Enter `sos`. The status write is the record of truth and its failure
    /// propagates; the breadcrumb and the push are best-effort.
    pub async fn panic_at(&self, id: &ActorId, now: DateTime<Utc>) -> Result<PanicOutcome, DaemonError> {
        let actor = self.require(id).await?;

        let sample = match self.sensor.current_sample().await {
            Ok(sample) => Some(sample),
            Err(err) => {
                tracing::warn!(actor = %id, error = %err, "no location fix for panic");
                None
            }
        };

        let patch = ActorPatch::new()
            .set(FieldUpdate::Status(SafetyStatus::Sos))
            .set(FieldUpdate::PanicAt(Some(now)));
        self.store.update_actor(id, &patch).await?;
        tracing::warn!(actor = %id, "SOS raised");

        let mut breadcrumb_seq = None;
        let mut replicated = false;
        if let Some(sample) = &sample {
            match self.engine.ingest(id, sample.coords, sample.captured_at).await {
                Ok(outcome) => {
                    breadcrumb_seq = Some(outcome.entry.seq);
                    replicated = outcome.replicated();
                }
                Err(err) => {
                    tracing::error!(actor = %id, error = %err, "panic breadcrumb not recorded");
                }
            }
        }

        let guardian = self.linked_guardian(&actor).await;
        let body = match &sample {
            Some(sample) => format!(
                "{} needs help at {:.5}, {:.5}",
                actor.email, sample.coords.latitude, sample.coords.longitude
            ),
            None => format!("{} needs help", actor.email),
        };
        let delivery = self
            .notifier
            .dispatch_to(guardian.as_ref(), &self.config.push.sos_title, &body)
            .await;

        Ok(PanicOutcome {
            panic_at: now,
            breadcrumb_seq,
            replicated,
            notified: delivery.attempted(),
        })
    }

    /// Replace the destination; the new one starts unarrived.
    pub async fn set_destination(
        &self,
        id: &ActorId,
        coords: Coordinates,
        label: Option<String>,
    ) -> Result<Destination, DaemonError> {
        let destination = Destination::new(coords, label);
        self.store
            .update_actor(
                id,
                &ActorPatch::new().set(FieldUpdate::Destination(Some(destination.clone()))),
            )
            .await?;
        tracing::info!(actor = %id, label = %destination.label, "destination set");
        Ok(destination)
    }

    pub async fn clear_destination(&self, id: &ActorId) -> Result<(), DaemonError> {
        self.store
            .update_actor(id, &ActorPatch::new().set(FieldUpdate::Destination(None)))
            .await?;
        tracing::info!(actor = %id, "destination cleared");
        Ok(())
    }

    /// Live change feed for one actor record.
    pub async fn subscribe_to_actor(
        &self,
        id: &ActorId,
    ) -> Result<broadcast::Receiver<Actor>, DaemonError> {
        Ok(self.store.subscribe_actor(id).await?)
    }

    pub fn evaluate_overdue(actor: &Actor, now: DateTime<Utc>) -> bool {
        checkin::is_overdue(&actor.safety, now)
    }

    pub fn countdown(actor: &Actor, now: DateTime<Utc>) -> Countdown {
        Countdown::at(actor.safety.next_check_in_deadline, now)
    }

    pub async fn actor(&self, id: &ActorId) -> Result<Actor, DaemonError> {
        self.require(id).await
    }

    async fn require(&self, id: &ActorId) -> Result<Actor, DaemonError> {
        self.store
            .get_actor(id)
            .await?
            .ok_or_else(|| DaemonError::UnknownActor { id: id.clone() })
    }

    async fn linked_guardian(&self, actor: &Actor) -> Option<Actor> {
        let id = actor.linked_id.as_ref()?;
        match self.store.get_actor(id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(guardian = %id, error = %err, "guardian lookup failed");
                None
            }
        }
    }
}
