//! Seams to the external collaborators: remote document store, location
//! sensor, and push transport.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::config::CaptureParams;
use crate::error::{PushError, SensorError, StoreError};
use crate::types::{Actor, ActorId, ActorPatch, Breadcrumb, Precondition, Sample};

/// Stream of sample batches delivered by a continuous sensor subscription.
pub type SampleStream = mpsc::Receiver<Result<Vec<Sample>, SensorError>>;

/// Networked document store shared by the guardian and dependent devices.
///
/// Every write is a field-scoped partial update on one document and is atomic
/// per document. No cross-document transaction is assumed unless
/// [`RemoteStore::link_pair`] says otherwise.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Registration. Fails with `AlreadyExists` if the id is taken.
    async fn create_actor(&self, actor: Actor) -> Result<(), StoreError>;

    async fn get_actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError>;

    /// Apply `patch` to an existing actor. `NotFound` if absent.
    async fn update_actor(&self, id: &ActorId, patch: &ActorPatch) -> Result<(), StoreError>;

    /// Apply `patch` only if `precondition` holds, atomically with the check.
    /// Returns whether the patch was applied.
    async fn update_actor_if(
        &self,
        id: &ActorId,
        precondition: &Precondition,
        patch: &ActorPatch,
    ) -> Result<bool, StoreError>;

    /// Write both sides of a pairing in one multi-document transaction.
    ///
    /// Returns `Ok(false)` when the store has no transaction primitive; the
    /// caller then issues two sequential writes and reconciles.
    async fn link_pair(&self, guardian: &ActorId, dependent: &ActorId) -> Result<bool, StoreError> {
        let _ = (guardian, dependent);
        Ok(false)
    }

    async fn append_breadcrumb(&self, breadcrumb: &Breadcrumb) -> Result<(), StoreError>;

    /// All remote breadcrumbs for `owner`, newest first.
    async fn list_breadcrumbs(&self, owner: &ActorId) -> Result<Vec<Breadcrumb>, StoreError>;

    /// Live subscription to one actor document. Every committed change is
    /// delivered as the full post-change record.
    async fn subscribe_actor(&self, id: &ActorId) -> Result<broadcast::Receiver<Actor>, StoreError>;
}

/// OS location capability.
#[async_trait]
pub trait LocationSensor: Send + Sync {
    /// One immediate high-accuracy fix.
    async fn current_sample(&self) -> Result<Sample, SensorError>;

    /// Continuous delivery keyed by `task_id`; delivery continues while the
    /// host is backgrounded. Subscribing twice with the same id replaces the
    /// earlier stream rather than adding a second one.
    async fn subscribe(
        &self,
        task_id: &str,
        params: CaptureParams,
    ) -> Result<SampleStream, SensorError>;

    async fn unsubscribe(&self, task_id: &str);
}

/// Token-addressed notification delivery. Best-effort.
#[async_trait]
pub trait PushDispatch: Send + Sync {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError>;
}
