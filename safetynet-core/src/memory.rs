//! In-process collaborators.
//!
//! These back the local-only deployment variant (both roles on one host) and
//! double as deterministic fakes in tests: the store can be taken offline or
//! told to fail after a number of writes, and the sensor is fed by the host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use crate::config::CaptureParams;
use crate::error::{PushError, SensorError, StoreError};
use crate::ports::{LocationSensor, PushDispatch, RemoteStore, SampleStream};
use crate::types::{Actor, ActorId, ActorPatch, Breadcrumb, FieldUpdate, Precondition, Sample};

const SUBSCRIBER_CAPACITY: usize = 64;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    actors: HashMap<ActorId, Actor>,
    breadcrumbs: Vec<Breadcrumb>,
    channels: HashMap<ActorId, broadcast::Sender<Actor>>,
    /// Remaining actor writes before every further write fails.
    write_budget: Option<usize>,
}

impl StoreInner {
    fn publish(&mut self, id: &ActorId) {
        let Some(actor) = self.actors.get(id).cloned() else {
            return;
        };
        if let Some(tx) = self.channels.get(id) {
            // No live receivers is fine.
            let _ = tx.send(actor);
        }
    }

    fn spend_write(&mut self) -> Result<(), StoreError> {
        match self.write_budget.as_mut() {
            Some(0) => Err(StoreError::Transient("write budget exhausted".to_string())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Document store held in memory with per-actor broadcast subscriptions.
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    transactions: bool,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that supports multi-document transactions.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            transactions: true,
            offline: AtomicBool::new(false),
        }
    }

    /// A store with only per-document atomicity, like most document backends.
    pub fn without_transactions() -> Self {
        Self {
            transactions: false,
            ..Self::new()
        }
    }

    /// While offline every operation fails with `StoreError::Transient`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Allow `n` more actor writes, then fail the rest. `None` lifts the limit.
    pub fn set_write_budget(&self, n: Option<usize>) {
        lock(&self.inner).write_budget = n;
    }

    /// A transactional store preloaded with persisted records.
    pub fn restore(actors: Vec<Actor>, breadcrumbs: Vec<Breadcrumb>) -> Self {
        let store = Self::new();
        {
            let mut inner = lock(&store.inner);
            inner.actors = actors
                .into_iter()
                .map(|actor| (actor.id.clone(), actor))
                .collect();
            inner.breadcrumbs = breadcrumbs;
        }
        store
    }

    /// Every actor, sorted by id.
    pub fn actors(&self) -> Vec<Actor> {
        let mut actors: Vec<Actor> = lock(&self.inner).actors.values().cloned().collect();
        actors.sort_by(|a, b| a.id.cmp(&b.id));
        actors
    }

    /// Synchronous snapshot of an actor.
    pub fn actor(&self, id: &ActorId) -> Option<Actor> {
        lock(&self.inner).actors.get(id).cloned()
    }

    /// Remote breadcrumbs for `owner`, in arrival order.
    pub fn breadcrumbs(&self, owner: &ActorId) -> Vec<Breadcrumb> {
        lock(&self.inner)
            .breadcrumbs
            .iter()
            .filter(|b| &b.owner_id == owner)
            .cloned()
            .collect()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_actor(&self, actor: Actor) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = lock(&self.inner);
        if inner.actors.contains_key(&actor.id) {
            return Err(StoreError::AlreadyExists { id: actor.id });
        }
        let id = actor.id.clone();
        inner.actors.insert(id.clone(), actor);
        inner.publish(&id);
        Ok(())
    }

    async fn get_actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError> {
        self.check_online()?;
        Ok(lock(&self.inner).actors.get(id).cloned())
    }

    async fn update_actor(&self, id: &ActorId, patch: &ActorPatch) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = lock(&self.inner);
        if !inner.actors.contains_key(id) {
            return Err(StoreError::NotFound { id: id.clone() });
        }
        inner.spend_write()?;
        if let Some(actor) = inner.actors.get_mut(id) {
            patch.apply(actor);
        }
        inner.publish(id);
        Ok(())
    }

    async fn update_actor_if(
        &self,
        id: &ActorId,
        precondition: &Precondition,
        patch: &ActorPatch,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut inner = lock(&self.inner);
        let holds = match inner.actors.get(id) {
            Some(actor) => precondition.holds(actor),
            None => return Err(StoreError::NotFound { id: id.clone() }),
        };
        if !holds {
            return Ok(false);
        }
        inner.spend_write()?;
        if let Some(actor) = inner.actors.get_mut(id) {
            patch.apply(actor);
        }
        inner.publish(id);
        Ok(true)
    }

    async fn link_pair(&self, guardian: &ActorId, dependent: &ActorId) -> Result<bool, StoreError> {
        if !self.transactions {
            return Ok(false);
        }
        self.check_online()?;
        let mut inner = lock(&self.inner);
        for id in [guardian, dependent] {
            if !inner.actors.contains_key(id) {
                return Err(StoreError::NotFound { id: id.clone() });
            }
        }
        inner.spend_write()?;
        let pairs = [(guardian, dependent), (dependent, guardian)];
        for (id, partner) in pairs {
            if let Some(actor) = inner.actors.get_mut(id) {
                ActorPatch::new()
                    .set(FieldUpdate::LinkedId(Some(partner.clone())))
                    .apply(actor);
            }
        }
        inner.publish(guardian);
        inner.publish(dependent);
        Ok(true)
    }

    async fn append_breadcrumb(&self, breadcrumb: &Breadcrumb) -> Result<(), StoreError> {
        self.check_online()?;
        lock(&self.inner).breadcrumbs.push(breadcrumb.clone());
        Ok(())
    }

    async fn list_breadcrumbs(&self, owner: &ActorId) -> Result<Vec<Breadcrumb>, StoreError> {
        self.check_online()?;
        let mut crumbs = self.breadcrumbs(owner);
        crumbs.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(crumbs)
    }

    async fn subscribe_actor(&self, id: &ActorId) -> Result<broadcast::Receiver<Actor>, StoreError> {
        self.check_online()?;
        let mut inner = lock(&self.inner);
        let tx = inner
            .channels
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

// ---------------------------------------------------------------------------
// ManualSensor
// ---------------------------------------------------------------------------

/// Location sensor driven by the host process (simulator, replay, tests).
pub struct ManualSensor {
    streams: Mutex<HashMap<String, mpsc::Sender<Result<Vec<Sample>, SensorError>>>>,
    current: Mutex<Result<Sample, SensorError>>,
    denial: Mutex<Option<String>>,
    subscribe_calls: AtomicUsize,
}

impl Default for ManualSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualSensor {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            current: Mutex::new(Err(SensorError::Unavailable("no fix yet".to_string()))),
            denial: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Result returned by the next `current_sample` calls.
    pub fn set_current(&self, sample: Result<Sample, SensorError>) {
        *lock(&self.current) = sample;
    }

    /// Refuse future subscriptions with `PermissionDenied`. `None` grants again.
    pub fn set_denied(&self, reason: Option<String>) {
        *lock(&self.denial) = reason;
    }

    /// Deliver a batch to the subscription `task_id`. Returns false if there
    /// is no live subscription.
    pub async fn deliver(&self, task_id: &str, batch: Result<Vec<Sample>, SensorError>) -> bool {
        let tx = lock(&self.streams).get(task_id).cloned();
        match tx {
            Some(tx) => tx.send(batch).await.is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self, task_id: &str) -> bool {
        lock(&self.streams)
            .get(task_id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// A sample at `coords` stamped now.
    pub fn sample_now(coords: crate::types::Coordinates) -> Sample {
        Sample {
            coords,
            accuracy_m: Some(5.0),
            captured_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LocationSensor for ManualSensor {
    async fn current_sample(&self) -> Result<Sample, SensorError> {
        lock(&self.current).clone()
    }

    async fn subscribe(
        &self,
        task_id: &str,
        _params: CaptureParams,
    ) -> Result<SampleStream, SensorError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = lock(&self.denial).clone() {
            return Err(SensorError::PermissionDenied(reason));
        }
        let (tx, rx) = mpsc::channel(16);
        lock(&self.streams).insert(task_id.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, task_id: &str) {
        lock(&self.streams).remove(task_id);
    }
}

// ---------------------------------------------------------------------------
// RecordingPush
// ---------------------------------------------------------------------------

/// One push notification as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPush {
    pub token: String,
    pub title: String,
    pub body: String,
}

/// Push transport that records every attempt and can be told to fail.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<SentPush>>,
    failing: AtomicBool,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every attempt, including ones that were made to fail.
    pub fn sent(&self) -> Vec<SentPush> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl PushDispatch for RecordingPush {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError> {
        lock(&self.sent).push(SentPush {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(PushError::Transport("recording push set to fail".to_string()));
        }
        Ok(())
    }
}
