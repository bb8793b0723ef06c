//! Background capture scheduler.
//!
//! One sensor subscription and one capture task per registered owner. Each
//! delivered sample runs, in order: sync-engine ingest, a fresh read of the
//! owner's record, arrival evaluation. Errors on that path are logged and the
//! loop keeps going; only a permission denial stops it, and a denied owner
//! stays stopped until `register` is called again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use safetynet_core::{ActorId, CaptureParams, LocationSensor, RemoteStore, Sample, SensorError};
use safetynet_detector::ArrivalDetector;
use safetynet_sync::SyncEngine;

use crate::error::DaemonError;
use crate::paths::capture_task_id;
use crate::registrations::{self, Registration};

/// Observable capture state for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureStatus {
    Inactive,
    Active,
    /// The OS refused capture. Cleared only by an explicit `register`.
    Denied { reason: String },
}

/// Everything one capture task needs, cloned into the task.
#[derive(Clone)]
struct CaptureWorker {
    home: PathBuf,
    owner: ActorId,
    engine: Arc<SyncEngine>,
    store: Arc<dyn RemoteStore>,
    detector: ArrivalDetector,
    status: Arc<watch::Sender<CaptureStatus>>,
}

pub struct CaptureScheduler {
    home: PathBuf,
    sensor: Arc<dyn LocationSensor>,
    store: Arc<dyn RemoteStore>,
    engine: Arc<SyncEngine>,
    detector: ArrivalDetector,
    params: CaptureParams,
    tasks: tokio::sync::Mutex<HashMap<ActorId, JoinHandle<()>>>,
    statuses: Mutex<HashMap<ActorId, Arc<watch::Sender<CaptureStatus>>>>,
}

impl CaptureScheduler {
    pub fn new(
        home: impl Into<PathBuf>,
        sensor: Arc<dyn LocationSensor>,
        store: Arc<dyn RemoteStore>,
        engine: Arc<SyncEngine>,
        detector: ArrivalDetector,
        params: CaptureParams,
    ) -> Self {
        Self {
            home: home.into(),
            sensor,
            store,
            engine,
            detector,
            params,
            tasks: tokio::sync::Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Arm capture for `owner`. Idempotent: a live registration is left as is.
    ///
    /// Registering after a denial retries the subscription once.
    pub async fn register(&self, owner: &ActorId) -> Result<CaptureStatus, DaemonError> {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.get(owner) {
            if !handle.is_finished() {
                tracing::debug!(owner = %owner, "capture already registered");
                return Ok(self.status(owner));
            }
        }

        registrations::upsert_at(
            &self.home,
            Registration::new(owner.clone(), self.params, Utc::now()),
        )?;
        self.attach(&mut tasks, owner, self.params).await
    }

    /// Disarm capture for `owner`. Returns whether it was registered.
    pub async fn unregister(&self, owner: &ActorId) -> Result<bool, DaemonError> {
        let mut tasks = self.tasks.lock().await;
        self.sensor.unsubscribe(&capture_task_id(owner)).await;
        let was_running = match tasks.remove(owner) {
            Some(handle) => {
                // Any local append already started completes on its blocking thread.
                handle.abort();
                true
            }
            None => false,
        };
        let was_recorded = registrations::remove_at(&self.home, owner)?;
        self.status_sender(owner).send_replace(CaptureStatus::Inactive);
        tracing::info!(owner = %owner, "capture unregistered");
        Ok(was_running || was_recorded)
    }

    /// Re-attach every enabled registration, typically on daemon start.
    pub async fn restore(&self) -> Result<Vec<(ActorId, CaptureStatus)>, DaemonError> {
        let records = registrations::load_at(&self.home)?;
        let mut tasks = self.tasks.lock().await;
        let mut restored = Vec::new();
        for record in records.into_values() {
            if !record.enabled {
                let reason = record.denied_reason.unwrap_or_default();
                self.status_sender(&record.owner)
                    .send_replace(CaptureStatus::Denied { reason });
                continue;
            }
            if tasks.get(&record.owner).is_some_and(|h| !h.is_finished()) {
                continue;
            }
            let status = self.attach(&mut tasks, &record.owner, record.params).await?;
            restored.push((record.owner, status));
        }
        Ok(restored)
    }

    pub fn status(&self, owner: &ActorId) -> CaptureStatus {
        self.status_sender(owner).borrow().clone()
    }

    pub fn watch_status(&self, owner: &ActorId) -> watch::Receiver<CaptureStatus> {
        self.status_sender(owner).subscribe()
    }

    /// Owners with a live capture task.
    pub async fn active_owners(&self) -> Vec<ActorId> {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(owner, _)| owner.clone())
            .collect()
    }

    /// Abort every capture task. Registrations stay on disk for `restore`.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (owner, handle) in tasks.drain() {
            self.sensor.unsubscribe(&capture_task_id(&owner)).await;
            handle.abort();
        }
    }

    async fn attach(
        &self,
        tasks: &mut HashMap<ActorId, JoinHandle<()>>,
        owner: &ActorId,
        params: CaptureParams,
    ) -> Result<CaptureStatus, DaemonError> {
        let task_id = capture_task_id(owner);
        let status = self.status_sender(owner);

        let stream = match self.sensor.subscribe(&task_id, params).await {
            Ok(stream) => stream,
            Err(SensorError::PermissionDenied(reason)) => {
                tracing::warn!(owner = %owner, reason = %reason, "location permission denied; capture disabled");
                registrations::disable_at(&self.home, owner, &reason)?;
                let denied = CaptureStatus::Denied { reason };
                status.send_replace(denied.clone());
                return Ok(denied);
            }
            Err(err @ SensorError::Unavailable(_)) => {
                tracing::warn!(owner = %owner, error = %err, "location sensor unavailable; will retry on next start");
                status.send_replace(CaptureStatus::Inactive);
                return Ok(CaptureStatus::Inactive);
            }
        };

        let worker = CaptureWorker {
            home: self.home.clone(),
            owner: owner.clone(),
            engine: self.engine.clone(),
            store: self.store.clone(),
            detector: self.detector.clone(),
            status: status.clone(),
        };
        status.send_replace(CaptureStatus::Active);
        let handle = tokio::spawn(async move { worker.run(stream).await });
        if let Some(previous) = tasks.insert(owner.clone(), handle) {
            previous.abort();
        }
        tracing::info!(owner = %owner, task_id = %task_id, interval_secs = params.interval_secs, distance_m = params.distance_m, "capture registered");
        Ok(CaptureStatus::Active)
    }

    fn statuses(&self) -> MutexGuard<'_, HashMap<ActorId, Arc<watch::Sender<CaptureStatus>>>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status_sender(&self, owner: &ActorId) -> Arc<watch::Sender<CaptureStatus>> {
        self.statuses()
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(watch::channel(CaptureStatus::Inactive).0))
            .clone()
    }
}

impl CaptureWorker {
    async fn run(self, mut stream: safetynet_core::SampleStream) {
        while let Some(batch) = stream.recv().await {
            match batch {
                Ok(samples) => {
                    for sample in samples {
                        self.process(sample).await;
                    }
                }
                Err(SensorError::PermissionDenied(reason)) => {
                    tracing::warn!(owner = %self.owner, reason = %reason, "location permission revoked; capture disabled");
                    if let Err(err) = registrations::disable_at(&self.home, &self.owner, &reason) {
                        tracing::error!(owner = %self.owner, error = %err, "failed to record capture denial");
                    }
                    self.status.send_replace(CaptureStatus::Denied { reason });
                    return;
                }
                Err(err) => {
                    tracing::warn!(owner = %self.owner, error = %err, "sample delivery failed");
                }
            }
        }
        tracing::debug!(owner = %self.owner, "sample stream closed");
        self.status.send_if_modified(|status| {
            if *status == CaptureStatus::Active {
                *status = CaptureStatus::Inactive;
                true
            } else {
                false
            }
        });
    }

    async fn process(&self, sample: Sample) {
        if let Err(err) = self
            .engine
            .ingest(&self.owner, sample.coords, sample.captured_at)
            .await
        {
            tracing::error!(owner = %self.owner, error = %err, "breadcrumb ingest failed");
        }

        let actor = match self.store.get_actor(&self.owner).await {
            Ok(Some(actor)) => actor,
            Ok(None) => {
                tracing::warn!(owner = %self.owner, "capture owner has no record; skipping arrival check");
                return;
            }
            Err(err) => {
                tracing::debug!(owner = %self.owner, error = %err, "actor read failed; skipping arrival check");
                return;
            }
        };

        match self.detector.evaluate(sample.coords, &actor).await {
            Ok(outcome) => tracing::debug!(owner = %self.owner, outcome = ?outcome, "arrival evaluated"),
            Err(err) => tracing::warn!(owner = %self.owner, error = %err, "arrival evaluation failed"),
        }
    }
}
