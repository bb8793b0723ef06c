use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};

use safetynet_core::memory::ManualSensor;
use safetynet_core::{
    config, Actor, ActorId, ActorPatch, Coordinates, FieldUpdate, LocationSensor, Notifier,
    PushDispatch, RemoteStore, SafetyConfig, Sample,
};
use safetynet_detector::ArrivalDetector;
use safetynet_sync::pipeline::{self, FlushScope};
use safetynet_sync::{FlushReport, SyncEngine};

use crate::error::{io_err, DaemonError};
use crate::file_store::FileStore;
use crate::observer::{GuardianObserver, GuardianView};
use crate::pairing::Pairing;
use crate::paths::{capture_task_id, run_dir, safetynet_root, socket_path, store_dir};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::push::{ExpoPushDispatch, LogOnlyPush};
use crate::registrations;
use crate::scheduler::CaptureScheduler;
use crate::service::SafetyService;

/// The external collaborators the monitor runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RemoteStore>,
    pub sensor: Arc<dyn LocationSensor>,
    pub push: Arc<dyn PushDispatch>,
    /// Set when `sensor` is fed over the control socket.
    pub feed: Option<Arc<ManualSensor>>,
}

impl Collaborators {
    /// Both roles on one host: file-backed store under `home`, a sensor fed
    /// through the `sample` command, and the configured push transport.
    pub fn local(home: &Path, config: &SafetyConfig) -> Result<Self, DaemonError> {
        let push: Arc<dyn PushDispatch> = if config.push.enabled {
            Arc::new(ExpoPushDispatch::new(config.push.endpoint.clone()))
        } else {
            Arc::new(LogOnlyPush)
        };
        let feed = Arc::new(ManualSensor::new());
        Ok(Self {
            store: Arc::new(FileStore::open(store_dir(home))?),
            sensor: feed.clone(),
            push,
            feed: Some(feed),
        })
    }
}

/// Every subsystem wired to one set of collaborators.
pub struct Monitor {
    home: PathBuf,
    config: SafetyConfig,
    store: Arc<dyn RemoteStore>,
    engine: Arc<SyncEngine>,
    scheduler: CaptureScheduler,
    service: SafetyService,
    pairing: Pairing,
    observers: tokio::sync::Mutex<HashMap<ActorId, watch::Receiver<GuardianView>>>,
    feed: Option<Arc<ManualSensor>>,
    shutdown: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
}

impl Monitor {
    pub fn new(home: impl Into<PathBuf>, config: SafetyConfig, collaborators: Collaborators) -> Self {
        let home = home.into();
        let Collaborators {
            store,
            sensor,
            push,
            feed,
        } = collaborators;

        let notifier = Notifier::new(push);
        let engine = Arc::new(SyncEngine::new(home.clone(), store.clone()));
        let detector = ArrivalDetector::new(
            store.clone(),
            notifier.clone(),
            config.arrival_radius_m,
            config.push.arrival_title.clone(),
        );
        let scheduler = CaptureScheduler::new(
            home.clone(),
            sensor.clone(),
            store.clone(),
            engine.clone(),
            detector,
            config.capture,
        );
        let service = SafetyService::new(
            store.clone(),
            sensor,
            engine.clone(),
            notifier,
            config.clone(),
        );
        let (shutdown, _) = broadcast::channel(16);

        Self {
            pairing: Pairing::new(store.clone()),
            home,
            config,
            store,
            engine,
            scheduler,
            service,
            observers: tokio::sync::Mutex::new(HashMap::new()),
            feed,
            shutdown,
            started_at: Utc::now(),
        }
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    pub fn service(&self) -> &SafetyService {
        &self.service
    }

    pub fn pairing(&self) -> &Pairing {
        &self.pairing
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Startup pass: re-attach capture, repair half-written pairs, replay
    /// pending uploads, and start observers for linked dependents.
    pub async fn start(&self) -> Result<(), DaemonError> {
        let restored = self.scheduler.restore().await?;
        tracing::info!(count = restored.len(), "capture registrations restored");

        let owners: Vec<ActorId> = registrations::load_at(&self.home)?
            .into_values()
            .map(|record| record.owner)
            .collect();
        for owner in &owners {
            if let Err(err) = self.pairing.reconcile(owner).await {
                tracing::warn!(owner = %owner, error = %err, "pair reconciliation failed");
            }
        }

        match pipeline::run(&self.engine, FlushScope::All).await {
            Ok(reports) => {
                let pending: usize = reports.iter().map(|r| r.pending).sum();
                tracing::info!(owners = reports.len(), pending, "startup flush complete");
            }
            Err(err) => tracing::warn!(error = %err, "startup flush failed"),
        }

        for owner in &owners {
            let linked = match self.store.get_actor(owner).await {
                Ok(Some(actor)) => actor.is_dependent() && actor.linked_id.is_some(),
                _ => false,
            };
            if linked {
                if let Err(err) = self.observe(owner).await {
                    tracing::warn!(dependent = %owner, error = %err, "observer start failed");
                }
            }
        }
        Ok(())
    }

    /// Hand one reading to the host-fed sensor. Returns whether a capture
    /// task received it.
    pub async fn feed_sample(&self, owner: &ActorId, sample: Sample) -> Result<bool, DaemonError> {
        let Some(feed) = &self.feed else {
            return Err(DaemonError::Protocol(
                "this daemon's sensor is not fed over the socket".to_string(),
            ));
        };
        feed.set_current(Ok(sample));
        let delivered = feed.deliver(&capture_task_id(owner), Ok(vec![sample])).await;
        tracing::debug!(owner = %owner, delivered, "sample fed");
        Ok(delivered)
    }

    /// Current guardian view of `dependent`, starting its observer on first use.
    pub async fn observe(&self, dependent: &ActorId) -> Result<GuardianView, DaemonError> {
        let mut observers = self.observers.lock().await;
        if let Some(view) = observers.get(dependent) {
            if view.has_changed().is_ok() {
                return Ok(view.borrow().clone());
            }
        }

        let (mut observer, view) = GuardianObserver::new(self.store.clone(), dependent.clone());
        observer.refresh().await?;
        observer.evaluate_at(Utc::now()).await;

        let tick = self.config.countdown_tick();
        let shutdown = self.shutdown.subscribe();
        let id = dependent.clone();
        tokio::spawn(async move {
            if let Err(err) = observer.run(tick, shutdown).await {
                tracing::error!(dependent = %id, error = %err, "guardian observer failed");
            }
        });

        let current = view.borrow().clone();
        observers.insert(dependent.clone(), view);
        Ok(current)
    }

    pub async fn status_payload(&self) -> Value {
        let active = self.scheduler.active_owners().await;
        let registered = registrations::load_at(&self.home)
            .map(|all| all.len())
            .unwrap_or_default();
        let observed: Vec<String> = self
            .observers
            .lock()
            .await
            .keys()
            .map(ToString::to_string)
            .collect();
        json!({
            "running": true,
            "started_at": self.started_at,
            "home": self.home.display().to_string(),
            "registered": registered,
            "capturing": active.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "observing": observed,
        })
    }

    pub async fn actor_status(&self, id: &ActorId, now: DateTime<Utc>) -> Result<Value, DaemonError> {
        let actor = self.service.actor(id).await?;
        let pending = self.engine.pending(id).await?.len();
        Ok(json!({
            "actor": actor,
            "phase": safetynet_core::checkin::phase(&actor.safety, now),
            "overdue": SafetyService::evaluate_overdue(&actor, now),
            "countdown": SafetyService::countdown(&actor, now).to_string(),
            "capture": self.scheduler.status(id),
            "pending_uploads": pending,
        }))
    }
}

/// Execute one control request against `monitor`.
pub async fn handle_request(monitor: &Monitor, request: DaemonRequest) -> DaemonResponse {
    let cmd = request.name();
    match dispatch(monitor, request).await {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => {
            tracing::warn!(cmd, error = %err, "request failed");
            DaemonResponse::error(err.to_string())
        }
    }
}

async fn dispatch(monitor: &Monitor, request: DaemonRequest) -> Result<Value, DaemonError> {
    match request {
        DaemonRequest::Status { actor: None } => Ok(monitor.status_payload().await),
        DaemonRequest::Status { actor: Some(id) } => monitor.actor_status(&id, Utc::now()).await,
        DaemonRequest::CreateActor {
            id,
            role,
            email,
            push_token,
        } => {
            let mut actor = Actor::new(id, role, email);
            actor.push_token = push_token;
            monitor.store.create_actor(actor.clone()).await?;
            tracing::info!(actor = %actor.id, role = %actor.role, "actor created");
            Ok(json!(actor))
        }
        DaemonRequest::SetPushToken { actor, token } => {
            monitor
                .store
                .update_actor(
                    &actor,
                    &ActorPatch::new().set(FieldUpdate::PushToken(token.clone())),
                )
                .await?;
            Ok(json!({ "actor": actor, "push_token": token }))
        }
        DaemonRequest::Sample {
            actor,
            latitude,
            longitude,
            accuracy_m,
            captured_at,
        } => {
            let sample = Sample {
                coords: Coordinates::new(latitude, longitude),
                accuracy_m,
                captured_at: captured_at.unwrap_or_else(Utc::now),
            };
            let delivered = monitor.feed_sample(&actor, sample).await?;
            Ok(json!({ "actor": actor, "delivered": delivered }))
        }
        DaemonRequest::Register { actor } => {
            let status = monitor.scheduler.register(&actor).await?;
            Ok(json!({ "actor": actor, "capture": status }))
        }
        DaemonRequest::Unregister { actor } => {
            let removed = monitor.scheduler.unregister(&actor).await?;
            Ok(json!({ "actor": actor, "removed": removed }))
        }
        DaemonRequest::Ping { actor } => Ok(json!(monitor.service.ping(&actor).await?)),
        DaemonRequest::Panic { actor } => Ok(json!(monitor.service.panic(&actor).await?)),
        DaemonRequest::SetDuration { actor, hours } => {
            monitor.service.set_duration(&actor, hours).await?;
            Ok(json!({ "actor": actor, "hours": hours }))
        }
        DaemonRequest::SetDestination {
            actor,
            latitude,
            longitude,
            label,
        } => {
            let destination = monitor
                .service
                .set_destination(&actor, Coordinates::new(latitude, longitude), label)
                .await?;
            Ok(json!(destination))
        }
        DaemonRequest::ClearDestination { actor } => {
            monitor.service.clear_destination(&actor).await?;
            Ok(json!({ "actor": actor, "destination": null }))
        }
        DaemonRequest::Link { guardian, code } => {
            let linked = monitor.pairing.link(&guardian, &code).await?;
            let view = monitor.observe(&linked.dependent).await?;
            Ok(json!({ "linked": linked, "view": view }))
        }
        DaemonRequest::Observe { dependent } => Ok(json!(monitor.observe(&dependent).await?)),
        DaemonRequest::Flush { actor } => {
            let scope = match actor {
                Some(id) => FlushScope::Owner(id),
                None => FlushScope::All,
            };
            let reports = pipeline::run(&monitor.engine, scope).await?;
            Ok(Value::Array(reports.iter().map(flush_report_json).collect()))
        }
        DaemonRequest::Stop => {
            monitor.request_shutdown();
            Ok(json!({ "stopping": true }))
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let config = config::load_at(home)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let collaborators = Collaborators::local(home, &config)?;
    runtime.block_on(run(home.to_path_buf(), collaborators))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, collaborators: Collaborators) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let flush_every = config.capture.interval();

    let monitor = Arc::new(Monitor::new(home.clone(), config, collaborators));
    monitor.start().await?;

    let socket_handle = {
        let monitor = monitor.clone();
        let shutdown_rx = monitor.subscribe_shutdown();
        tokio::spawn(async move {
            let result = socket_server_task(home, monitor.clone(), shutdown_rx).await;
            monitor.request_shutdown();
            result
        })
    };

    let flush_handle = {
        let monitor = monitor.clone();
        let shutdown_rx = monitor.subscribe_shutdown();
        tokio::spawn(async move {
            let result = flush_task(monitor.clone(), flush_every, shutdown_rx).await;
            monitor.request_shutdown();
            result
        })
    };

    let signal_handle = {
        let monitor = monitor.clone();
        let mut shutdown_rx = monitor.subscribe_shutdown();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            monitor.request_shutdown();
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, flush_result, signal_result) =
        tokio::join!(socket_handle, flush_handle, signal_handle);

    monitor.scheduler().shutdown().await;
    handle_join("socket_server", socket_result)?;
    handle_join("flush", flush_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Periodic retry of pending uploads, for connectivity that returns between samples.
async fn flush_task(
    monitor: Arc<Monitor>,
    every: std::time::Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = tokio::time::interval(every.max(std::time::Duration::from_secs(1)));
    // The startup pass already flushed.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match pipeline::run(monitor.engine(), FlushScope::All).await {
                    Ok(reports) => {
                        let uploaded: usize = reports.iter().map(|r| r.uploaded).sum();
                        if uploaded > 0 {
                            tracing::info!(uploaded, "pending breadcrumbs replicated");
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "periodic flush failed"),
                }
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    monitor: Arc<Monitor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let monitor = monitor.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, monitor).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, monitor: Arc<Monitor>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request == DaemonRequest::Stop;
        let response = handle_request(&monitor, request).await;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

fn flush_report_json(report: &FlushReport) -> Value {
    json!({
        "owner": report.owner,
        "uploaded": report.uploaded,
        "pending": report.pending,
        "confirmed_seq": report.confirmed_seq,
        "last_error": report.last_error.as_ref().map(ToString::to_string),
        "local_error": report.local_error,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [safetynet_root(home), run_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
