//! File-backed store for the local-only deployment variant.
//!
//! ```text
//! ~/.safetynet/store/
//!   actors.json        every actor, rewritten atomically after each write
//!   breadcrumbs.jsonl  append-only, one breadcrumb per line
//! ```
//!
//! Reads and change notifications are served from an in-memory copy; a write
//! is reported only after it is on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use safetynet_core::memory::MemoryStore;
use safetynet_core::{Actor, ActorId, ActorPatch, Breadcrumb, Precondition, RemoteStore, StoreError};

use crate::error::{io_err, DaemonError};

pub const ACTORS_FILE: &str = "actors.json";
pub const BREADCRUMBS_FILE: &str = "breadcrumbs.jsonl";

pub struct FileStore {
    dir: PathBuf,
    memory: MemoryStore,
    /// Serializes file writes so the last snapshot written is the newest.
    persist: Mutex<()>,
}

impl FileStore {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DaemonError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let actors = load_actors(&dir.join(ACTORS_FILE))?;
        let breadcrumbs = load_breadcrumbs(&dir.join(BREADCRUMBS_FILE))?;
        tracing::info!(
            dir = %dir.display(),
            actors = actors.len(),
            breadcrumbs = breadcrumbs.len(),
            "local store opened"
        );

        Ok(Self {
            memory: MemoryStore::restore(actors, breadcrumbs),
            dir,
            persist: Mutex::new(()),
        })
    }

    async fn save_actors(&self) -> Result<(), StoreError> {
        let _guard = self.persist.lock().await;
        let actors = self.memory.actors();
        let path = self.dir.join(ACTORS_FILE);
        tokio::task::spawn_blocking(move || write_actors(&path, &actors))
            .await
            .map_err(|e| StoreError::Transient(format!("store write task failed: {e}")))?
    }

    async fn append_line(&self, breadcrumb: &Breadcrumb) -> Result<(), StoreError> {
        let _guard = self.persist.lock().await;
        let path = self.dir.join(BREADCRUMBS_FILE);
        let breadcrumb = breadcrumb.clone();
        tokio::task::spawn_blocking(move || append_breadcrumb_line(&path, &breadcrumb))
            .await
            .map_err(|e| StoreError::Transient(format!("store write task failed: {e}")))?
    }
}

fn persist_err(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Transient(format!("cannot persist {}: {err}", path.display()))
}

fn load_actors(path: &Path) -> Result<Vec<Actor>, DaemonError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

fn load_breadcrumbs(path: &Path) -> Result<Vec<Breadcrumb>, DaemonError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(path, err)),
    };

    let mut breadcrumbs = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(breadcrumb) => breadcrumbs.push(breadcrumb),
            Err(err) => tracing::warn!(
                path = %path.display(),
                line = index + 1,
                error = %err,
                "skipping unreadable breadcrumb"
            ),
        }
    }
    Ok(breadcrumbs)
}

fn write_actors(path: &Path, actors: &[Actor]) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(actors).map_err(|e| persist_err(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| persist_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| persist_err(path, e))
}

fn append_breadcrumb_line(path: &Path, breadcrumb: &Breadcrumb) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(breadcrumb).map_err(|e| persist_err(path, e))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| persist_err(path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| persist_err(path, e))?;
    file.sync_data().map_err(|e| persist_err(path, e))
}

#[async_trait]
impl RemoteStore for FileStore {
    async fn create_actor(&self, actor: Actor) -> Result<(), StoreError> {
        self.memory.create_actor(actor).await?;
        self.save_actors().await
    }

    async fn get_actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError> {
        self.memory.get_actor(id).await
    }

    async fn update_actor(&self, id: &ActorId, patch: &ActorPatch) -> Result<(), StoreError> {
        self.memory.update_actor(id, patch).await?;
        self.save_actors().await
    }

    async fn update_actor_if(
        &self,
        id: &ActorId,
        precondition: &Precondition,
        patch: &ActorPatch,
    ) -> Result<bool, StoreError> {
        if !self.memory.update_actor_if(id, precondition, patch).await? {
            return Ok(false);
        }
        self.save_actors().await?;
        Ok(true)
    }

    async fn link_pair(&self, guardian: &ActorId, dependent: &ActorId) -> Result<bool, StoreError> {
        if !self.memory.link_pair(guardian, dependent).await? {
            return Ok(false);
        }
        self.save_actors().await?;
        Ok(true)
    }

    async fn append_breadcrumb(&self, breadcrumb: &Breadcrumb) -> Result<(), StoreError> {
        self.append_line(breadcrumb).await?;
        self.memory.append_breadcrumb(breadcrumb).await
    }

    async fn list_breadcrumbs(&self, owner: &ActorId) -> Result<Vec<Breadcrumb>, StoreError> {
        self.memory.list_breadcrumbs(owner).await
    }

    async fn subscribe_actor(&self, id: &ActorId) -> Result<broadcast::Receiver<Actor>, StoreError> {
        self.memory.subscribe_actor(id).await
    }
}
