use std::path::{Path, PathBuf};

use safetynet_core::ActorId;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const REGISTRATIONS_FILE: &str = "registrations.json";

/// Stable prefix of every background capture task id.
pub const CAPTURE_TASK_PREFIX: &str = "safetynet-background-location";

pub fn safetynet_root(home: &Path) -> PathBuf {
    home.join(".safetynet")
}

pub fn run_dir(home: &Path) -> PathBuf {
    safetynet_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    safetynet_root(home).join(DAEMON_SOCKET)
}

/// Local-only store: `<home>/.safetynet/store/`.
pub fn store_dir(home: &Path) -> PathBuf {
    safetynet_root(home).join("store")
}

pub fn registrations_path(home: &Path) -> PathBuf {
    run_dir(home).join(REGISTRATIONS_FILE)
}

pub fn capture_task_id(owner: &ActorId) -> String {
    format!("{CAPTURE_TASK_PREFIX}:{owner}")
}
