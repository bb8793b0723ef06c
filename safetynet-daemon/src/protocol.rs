use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chrono::{DateTime, Utc};
use safetynet_core::{ActorId, Role};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Daemon summary, or one actor's safety view when `actor` is given.
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<ActorId>,
    },
    /// Add an actor record to the local store.
    CreateActor {
        id: ActorId,
        role: Role,
        email: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        push_token: Option<String>,
    },
    SetPushToken {
        actor: ActorId,
        #[serde(default)]
        token: Option<String>,
    },
    /// Feed one location reading to the host-fed sensor: it becomes the
    /// current fix and is delivered to the owner's capture task if armed.
    Sample {
        actor: ActorId,
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy_m: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        captured_at: Option<DateTime<Utc>>,
    },
    Register {
        actor: ActorId,
    },
    Unregister {
        actor: ActorId,
    },
    Ping {
        actor: ActorId,
    },
    Panic {
        actor: ActorId,
    },
    SetDuration {
        actor: ActorId,
        hours: f64,
    },
    SetDestination {
        actor: ActorId,
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    ClearDestination {
        actor: ActorId,
    },
    Link {
        guardian: ActorId,
        code: String,
    },
    /// Guardian view of a dependent, starting an observer if none runs yet.
    Observe {
        dependent: ActorId,
    },
    /// Upload pending breadcrumbs for one owner, or every owner.
    Flush {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<ActorId>,
    },
    Stop,
}

impl DaemonRequest {
    pub fn name(&self) -> &'static str {
        match self {
            DaemonRequest::Status { .. } => "status",
            DaemonRequest::CreateActor { .. } => "create_actor",
            DaemonRequest::SetPushToken { .. } => "set_push_token",
            DaemonRequest::Sample { .. } => "sample",
            DaemonRequest::Register { .. } => "register",
            DaemonRequest::Unregister { .. } => "unregister",
            DaemonRequest::Ping { .. } => "ping",
            DaemonRequest::Panic { .. } => "panic",
            DaemonRequest::SetDuration { .. } => "set_duration",
            DaemonRequest::SetDestination { .. } => "set_destination",
            DaemonRequest::ClearDestination { .. } => "clear_destination",
            DaemonRequest::Link { .. } => "link",
            DaemonRequest::Observe { .. } => "observe",
            DaemonRequest::Flush { .. } => "flush",
            DaemonRequest::Stop => "stop",
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Daemon summary. Retries briefly while the socket comes up.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::Status { actor: None };

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    request(home, &DaemonRequest::Stop).map(|_| ())
}

pub fn request_ping(home: &Path, actor: ActorId) -> Result<Value, DaemonError> {
    request(home, &DaemonRequest::Ping { actor })
}

pub fn request_panic(home: &Path, actor: ActorId) -> Result<Value, DaemonError> {
    request(home, &DaemonRequest::Panic { actor })
}

pub fn request_link(home: &Path, guardian: ActorId, code: String) -> Result<Value, DaemonError> {
    request(home, &DaemonRequest::Link { guardian, code })
}

pub fn request_flush(home: &Path, actor: Option<ActorId>) -> Result<Value, DaemonError> {
    request(home, &DaemonRequest::Flush { actor })
}

/// Send any request and unwrap its `data`, turning `ok: false` into an error.
pub fn request(home: &Path, request: &DaemonRequest) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, request)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
