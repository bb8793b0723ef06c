//! SafetyNet monitor daemon: capture scheduling, check-in state machine,
//! pairing, guardian observation and the newline-JSON control socket.

mod error;
pub mod file_store;
pub mod observer;
pub mod pairing;
pub mod paths;
pub mod protocol;
pub mod push;
pub mod registrations;
mod runtime;
pub mod scheduler;
pub mod service;

pub use error::{DaemonError, PairingError};
pub use file_store::FileStore;
pub use observer::{GuardianObserver, GuardianView};
pub use pairing::{Linked, Pairing, ReconcileOutcome};
pub use protocol::{
    request, request_flush, request_link, request_panic, request_ping, request_status,
    request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use push::{ExpoPushDispatch, LogOnlyPush};
pub use runtime::{handle_request, run, start_blocking, Collaborators, Monitor};
pub use scheduler::{CaptureScheduler, CaptureStatus};
pub use service::{PanicOutcome, PingOutcome, SafetyService};
