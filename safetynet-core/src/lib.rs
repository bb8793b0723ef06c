//! SafetyNet core library: domain types, config, pure check-in logic and the
//! collaborator seams shared by the sync engine, detectors and daemon.
//!
//! - [`types`]: actors, breadcrumbs, field-scoped patches
//! - [`config`]: YAML config with safe defaults
//! - [`checkin`]: deadline arithmetic, overdue derivation, countdown
//! - [`geo`]: great-circle distance
//! - [`ports`]: remote store, location sensor and push traits
//! - [`memory`]: in-process implementations of [`ports`]
//! - [`notify`]: best-effort notification fan-out

pub mod checkin;
pub mod config;
pub mod error;
pub mod geo;
pub mod memory;
pub mod notify;
pub mod ports;
pub mod types;

pub use config::{CaptureParams, SafetyConfig};
pub use error::{ConfigError, PushError, SensorError, StoreError};
pub use notify::{Delivery, Notifier};
pub use ports::{LocationSensor, PushDispatch, RemoteStore, SampleStream};
pub use types::{
    Actor, ActorId, ActorPatch, Breadcrumb, Coordinates, Destination, FieldUpdate, Precondition,
    Role, SafetyState, SafetyStatus, Sample,
};
