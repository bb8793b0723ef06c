//! Safety-state detection for `safetynet-detector`.
//!
//! - [`arrival`]: geofence arrival: distance check plus a compare-and-set
//!   flip of the destination's `arrived` flag, with one guardian notification.
//! - [`overdue`]: repeatable overdue evaluation that requests a breadcrumb
//!   history fetch on the first lapse of each armed deadline.

pub mod arrival;
pub mod overdue;

use safetynet_core::StoreError;
use thiserror::Error;

pub use arrival::{ArrivalDetector, ArrivalOutcome};
pub use overdue::{Observation, OverdueWatch};

/// Errors from detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
