//! Pure check-in deadline logic.
//!
//! Nothing here touches a store or a clock: callers pass `now` explicitly so
//! the same evaluation can be repeated at any cadence without drift.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{SafetyState, SafetyStatus};

/// Derived check-in phase. `Overdue` is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInPhase {
    Pending,
    Safe,
    Overdue,
    Sos,
}

/// Longest check-in window accepted: one year.
pub const MAX_CHECK_IN_HOURS: f64 = 24.0 * 365.0;

/// Finite, positive and at most [`MAX_CHECK_IN_HOURS`].
pub fn is_valid_duration(hours: f64) -> bool {
    hours.is_finite() && hours > 0.0 && hours <= MAX_CHECK_IN_HOURS
}

/// Check-in window to arm on ping.
///
/// Missing or invalid stored values fall back to `default_hours`.
pub fn effective_duration_hours(stored: Option<f64>, default_hours: f64) -> f64 {
    match stored {
        Some(hours) if is_valid_duration(hours) => hours,
        _ => default_hours,
    }
}

/// `now + hours`, at millisecond resolution. `None` if the result is not
/// representable.
pub fn deadline_from(now: DateTime<Utc>, hours: f64) -> Option<DateTime<Utc>> {
    if !hours.is_finite() {
        return None;
    }
    let millis = (hours * 3_600_000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    now.checked_add_signed(Duration::try_milliseconds(millis as i64)?)
}

/// `status == safe` and the armed deadline has passed.
pub fn is_overdue(state: &SafetyState, now: DateTime<Utc>) -> bool {
    match (state.status, state.next_check_in_deadline) {
        (SafetyStatus::Safe, Some(deadline)) => now > deadline,
        _ => false,
    }
}

pub fn phase(state: &SafetyState, now: DateTime<Utc>) -> CheckInPhase {
    match state.status {
        SafetyStatus::Pending => CheckInPhase::Pending,
        SafetyStatus::Sos => CheckInPhase::Sos,
        SafetyStatus::Safe if is_overdue(state, now) => CheckInPhase::Overdue,
        SafetyStatus::Safe => CheckInPhase::Safe,
    }
}

/// Time left before the next check-in, recomputed from the stored deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// No deadline armed.
    Unarmed,
    Remaining { hours: i64, minutes: i64, seconds: i64 },
    Overdue,
}

impl Countdown {
    pub fn at(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(deadline) = deadline else {
            return Countdown::Unarmed;
        };
        if now > deadline {
            return Countdown::Overdue;
        }
        let secs = (deadline - now).num_seconds();
        Countdown::Remaining {
            hours: secs / 3600,
            minutes: (secs % 3600) / 60,
            seconds: secs % 60,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Unarmed => write!(f, "--:--:--"),
            Countdown::Overdue => write!(f, "OVERDUE"),
            Countdown::Remaining {
                hours,
                minutes,
                seconds,
            } => write!(f, "{hours}h {minutes:02}m {seconds:02}s"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn safe_until(deadline: DateTime<Utc>) -> SafetyState {
        SafetyState {
            status: SafetyStatus::Safe,
            next_check_in_deadline: Some(deadline),
            ..SafetyState::default()
        }
    }

    #[rstest]
    #[case(None)]
    #[case(Some(0.0))]
    #[case(Some(-5.0))]
    #[case(Some(f64::NAN))]
    #[case(Some(f64::INFINITY))]
    #[case(Some(MAX_CHECK_IN_HOURS + 1.0))]
    #[case(Some(1e12))]
    fn invalid_duration_falls_back_to_default(#[case] stored: Option<f64>) {
        assert_eq!(effective_duration_hours(stored, 1.0), 1.0);
    }

    #[rstest]
    #[case(0.5)]
    #[case(2.0)]
    #[case(24.0)]
    #[case(MAX_CHECK_IN_HOURS)]
    fn valid_duration_is_kept(#[case] hours: f64) {
        assert_eq!(effective_duration_hours(Some(hours), 1.0), hours);
    }

    #[test]
    fn deadline_is_exact_offset() {
        assert_eq!(deadline_from(t0(), 2.0), Some(t0() + Duration::hours(2)));
        assert_eq!(deadline_from(t0(), 0.25), Some(t0() + Duration::minutes(15)));
    }

    #[rstest]
    #[case(1e12)]
    #[case(1e300)]
    #[case(f64::INFINITY)]
    fn unrepresentable_deadline_is_none(#[case] hours: f64) {
        assert_eq!(deadline_from(t0(), hours), None);
    }

    #[test]
    fn overdue_only_strictly_after_deadline() {
        let deadline = t0() + Duration::hours(2);
        let state = safe_until(deadline);
        assert!(!is_overdue(&state, deadline));
        assert!(is_overdue(&state, deadline + Duration::seconds(1)));
        assert_eq!(phase(&state, deadline + Duration::seconds(1)), CheckInPhase::Overdue);
    }

    #[test]
    fn sos_and_pending_are_never_overdue() {
        let mut state = safe_until(t0());
        state.status = SafetyStatus::Sos;
        assert!(!is_overdue(&state, t0() + Duration::hours(5)));
        assert_eq!(phase(&state, t0()), CheckInPhase::Sos);

        state.status = SafetyStatus::Pending;
        assert_eq!(phase(&state, t0() + Duration::hours(5)), CheckInPhase::Pending);
    }

    #[test]
    fn countdown_formats_like_the_timer() {
        let deadline = t0() + Duration::hours(2) + Duration::minutes(5) + Duration::seconds(9);
        assert_eq!(Countdown::at(Some(deadline), t0()).to_string(), "2h 05m 09s");
        assert_eq!(
            Countdown::at(Some(deadline), deadline + Duration::seconds(1)).to_string(),
            "OVERDUE"
        );
        assert_eq!(Countdown::at(None, t0()).to_string(), "--:--:--");
    }

    #[test]
    fn countdown_depends_only_on_deadline_and_now() {
        let deadline = t0() + Duration::hours(1);
        let a = Countdown::at(Some(deadline), t0() + Duration::minutes(30));
        let b = Countdown::at(Some(deadline), t0() + Duration::minutes(30));
        assert_eq!(a, b);
        assert_eq!(
            a,
            Countdown::Remaining {
                hours: 0,
                minutes: 30,
                seconds: 0
            }
        );
    }
}
