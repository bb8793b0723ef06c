//! Overdue observation for the guardian side.
//!
//! [`OverdueWatch::observe`] is a pure read of the dependent's safety state
//! and may run on every tick and every change event. It reports a history
//! fetch exactly once per armed deadline that lapses, and once per panic.

use chrono::{DateTime, Utc};
use safetynet_core::checkin::{self, CheckInPhase};
use safetynet_core::SafetyState;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Deadline(Option<DateTime<Utc>>),
    Panic(Option<DateTime<Utc>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub phase: CheckInPhase,
    pub overdue: bool,
    /// First observation of this lapse or panic: fetch breadcrumb history.
    pub fetch_history: bool,
}

#[derive(Debug, Default)]
pub struct OverdueWatch {
    last_trigger: Option<Trigger>,
}

impl OverdueWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, state: &SafetyState, now: DateTime<Utc>) -> Observation {
        let phase = checkin::phase(state, now);
        let trigger = match phase {
            CheckInPhase::Overdue => Some(Trigger::Deadline(state.next_check_in_deadline)),
            CheckInPhase::Sos => Some(Trigger::Panic(state.panic_at)),
            CheckInPhase::Pending | CheckInPhase::Safe => None,
        };

        let fetch_history = match trigger {
            Some(trigger) if self.last_trigger != Some(trigger) => {
                self.last_trigger = Some(trigger);
                true
            }
            _ => false,
        };

        Observation {
            phase,
            overdue: phase == CheckInPhase::Overdue,
            fetch_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use safetynet_core::SafetyStatus;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn safe(deadline: DateTime<Utc>) -> SafetyState {
        SafetyState {
            status: SafetyStatus::Safe,
            next_check_in_deadline: Some(deadline),
            ..SafetyState::default()
        }
    }

    #[test]
    fn fetch_fires_once_per_lapsed_deadline() {
        let mut watch = OverdueWatch::new();
        let state = safe(t0());

        assert!(!watch.observe(&state, t0()).fetch_history);
        let first = watch.observe(&state, t0() + Duration::seconds(1));
        assert!(first.overdue && first.fetch_history);
        for s in 2..10 {
            let again = watch.observe(&state, t0() + Duration::seconds(s));
            assert!(again.overdue);
            assert!(!again.fetch_history);
        }
    }

    #[test]
    fn new_ping_rearms_the_fetch() {
        let mut watch = OverdueWatch::new();
        watch.observe(&safe(t0()), t0() + Duration::seconds(1));

        let later = t0() + Duration::hours(1);
        assert!(!watch.observe(&safe(later), t0() + Duration::minutes(30)).overdue);
        assert!(watch.observe(&safe(later), later + Duration::seconds(1)).fetch_history);
    }

    #[test]
    fn panic_triggers_fetch_once() {
        let mut watch = OverdueWatch::new();
        let state = SafetyState {
            status: SafetyStatus::Sos,
            panic_at: Some(t0()),
            ..SafetyState::default()
        };
        let first = watch.observe(&state, t0());
        assert_eq!(first.phase, CheckInPhase::Sos);
        assert!(!first.overdue);
        assert!(first.fetch_history);
        assert!(!watch.observe(&state, t0() + Duration::minutes(1)).fetch_history);
    }

    #[test]
    fn pending_never_fetches() {
        let mut watch = OverdueWatch::new();
        let obs = watch.observe(&SafetyState::default(), t0());
        assert_eq!(obs.phase, CheckInPhase::Pending);
        assert!(!obs.fetch_history);
    }
}
