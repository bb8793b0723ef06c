//! Guardian-side observation of one dependent.
//!
//! The observer follows the dependent's record through the store
//! subscription and re-evaluates at the countdown cadence. The countdown is
//! always recomputed from the stored deadline, never decremented locally.
//! Breadcrumb history is fetched once per lapsed deadline and once per panic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use safetynet_core::checkin::{CheckInPhase, Countdown};
use safetynet_core::{Actor, ActorId, Breadcrumb, RemoteStore};
use safetynet_detector::{Observation, OverdueWatch};

use crate::error::DaemonError;

/// What a guardian sees for its dependent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardianView {
    pub dependent: ActorId,
    pub actor: Option<Actor>,
    pub phase: Option<CheckInPhase>,
    pub countdown: String,
    /// Newest first. Refreshed on each lapse or panic.
    pub history: Vec<Breadcrumb>,
    pub history_fetched_at: Option<DateTime<Utc>>,
}

impl GuardianView {
    fn empty(dependent: ActorId) -> Self {
        Self {
            dependent,
            actor: None,
            phase: None,
            countdown: Countdown::Unarmed.to_string(),
            history: Vec::new(),
            history_fetched_at: None,
        }
    }
}

pub struct GuardianObserver {
    store: Arc<dyn RemoteStore>,
    dependent: ActorId,
    overdue: OverdueWatch,
    current: Option<Actor>,
    view: watch::Sender<GuardianView>,
}

impl GuardianObserver {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        dependent: ActorId,
    ) -> (Self, watch::Receiver<GuardianView>) {
        let (view, rx) = watch::channel(GuardianView::empty(dependent.clone()));
        let observer = Self {
            store,
            dependent,
            overdue: OverdueWatch::new(),
            current: None,
            view,
        };
        (observer, rx)
    }

    /// Re-read the dependent's record from the store.
    pub async fn refresh(&mut self) -> Result<(), DaemonError> {
        self.current = self.store.get_actor(&self.dependent).await?;
        Ok(())
    }

    /// Take a record delivered by the change feed.
    pub fn update(&mut self, actor: Actor) {
        self.current = Some(actor);
    }

    /// Re-derive phase and countdown at `now`; fetch history on a new lapse.
    pub async fn evaluate_at(&mut self, now: DateTime<Utc>) -> Option<Observation> {
        let Some(actor) = self.current.clone() else {
            self.view.send_replace(GuardianView::empty(self.dependent.clone()));
            return None;
        };
        let observation = self.overdue.observe(&actor.safety, now);
        let countdown = Countdown::at(actor.safety.next_check_in_deadline, now).to_string();

        let fetched = if observation.fetch_history {
            match self.store.list_breadcrumbs(&self.dependent).await {
                Ok(history) => {
                    tracing::info!(
                        dependent = %self.dependent,
                        phase = ?observation.phase,
                        breadcrumbs = history.len(),
                        "fetched breadcrumb history"
                    );
                    Some(history)
                }
                Err(err) => {
                    tracing::warn!(dependent = %self.dependent, error = %err, "breadcrumb history fetch failed");
                    None
                }
            }
        } else {
            None
        };

        self.view.send_modify(|view| {
            view.actor = Some(actor);
            view.phase = Some(observation.phase);
            view.countdown = countdown;
            if let Some(history) = fetched {
                view.history = history;
                view.history_fetched_at = Some(now);
            }
        });
        Some(observation)
    }

    /// Follow the dependent until shutdown or until the change feed closes.
    pub async fn run(
        mut self,
        tick: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        let mut changes = self.store.subscribe_actor(&self.dependent).await?;
        self.refresh().await?;
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
                changed = changes.recv() => match changed {
                    Ok(actor) => self.update(actor),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(dependent = %self.dependent, skipped, "observer lagged; re-reading record");
                        if let Err(err) = self.refresh().await {
                            tracing::warn!(dependent = %self.dependent, error = %err, "record re-read failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
            self.evaluate_at(Utc::now()).await;
        }
        tracing::debug!(dependent = %self.dependent, "guardian observer stopped");
        Ok(())
    }
}
