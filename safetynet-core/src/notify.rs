//! Fire-and-forget notification fan-out.
//!
//! A notification is advisory: the state transition that triggered it is the
//! record of truth. One attempt per event, failures are logged and dropped.

use std::sync::Arc;

use crate::ports::PushDispatch;
use crate::types::Actor;

/// What a dispatch attempt amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport successfully.
    Sent,
    /// The transport reported an error; logged.
    Failed,
    /// No recipient or no push token.
    Skipped,
}

impl Delivery {
    /// True when the transport was invoked.
    pub fn attempted(&self) -> bool {
        !matches!(self, Delivery::Skipped)
    }
}

#[derive(Clone)]
pub struct Notifier {
    push: Arc<dyn PushDispatch>,
}

impl Notifier {
    pub fn new(push: Arc<dyn PushDispatch>) -> Self {
        Self { push }
    }

    pub async fn dispatch(&self, token: &str, title: &str, body: &str) -> Delivery {
        match self.push.send(token, title, body).await {
            Ok(()) => {
                tracing::info!(title, "notification sent");
                Delivery::Sent
            }
            Err(err) => {
                tracing::warn!(title, error = %err, "notification failed");
                Delivery::Failed
            }
        }
    }

    /// Dispatch to `recipient` if there is one and it has a push token.
    pub async fn dispatch_to(&self, recipient: Option<&Actor>, title: &str, body: &str) -> Delivery {
        let Some(token) = recipient.and_then(|actor| actor.push_token.as_deref()) else {
            tracing::debug!(title, "no push recipient; skipping notification");
            return Delivery::Skipped;
        };
        self.dispatch(token, title, body).await
    }
}
