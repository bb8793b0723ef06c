//! Expo push transport.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use safetynet_core::{PushDispatch, PushError};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    sound: &'a str,
}

impl<'a> PushMessage<'a> {
    fn new(to: &'a str, title: &'a str, body: &'a str) -> Self {
        Self {
            to,
            title,
            body,
            sound: "default",
        }
    }
}

/// Posts one message per call to an Expo-compatible push endpoint.
#[derive(Clone)]
pub struct ExpoPushDispatch {
    endpoint: String,
    agent: ureq::Agent,
}

impl ExpoPushDispatch {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(PUSH_TIMEOUT).build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }

    fn post(&self, payload: serde_json::Value) -> Result<(), PushError> {
        match self
            .agent
            .post(&self.endpoint)
            .set("Accept", "application/json")
            .send_json(payload)
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => Err(PushError::Rejected {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(err) => Err(PushError::Transport(err.to_string())),
        }
    }
}

#[async_trait]
impl PushDispatch for ExpoPushDispatch {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError> {
        let payload = serde_json::to_value(PushMessage::new(token, title, body))
            .map_err(|e| PushError::Transport(e.to_string()))?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.post(payload))
            .await
            .map_err(|e| PushError::Transport(format!("push task failed: {e}")))?
    }
}

/// Used when push is disabled in config: logs instead of sending.
pub struct LogOnlyPush;

#[async_trait]
impl PushDispatch for LogOnlyPush {
    async fn send(&self, _token: &str, title: &str, body: &str) -> Result<(), PushError> {
        tracing::info!(title, body, "push disabled; notification logged only");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_matches_expo_message_shape() {
        let value =
            serde_json::to_value(PushMessage::new("ExponentPushToken[abc]", "SOS", "help")).unwrap();
        assert_eq!(
            value,
            json!({
                "to": "ExponentPushToken[abc]",
                "title": "SOS",
                "body": "help",
                "sound": "default",
            })
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let push = ExpoPushDispatch::new("http://127.0.0.1:9/--/api/v2/push/send");
        let err = push.send("tok", "SOS", "help").await.unwrap_err();
        assert!(matches!(err, PushError::Transport(_)));
    }
}
