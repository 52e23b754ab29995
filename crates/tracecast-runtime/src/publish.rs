use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::config::RelayConfig;
use tracecast_types::{Destination, DestinationKind, MessageHandle, clip_with_marker};

/// Per-request timeout for outbound chat API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram caps messages at 4096 code points.
const TELEGRAM_TEXT_MAX: usize = 4096;

/// Slack caps `text` at 40 000 characters.
const SLACK_TEXT_MAX: usize = 40_000;

const CLIP_MARKER: &str = "… [truncated]";

/// Failure classification that drives the debouncer's retry policy.
#[derive(Debug)]
pub enum PublishError {
    /// Worth retrying with backoff (rate limits, 5xx, transport)
    Transient(String),
    /// Retrying cannot help (bad target, unknown message, bad request)
    Permanent(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Transient(msg) => write!(f, "transient publish error: {}", msg),
            PublishError::Permanent(msg) => write!(f, "permanent publish error: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            PublishError::Transient(format!("{}: {}", status, body))
        } else {
            PublishError::Permanent(format!("{}: {}", status, body))
        }
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and connection failures are worth retrying.
        PublishError::Transient(err.to_string())
    }
}

/// Uniform send/edit contract over a chat platform.
///
/// Input text is the renderer's markdown; formatting and length limits are
/// each implementation's concern.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(
        &self,
        destination: &Destination,
        text: &str,
    ) -> std::result::Result<MessageHandle, PublishError>;

    async fn edit(
        &self,
        destination: &Destination,
        handle: &MessageHandle,
        text: &str,
    ) -> std::result::Result<(), PublishError>;
}

/// Build the publisher set for every platform with credentials configured.
pub fn build_publishers(
    config: &RelayConfig,
) -> Result<HashMap<DestinationKind, Arc<dyn Publisher>>> {
    let mut publishers: HashMap<DestinationKind, Arc<dyn Publisher>> = HashMap::new();

    if let Some(telegram) = &config.telegram {
        publishers.insert(
            DestinationKind::Telegram,
            Arc::new(TelegramPublisher::new(telegram.bot_token.clone())?),
        );
    }
    if let Some(slack) = &config.slack {
        publishers.insert(
            DestinationKind::Slack,
            Arc::new(SlackPublisher::new(slack.bot_token.clone())?),
        );
    }

    Ok(publishers)
}

/// Telegram Bot API publisher (`sendMessage` / `editMessageText`).
pub struct TelegramPublisher {
    token: String,
    client: reqwest::Client,
    base_url: String,
}

impl TelegramPublisher {
    pub fn new(token: String) -> Result<Self> {
        Ok(Self {
            token,
            client: http_client()?,
            base_url: "https://api.telegram.org".to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call(&self, method: &str, body: Value) -> std::result::Result<Value, PublishError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) => return Err(PublishError::from(err)),
        };

        if payload.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(payload);
        }

        let description = payload
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Err(PublishError::from_status(status, description))
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn send(
        &self,
        destination: &Destination,
        text: &str,
    ) -> std::result::Result<MessageHandle, PublishError> {
        let Destination::Telegram { chat_id } = destination else {
            return Err(PublishError::Permanent(format!(
                "not a telegram destination: {}",
                destination
            )));
        };

        let payload = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": clip_with_marker(text, TELEGRAM_TEXT_MAX, CLIP_MARKER),
                }),
            )
            .await?;

        let message_id = payload
            .pointer("/result/message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                PublishError::Permanent("sendMessage response without message_id".to_string())
            })?;

        Ok(MessageHandle::new(message_id.to_string()))
    }

    async fn edit(
        &self,
        destination: &Destination,
        handle: &MessageHandle,
        text: &str,
    ) -> std::result::Result<(), PublishError> {
        let Destination::Telegram { chat_id } = destination else {
            return Err(PublishError::Permanent(format!(
                "not a telegram destination: {}",
                destination
            )));
        };

        let result = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": chat_id,
                    "message_id": handle.as_str().parse::<i64>().map_err(|_| {
                        PublishError::Permanent(format!("bad telegram handle: {}", handle))
                    })?,
                    "text": clip_with_marker(text, TELEGRAM_TEXT_MAX, CLIP_MARKER),
                }),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // Racing edits can land identical text; Telegram rejects the
            // no-op but the message is already in the desired state.
            Err(PublishError::Permanent(msg)) if msg.contains("message is not modified") => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Slack Web API publisher (`chat.postMessage` / `chat.update`).
pub struct SlackPublisher {
    token: String,
    client: reqwest::Client,
    base_url: String,
}

impl SlackPublisher {
    pub fn new(token: String) -> Result<Self> {
        Ok(Self {
            token,
            client: http_client()?,
            base_url: "https://slack.com/api".to_string(),
        })
    }

    async fn call(&self, method: &str, body: Value) -> std::result::Result<Value, PublishError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::from_status(status, body));
        }

        let payload: Value = response.json().await.map_err(PublishError::from)?;
        if payload.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(payload);
        }

        // Slack reports most failures as HTTP 200 with ok=false.
        let error = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        if error.contains("rate") || error == "service_unavailable" {
            Err(PublishError::Transient(error))
        } else {
            Err(PublishError::Permanent(error))
        }
    }
}

#[async_trait]
impl Publisher for SlackPublisher {
    async fn send(
        &self,
        destination: &Destination,
        text: &str,
    ) -> std::result::Result<MessageHandle, PublishError> {
        let Destination::Slack { channel } = destination else {
            return Err(PublishError::Permanent(format!(
                "not a slack destination: {}",
                destination
            )));
        };

        let payload = self
            .call(
                "chat.postMessage",
                json!({
                    "channel": channel,
                    "text": clip_with_marker(text, SLACK_TEXT_MAX, CLIP_MARKER),
                }),
            )
            .await?;

        let ts = payload
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PublishError::Permanent("chat.postMessage response without ts".to_string())
            })?;

        Ok(MessageHandle::new(ts))
    }

    async fn edit(
        &self,
        destination: &Destination,
        handle: &MessageHandle,
        text: &str,
    ) -> std::result::Result<(), PublishError> {
        let Destination::Slack { channel } = destination else {
            return Err(PublishError::Permanent(format!(
                "not a slack destination: {}",
                destination
            )));
        };

        self.call(
            "chat.update",
            json!({
                "channel": channel,
                "ts": handle.as_str(),
                "text": clip_with_marker(text, SLACK_TEXT_MAX, CLIP_MARKER),
            }),
        )
        .await?;

        Ok(())
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;

    #[test]
    fn status_classification() {
        assert!(
            PublishError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new())
                .is_transient()
        );
        assert!(
            PublishError::from_status(reqwest::StatusCode::BAD_GATEWAY, String::new())
                .is_transient()
        );
        assert!(
            !PublishError::from_status(reqwest::StatusCode::BAD_REQUEST, String::new())
                .is_transient()
        );
        assert!(
            !PublishError::from_status(reqwest::StatusCode::NOT_FOUND, String::new())
                .is_transient()
        );
    }

    #[test]
    fn publishers_built_per_configured_platform() {
        let mut config = RelayConfig::default();
        config.telegram = Some(PlatformConfig {
            bot_token: "123:abc".to_string(),
        });

        let publishers = build_publishers(&config).unwrap();
        assert!(publishers.contains_key(&DestinationKind::Telegram));
        assert!(!publishers.contains_key(&DestinationKind::Slack));
    }

    #[tokio::test]
    async fn kind_mismatch_is_permanent() {
        let publisher = TelegramPublisher::new("123:abc".to_string()).unwrap();
        let err = publisher
            .send(
                &Destination::Slack {
                    channel: "C1".to_string(),
                },
                "hi",
            )
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
