use serde::{Deserialize, Serialize};

/// A chat target attached to a session.
///
/// The `type` field is the wire discriminator in HTTP payloads and the
/// YAML configuration. A destination is unique per (session, kind, target).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Telegram { chat_id: String },
    Slack { channel: String },
}

impl Destination {
    pub fn kind(&self) -> DestinationKind {
        match self {
            Destination::Telegram { .. } => DestinationKind::Telegram,
            Destination::Slack { .. } => DestinationKind::Slack,
        }
    }

    /// The platform-side target identifier (chat id or channel).
    pub fn target(&self) -> &str {
        match self {
            Destination::Telegram { chat_id } => chat_id,
            Destination::Slack { channel } => channel,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Telegram { chat_id } => write!(f, "telegram:{}", chat_id),
            Destination::Slack { channel } => write!(f, "slack:{}", channel),
        }
    }
}

/// Destination platform, without the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Telegram,
    Slack,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Telegram => "telegram",
            DestinationKind::Slack => "slack",
        }
    }
}

/// Opaque identifier returned by a chat API that allows later edits.
///
/// Telegram message ids and Slack timestamps both fit; the runtime never
/// inspects the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(String);

impl MessageHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
