use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockContent, BlockId};

/// Operation on a session's ordered block list.
///
/// Events for a given session are totally ordered; every downstream
/// consumer (event buffer, SSE hub, turn trackers) sees the same sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    /// Append a block to the ordered list
    AddBlock { block: Block },

    /// Replace the content of an existing block; unknown ids are a no-op
    UpdateBlock { block_id: BlockId, content: BlockContent },

    /// Discard all blocks and processing context (compact boundary, truncation)
    ClearAll,
}

impl SessionEvent {
    /// Wire name of the event, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::AddBlock { .. } => "add_block",
            SessionEvent::UpdateBlock { .. } => "update_block",
            SessionEvent::ClearAll => "clear_all",
        }
    }
}

/// A session event stamped with its buffer sequence number.
///
/// `event_id` is monotone per session and lets late SSE subscribers order
/// the replayed prefix against the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub event_id: u64,
    #[serde(flatten)]
    pub event: SessionEvent,
}
