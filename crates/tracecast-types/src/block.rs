use serde::{Deserialize, Serialize};

/// Identifier of one visible block within a session run.
///
/// Unique between two `ClearAll`s; the counter restarts after a clear, so
/// ids may be reused across runs.
pub type BlockId = u64;

/// One visible unit in the rendered output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(flatten)]
    pub content: BlockContent,
}

impl Block {
    pub fn new(id: BlockId, content: BlockContent) -> Self {
        Self { id, content }
    }

    /// Request id carried by assistant-side blocks, used for turn grouping.
    pub fn request_id(&self) -> Option<&str> {
        self.content.request_id()
    }
}

/// Block content variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block_type")]
#[serde(rename_all = "snake_case")]
pub enum BlockContent {
    /// Text typed by the user
    User { text: String },

    /// Assistant response text
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Assistant extended-thinking text
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A tool invocation, later mutated by results and progress updates
    ToolCall(ToolCallContent),

    /// Elapsed time reported for a finished turn
    Duration { duration_ms: u64 },

    /// System-level line (local command output, orphaned tool results)
    System { text: String },
}

impl BlockContent {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            BlockContent::Assistant { request_id, .. }
            | BlockContent::Thinking { request_id, .. } => request_id.as_deref(),
            BlockContent::ToolCall(tool) => tool.request_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_user_input(&self) -> bool {
        matches!(self, BlockContent::User { .. })
    }

    pub fn is_duration(&self) -> bool {
        matches!(self, BlockContent::Duration { .. })
    }
}

/// Content of a tool-call block.
///
/// `result` and `progress` start empty and are filled by later
/// `UpdateBlock` events once the matching tool result / progress envelope
/// arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContent {
    pub tool_name: String,
    pub tool_use_id: String,
    /// Short human label derived from the tool input ("Bash: cargo build")
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ToolCallContent {
    pub fn new(
        tool_name: impl Into<String>,
        tool_use_id: impl Into<String>,
        label: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_use_id: tool_use_id.into(),
            label: label.into(),
            progress: None,
            result: None,
            is_error: false,
            request_id,
        }
    }

    /// Copy with the result filled in (progress is kept as-is).
    pub fn with_result(&self, result: impl Into<String>, is_error: bool) -> Self {
        let mut next = self.clone();
        next.result = Some(result.into());
        next.is_error = is_error;
        next
    }

    /// Copy with only the progress text replaced.
    pub fn with_progress(&self, progress: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.progress = Some(progress.into());
        next
    }
}
