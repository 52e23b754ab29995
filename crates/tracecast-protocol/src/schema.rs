use serde::Deserialize;
use serde_json::Value;

/// One transcript line, deserialized leniently.
///
/// Real transcripts mix several shapes on the same stream: role-carrying
/// message lines (which may omit the top-level `type` entirely), typed
/// system lines (`turn_duration`, `compact_boundary`, `summary`), and
/// progress envelopes keyed by `parentToolUseID`. Every field is optional
/// so an unexpected shape degrades to "invisible" instead of a parse error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLine {
    #[serde(rename = "type", default)]
    pub line_type: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub message: Option<RawMessage>,

    #[serde(default)]
    pub is_sidechain: bool,

    /// Present on progress envelopes; names the tool call being updated.
    #[serde(rename = "parentToolUseID", default)]
    pub parent_tool_use_id: Option<String>,

    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(rename = "duration_ms", default)]
    pub duration_ms: Option<u64>,

    /// Structured result sidecar some CLIs attach to tool-result lines.
    #[serde(default)]
    pub tool_use_result: Option<Value>,

    // Progress envelope payloads. Which of these is meaningful depends on
    // the envelope's `type`.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub hook_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub result_count: Option<u64>,
}

impl RawLine {
    /// Effective role: the top-level `role` or the nested `message.role`.
    pub fn effective_role(&self) -> Option<&str> {
        self.role
            .as_deref()
            .or_else(|| self.message.as_ref().and_then(|m| m.role.as_deref()))
    }

    pub fn content(&self) -> &RawContent {
        static NULL: RawContent = RawContent::Null;
        self.message.as_ref().map(|m| &m.content).unwrap_or(&NULL)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: RawContent,
}

/// `message.content` is a string, a list of content blocks, or null.
#[derive(Debug, Clone, Default)]
pub enum RawContent {
    #[default]
    Null,
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl RawContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            RawContent::Blocks(blocks) => blocks,
            _ => &[],
        }
    }

    /// All plain-text content joined, for single-text consumers.
    pub fn text(&self) -> Option<String> {
        match self {
            RawContent::Null => None,
            RawContent::Text(text) => Some(text.clone()),
            RawContent::Blocks(blocks) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n\n"))
                }
            }
        }
    }
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<RawContent, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrArray {
        String(String),
        Array(Vec<ContentBlock>),
        Other(Value),
    }

    match Option::<StringOrArray>::deserialize(deserializer)? {
        None => Ok(RawContent::Null),
        Some(StringOrArray::String(s)) => Ok(RawContent::Text(s)),
        Some(StringOrArray::Array(blocks)) => Ok(RawContent::Blocks(blocks)),
        Some(StringOrArray::Other(_)) => Ok(RawContent::Null),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    /// Flatten a tool-result `content` value (string, or list of text
    /// blocks) into display text.
    pub fn result_text(content: &Option<Value>) -> String {
        match content {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            Some(other) => other.to_string(),
        }
    }
}
