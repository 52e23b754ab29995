use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use tracecast_types::{Block, BlockContent, BlockId, SessionEvent, ToolCallContent};

use crate::classify::{LineKind, classify, local_command_text};
use crate::labels::tool_label;
use crate::schema::{ContentBlock, RawLine};

/// Per-session processor state, persisted across restarts.
///
/// The tool map lets later results and progress envelopes find the block
/// of the originating tool call; it is cleared at every compact boundary
/// and so stays bounded by the protocol in practice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingContext {
    #[serde(default)]
    pub tool_blocks: HashMap<String, ToolBlockEntry>,
    #[serde(default)]
    pub current_request_id: Option<String>,
    #[serde(default)]
    pub next_block_id: BlockId,
}

/// Last-known content of a tool-call block, kept so updates can re-emit
/// the full block content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBlockEntry {
    pub block_id: BlockId,
    pub content: ToolCallContent,
}

impl ProcessingContext {
    fn next_id(&mut self) -> BlockId {
        let id = self.next_block_id;
        self.next_block_id += 1;
        id
    }

    /// Full reset: compact boundary or file truncation.
    pub fn clear(&mut self) {
        self.tool_blocks.clear();
        self.current_request_id = None;
        self.next_block_id = 0;
    }
}

/// Converts raw transcript lines into session events.
///
/// Pure per line given the context; never returns an error to the caller.
/// Malformed JSON and unknown shapes are dropped with a debug log.
#[derive(Debug, Default)]
pub struct LineProcessor {
    context: ProcessingContext,
}

impl LineProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted context.
    pub fn from_context(context: ProcessingContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ProcessingContext {
        &self.context
    }

    /// Reset all processing state (truncation recovery).
    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    /// Process one raw line of the transcript file.
    pub fn process_raw(&mut self, raw: &str) -> Vec<SessionEvent> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<RawLine>(trimmed) {
            Ok(line) => self.process(line),
            Err(err) => {
                debug!(error = %err, "dropping malformed transcript line");
                Vec::new()
            }
        }
    }

    /// Process one parsed line, mutating the context.
    pub fn process(&mut self, line: RawLine) -> Vec<SessionEvent> {
        match classify(&line) {
            LineKind::UserInput => self.on_user_input(&line),
            LineKind::ToolResult => self.on_tool_result(&line),
            LineKind::LocalCommandOutput => self.on_local_command(&line),
            LineKind::AssistantText | LineKind::ToolUse | LineKind::Thinking => {
                self.on_assistant(&line)
            }
            LineKind::TurnDuration => self.on_duration(&line),
            LineKind::CompactBoundary => self.on_compact(),
            kind if kind.is_progress() => self.on_progress(kind, &line),
            _ => Vec::new(),
        }
    }

    fn add_block(&mut self, content: BlockContent) -> SessionEvent {
        SessionEvent::AddBlock {
            block: Block::new(self.context.next_id(), content),
        }
    }

    fn on_user_input(&mut self, line: &RawLine) -> Vec<SessionEvent> {
        match line.content().text() {
            Some(text) => vec![self.add_block(BlockContent::User { text })],
            None => Vec::new(),
        }
    }

    fn on_local_command(&mut self, line: &RawLine) -> Vec<SessionEvent> {
        match line.content().text() {
            Some(text) => vec![self.add_block(BlockContent::System {
                text: local_command_text(&text),
            })],
            None => Vec::new(),
        }
    }

    fn on_tool_result(&mut self, line: &RawLine) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        for block in line.content().blocks() {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };

            let mut text = ContentBlock::result_text(content);
            if text.is_empty()
                && let Some(side) = line.tool_use_result.as_ref().and_then(|v| v.as_str())
            {
                text = side.to_string();
            }

            let updated = self.context.tool_blocks.get_mut(tool_use_id).map(|entry| {
                entry.content = entry.content.with_result(&text, *is_error);
                (entry.block_id, entry.content.clone())
            });

            match updated {
                Some((block_id, content)) => events.push(SessionEvent::UpdateBlock {
                    block_id,
                    content: BlockContent::ToolCall(content),
                }),
                None => {
                    // Orphaned result, usually the far side of a compaction.
                    events.push(self.add_block(BlockContent::System { text }));
                }
            }
        }

        events
    }

    fn on_assistant(&mut self, line: &RawLine) -> Vec<SessionEvent> {
        let request_id = line.request_id.clone();
        self.context.current_request_id = request_id.clone();

        let mut events = Vec::new();

        match line.content() {
            crate::schema::RawContent::Text(text) => {
                events.push(self.add_block(BlockContent::Assistant {
                    text: text.clone(),
                    request_id,
                }));
            }
            crate::schema::RawContent::Blocks(blocks) => {
                for block in blocks.clone() {
                    match block {
                        ContentBlock::Text { text } => {
                            events.push(self.add_block(BlockContent::Assistant {
                                text,
                                request_id: request_id.clone(),
                            }));
                        }
                        ContentBlock::Thinking { thinking } => {
                            events.push(self.add_block(BlockContent::Thinking {
                                text: thinking,
                                request_id: request_id.clone(),
                            }));
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            let label = tool_label(&name, &input);
                            let content =
                                ToolCallContent::new(&name, &id, label, request_id.clone());
                            let event = self.add_block(BlockContent::ToolCall(content.clone()));
                            let block_id = match &event {
                                SessionEvent::AddBlock { block } => block.id,
                                _ => unreachable!(),
                            };
                            self.context
                                .tool_blocks
                                .insert(id, ToolBlockEntry { block_id, content });
                            events.push(event);
                        }
                        _ => {}
                    }
                }
            }
            crate::schema::RawContent::Null => {}
        }

        events
    }

    fn on_duration(&mut self, line: &RawLine) -> Vec<SessionEvent> {
        let duration_ms = line.duration_ms.unwrap_or(0);
        vec![self.add_block(BlockContent::Duration { duration_ms })]
    }

    fn on_compact(&mut self) -> Vec<SessionEvent> {
        self.context.clear();
        vec![SessionEvent::ClearAll]
    }

    fn on_progress(&mut self, kind: LineKind, line: &RawLine) -> Vec<SessionEvent> {
        let Some(parent) = line.parent_tool_use_id.as_deref() else {
            return Vec::new();
        };

        let Some(text) = progress_text(kind, line) else {
            return Vec::new();
        };

        let updated = self.context.tool_blocks.get_mut(parent).map(|entry| {
            entry.content = entry.content.with_progress(text);
            (entry.block_id, entry.content.clone())
        });

        match updated {
            Some((block_id, content)) => vec![SessionEvent::UpdateBlock {
                block_id,
                content: BlockContent::ToolCall(content),
            }],
            None => {
                debug!(parent_tool_use_id = parent, "progress for unknown tool call");
                Vec::new()
            }
        }
    }
}

fn progress_text(kind: LineKind, line: &RawLine) -> Option<String> {
    match kind {
        LineKind::BashProgress => line.output.clone(),
        LineKind::HookProgress => match (line.hook_name.as_deref(), line.output.as_deref()) {
            (Some(name), Some(output)) => Some(format!("{}: {}", name, output)),
            (Some(name), None) => Some(name.to_string()),
            (None, Some(output)) => Some(output.to_string()),
            (None, None) => None,
        },
        LineKind::AgentProgress => line.status.clone(),
        LineKind::QueryUpdate => line.query.clone(),
        LineKind::SearchResults => line.result_count.map(|n| format!("{} results", n)),
        LineKind::WaitingForTask => Some("waiting for task…".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_block_content(event: &SessionEvent) -> &BlockContent {
        match event {
            SessionEvent::AddBlock { block } => &block.content,
            other => panic!("expected AddBlock, got {:?}", other),
        }
    }

    #[test]
    fn user_then_assistant_then_duration() {
        let mut processor = LineProcessor::new();

        let events = processor.process_raw(r#"{"role":"user","message":{"role":"user","content":"hi"}}"#);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            add_block_content(&events[0]),
            BlockContent::User { text } if text == "hi"
        ));

        let events = processor.process_raw(
            r#"{"role":"assistant","requestId":"r1","message":{"role":"assistant","content":[{"type":"text","text":"hello"}]}}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(
            add_block_content(&events[0]),
            BlockContent::Assistant { text, request_id }
                if text == "hello" && request_id.as_deref() == Some("r1")
        ));

        let events = processor.process_raw(r#"{"type":"turn_duration","duration_ms":1234}"#);
        assert!(matches!(
            add_block_content(&events[0]),
            BlockContent::Duration { duration_ms: 1234 }
        ));
    }

    #[test]
    fn block_ids_are_sequential_and_unique() {
        let mut processor = LineProcessor::new();
        let mut ids = Vec::new();

        for _ in 0..3 {
            let events =
                processor.process_raw(r#"{"role":"user","message":{"role":"user","content":"x"}}"#);
            if let SessionEvent::AddBlock { block } = &events[0] {
                ids.push(block.id);
            }
        }

        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn tool_use_then_result_updates_same_block() {
        let mut processor = LineProcessor::new();

        let events = processor.process_raw(
            r#"{"role":"assistant","requestId":"r1","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Grep","input":{"pattern":"fn main"}}]}}"#,
        );
        let tool_block_id = match &events[0] {
            SessionEvent::AddBlock { block } => {
                assert!(matches!(&block.content, BlockContent::ToolCall(tc) if tc.result.is_none()));
                block.id
            }
            other => panic!("unexpected {:?}", other),
        };

        let events = processor.process_raw(
            r#"{"role":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"3 matches"}]}}"#,
        );
        match &events[0] {
            SessionEvent::UpdateBlock { block_id, content } => {
                assert_eq!(*block_id, tool_block_id);
                match content {
                    BlockContent::ToolCall(tc) => {
                        assert_eq!(tc.result.as_deref(), Some("3 matches"));
                        assert!(!tc.is_error);
                        assert_eq!(tc.label, "Grep: fn main");
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn progress_updates_only_touch_progress_text() {
        let mut processor = LineProcessor::new();

        processor.process_raw(
            r#"{"role":"assistant","requestId":"r1","message":{"role":"assistant","content":[{"type":"tool_use","id":"t2","name":"Bash","input":{"command":"make"}}]}}"#,
        );

        for output in ["a", "a\\nb", "a\\nb\\nc"] {
            let events = processor.process_raw(&format!(
                r#"{{"type":"bash_progress","parentToolUseID":"t2","output":"{}"}}"#,
                output
            ));
            assert_eq!(events.len(), 1);
            match &events[0] {
                SessionEvent::UpdateBlock { content, .. } => match content {
                    BlockContent::ToolCall(tc) => {
                        assert!(tc.progress.is_some());
                        assert!(tc.result.is_none());
                    }
                    other => panic!("unexpected {:?}", other),
                },
                other => panic!("unexpected {:?}", other),
            }
        }

        let events = processor.process_raw(
            r#"{"role":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t2","content":"done"}]}}"#,
        );
        match &events[0] {
            SessionEvent::UpdateBlock { content, .. } => match content {
                BlockContent::ToolCall(tc) => {
                    assert_eq!(tc.result.as_deref(), Some("done"));
                    assert_eq!(tc.progress.as_deref(), Some("a\nb\nc"));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn orphan_tool_result_becomes_system_block() {
        let mut processor = LineProcessor::new();
        let events = processor.process_raw(
            r#"{"role":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"ghost","content":"late"}]}}"#,
        );
        assert!(matches!(
            add_block_content(&events[0]),
            BlockContent::System { text } if text == "late"
        ));
    }

    #[test]
    fn orphan_progress_is_dropped() {
        let mut processor = LineProcessor::new();
        let events = processor
            .process_raw(r#"{"type":"bash_progress","parentToolUseID":"ghost","output":"x"}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn compact_boundary_clears_context_and_restarts_ids() {
        let mut processor = LineProcessor::new();

        processor.process_raw(
            r#"{"role":"assistant","requestId":"rA","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
        );
        assert!(!processor.context().tool_blocks.is_empty());

        let events = processor.process_raw(r#"{"type":"compact_boundary"}"#);
        assert_eq!(events, vec![SessionEvent::ClearAll]);
        assert!(processor.context().tool_blocks.is_empty());
        assert!(processor.context().current_request_id.is_none());

        // A result for the pre-compact call is now an orphan, and ids restart.
        let events = processor.process_raw(
            r#"{"role":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"late"}]}}"#,
        );
        match &events[0] {
            SessionEvent::AddBlock { block } => {
                assert_eq!(block.id, 0);
                assert!(matches!(&block.content, BlockContent::System { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sidechain_lines_leave_context_untouched() {
        let mut processor = LineProcessor::new();
        let before = processor.context().clone();

        let events = processor.process_raw(
            r#"{"isSidechain":true,"role":"assistant","requestId":"rX","message":{"role":"assistant","content":[{"type":"text","text":"hidden"}]}}"#,
        );

        assert!(events.is_empty());
        assert_eq!(
            processor.context().current_request_id,
            before.current_request_id
        );
        assert_eq!(processor.context().next_block_id, before.next_block_id);
    }

    #[test]
    fn malformed_and_unknown_lines_produce_nothing() {
        let mut processor = LineProcessor::new();
        assert!(processor.process_raw("{not json").is_empty());
        assert!(processor.process_raw(r#"{"type":"file_history_snapshot"}"#).is_empty());
        assert!(processor.process_raw("").is_empty());
    }

    #[test]
    fn mixed_assistant_content_emits_one_event_per_block() {
        let mut processor = LineProcessor::new();
        let events = processor.process_raw(
            r#"{"role":"assistant","requestId":"r1","message":{"role":"assistant","content":[{"type":"thinking","thinking":"hm"},{"type":"text","text":"answer"},{"type":"tool_use","id":"t9","name":"Read","input":{"file_path":"/a/b.rs"}}]}}"#,
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(add_block_content(&events[0]), BlockContent::Thinking { .. }));
        assert!(matches!(add_block_content(&events[1]), BlockContent::Assistant { .. }));
        match add_block_content(&events[2]) {
            BlockContent::ToolCall(tc) => assert_eq!(tc.label, "Read: b.rs"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn context_roundtrips_through_serde() {
        let mut processor = LineProcessor::new();
        processor.process_raw(
            r#"{"role":"assistant","requestId":"r1","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
        );

        let json = serde_json::to_string(processor.context()).unwrap();
        let restored: ProcessingContext = serde_json::from_str(&json).unwrap();
        let mut resumed = LineProcessor::from_context(restored);

        // The resumed processor still resolves the pre-restart tool call.
        let events = resumed.process_raw(
            r#"{"role":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#,
        );
        assert!(matches!(events[0], SessionEvent::UpdateBlock { .. }));
    }
}
