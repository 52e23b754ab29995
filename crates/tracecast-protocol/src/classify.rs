use crate::schema::{ContentBlock, RawContent, RawLine};

/// Marker tag the agent CLI wraps local command output in.
pub(crate) const LOCAL_COMMAND_STDOUT_OPEN: &str = "<local-command-stdout>";
pub(crate) const LOCAL_COMMAND_STDOUT_CLOSE: &str = "</local-command-stdout>";

/// Closed set of line classifications.
///
/// Every transcript line maps to exactly one kind; anything the protocol
/// does not recognise is `Invisible`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    // User-visible user messages
    UserInput,
    ToolResult,
    LocalCommandOutput,

    // User-visible assistant messages
    AssistantText,
    ToolUse,
    Thinking,

    // System
    TurnDuration,
    CompactBoundary,

    // Progress updates that mutate an existing tool-call block
    BashProgress,
    HookProgress,
    AgentProgress,
    QueryUpdate,
    SearchResults,
    WaitingForTask,

    // Skipped entirely
    Invisible,
}

impl LineKind {
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            LineKind::BashProgress
                | LineKind::HookProgress
                | LineKind::AgentProgress
                | LineKind::QueryUpdate
                | LineKind::SearchResults
                | LineKind::WaitingForTask
        )
    }
}

/// Classify one parsed line. Rules are evaluated top-down; first match wins.
pub fn classify(line: &RawLine) -> LineKind {
    let role = line.effective_role();

    // Sub-agent traffic never renders.
    if line.is_sidechain && matches!(role, Some("user") | Some("assistant")) {
        return LineKind::Invisible;
    }

    // Structural lines (summaries, file snapshots, ...) never render.
    if matches!(line.line_type.as_deref(), Some("summary")) {
        return LineKind::Invisible;
    }

    match role {
        Some("user") => return classify_user(line),
        Some("assistant") => return classify_assistant(line.content()),
        _ => {}
    }

    match line.line_type.as_deref() {
        Some("turn_duration") => return LineKind::TurnDuration,
        Some("compact_boundary") => return LineKind::CompactBoundary,
        _ => {}
    }

    if line.parent_tool_use_id.is_some() {
        return classify_progress(line.line_type.as_deref());
    }

    LineKind::Invisible
}

fn classify_user(line: &RawLine) -> LineKind {
    let content = line.content();

    if content
        .blocks()
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
    {
        return LineKind::ToolResult;
    }

    match content.text() {
        Some(text) if text.contains(LOCAL_COMMAND_STDOUT_OPEN) => LineKind::LocalCommandOutput,
        Some(_) => LineKind::UserInput,
        None => LineKind::Invisible,
    }
}

fn classify_assistant(content: &RawContent) -> LineKind {
    match content {
        RawContent::Null => LineKind::Invisible,
        RawContent::Text(_) => LineKind::AssistantText,
        RawContent::Blocks(blocks) => {
            // The first visible content block decides the line's kind; the
            // processor still walks every block when producing events.
            for block in blocks {
                match block {
                    ContentBlock::Text { .. } => return LineKind::AssistantText,
                    ContentBlock::ToolUse { .. } => return LineKind::ToolUse,
                    ContentBlock::Thinking { .. } => return LineKind::Thinking,
                    _ => {}
                }
            }
            LineKind::Invisible
        }
    }
}

fn classify_progress(line_type: Option<&str>) -> LineKind {
    match line_type {
        Some("bash_progress") => LineKind::BashProgress,
        Some("hook_progress") => LineKind::HookProgress,
        Some("agent_progress") => LineKind::AgentProgress,
        Some("query_update") => LineKind::QueryUpdate,
        Some("search_results") => LineKind::SearchResults,
        Some("waiting_for_task") => LineKind::WaitingForTask,
        _ => LineKind::Invisible,
    }
}

/// Strip the local-command markers from user text, keeping the payload.
pub(crate) fn local_command_text(text: &str) -> String {
    let Some(start) = text.find(LOCAL_COMMAND_STDOUT_OPEN) else {
        return text.to_string();
    };
    let after = &text[start + LOCAL_COMMAND_STDOUT_OPEN.len()..];
    match after.find(LOCAL_COMMAND_STDOUT_CLOSE) {
        Some(end) => after[..end].trim().to_string(),
        None => after.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RawLine {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn sidechain_user_and_assistant_are_invisible() {
        let user = parse(r#"{"isSidechain":true,"role":"user","message":{"role":"user","content":"x"}}"#);
        assert_eq!(classify(&user), LineKind::Invisible);

        let asst = parse(
            r#"{"isSidechain":true,"role":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"y"}]}}"#,
        );
        assert_eq!(classify(&asst), LineKind::Invisible);
    }

    #[test]
    fn sidechain_flag_does_not_hide_system_lines() {
        let duration = parse(r#"{"isSidechain":true,"type":"turn_duration","duration_ms":5}"#);
        assert_eq!(classify(&duration), LineKind::TurnDuration);
    }

    #[test]
    fn summary_lines_are_invisible() {
        let line = parse(r#"{"type":"summary","summary":"compacted"}"#);
        assert_eq!(classify(&line), LineKind::Invisible);
    }

    #[test]
    fn user_variants() {
        let input = parse(r#"{"role":"user","message":{"role":"user","content":"hi"}}"#);
        assert_eq!(classify(&input), LineKind::UserInput);

        let result = parse(
            r#"{"role":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#,
        );
        assert_eq!(classify(&result), LineKind::ToolResult);

        let local = parse(
            r#"{"role":"user","message":{"role":"user","content":"<local-command-stdout>done</local-command-stdout>"}}"#,
        );
        assert_eq!(classify(&local), LineKind::LocalCommandOutput);
    }

    #[test]
    fn assistant_variants_follow_first_block() {
        let text = parse(
            r#"{"role":"assistant","requestId":"r1","message":{"role":"assistant","content":[{"type":"text","text":"a"},{"type":"tool_use","id":"t","name":"Bash","input":{}}]}}"#,
        );
        assert_eq!(classify(&text), LineKind::AssistantText);

        let tool = parse(
            r#"{"role":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t","name":"Bash","input":{}}]}}"#,
        );
        assert_eq!(classify(&tool), LineKind::ToolUse);

        let thinking = parse(
            r#"{"role":"assistant","message":{"role":"assistant","content":[{"type":"thinking","thinking":"hm"}]}}"#,
        );
        assert_eq!(classify(&thinking), LineKind::Thinking);

        let null = parse(r#"{"role":"assistant","message":{"role":"assistant","content":null}}"#);
        assert_eq!(classify(&null), LineKind::Invisible);
    }

    #[test]
    fn progress_envelopes_dispatch_by_type() {
        let cases = [
            ("bash_progress", LineKind::BashProgress),
            ("hook_progress", LineKind::HookProgress),
            ("agent_progress", LineKind::AgentProgress),
            ("query_update", LineKind::QueryUpdate),
            ("search_results", LineKind::SearchResults),
            ("waiting_for_task", LineKind::WaitingForTask),
        ];
        for (name, expected) in cases {
            let line = parse(&format!(
                r#"{{"type":"{}","parentToolUseID":"t1"}}"#,
                name
            ));
            assert_eq!(classify(&line), expected, "type {}", name);
        }

        let unknown = parse(r#"{"type":"mystery_progress","parentToolUseID":"t1"}"#);
        assert_eq!(classify(&unknown), LineKind::Invisible);
    }

    #[test]
    fn unknown_shape_is_invisible() {
        let line = parse(r#"{"something":"else"}"#);
        assert_eq!(classify(&line), LineKind::Invisible);
    }

    #[test]
    fn local_command_text_strips_markers() {
        let text = "<local-command-stdout>hello\nworld</local-command-stdout>";
        assert_eq!(local_command_text(text), "hello\nworld");
        assert_eq!(local_command_text("no markers"), "no markers");
    }
}
