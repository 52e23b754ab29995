//! Builders for transcript lines in the agent CLI's JSONL shape.

use serde_json::{Value, json};

pub fn user_line(text: &str) -> String {
    json!({
        "type": "user",
        "role": "user",
        "message": {"role": "user", "content": text},
    })
    .to_string()
}

pub fn sidechain_user_line(text: &str) -> String {
    json!({
        "type": "user",
        "role": "user",
        "isSidechain": true,
        "message": {"role": "user", "content": text},
    })
    .to_string()
}

pub fn assistant_text_line(request_id: &str, text: &str) -> String {
    json!({
        "type": "assistant",
        "role": "assistant",
        "requestId": request_id,
        "message": {
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
        },
    })
    .to_string()
}

pub fn thinking_line(request_id: &str, text: &str) -> String {
    json!({
        "type": "assistant",
        "role": "assistant",
        "requestId": request_id,
        "message": {
            "role": "assistant",
            "content": [{"type": "thinking", "thinking": text}],
        },
    })
    .to_string()
}

pub fn tool_use_line(request_id: &str, tool_use_id: &str, name: &str, input: Value) -> String {
    json!({
        "type": "assistant",
        "role": "assistant",
        "requestId": request_id,
        "message": {
            "role": "assistant",
            "content": [{
                "type": "tool_use",
                "id": tool_use_id,
                "name": name,
                "input": input,
            }],
        },
    })
    .to_string()
}

pub fn tool_result_line(tool_use_id: &str, text: &str) -> String {
    json!({
        "type": "user",
        "role": "user",
        "message": {
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": text,
            }],
        },
    })
    .to_string()
}

pub fn tool_error_line(tool_use_id: &str, text: &str) -> String {
    json!({
        "type": "user",
        "role": "user",
        "message": {
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": text,
                "is_error": true,
            }],
        },
    })
    .to_string()
}

pub fn bash_progress_line(parent_tool_use_id: &str, output: &str) -> String {
    json!({
        "type": "bash_progress",
        "parentToolUseID": parent_tool_use_id,
        "output": output,
    })
    .to_string()
}

pub fn duration_line(duration_ms: u64) -> String {
    json!({"type": "turn_duration", "duration_ms": duration_ms}).to_string()
}

pub fn compact_boundary_line() -> String {
    json!({"type": "compact_boundary"}).to_string()
}

/// Join lines into transcript file content (trailing newline included).
pub fn transcript(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
