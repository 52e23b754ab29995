use tracecast_types::{Block, BlockContent, ToolCallContent, truncate_line};

const RESULT_PREVIEW_MAX: usize = 200;
const PROGRESS_PREVIEW_MAX: usize = 120;

/// Render blocks to the markdown that feeds chat messages and SSE replay.
///
/// Blocks are separated by a blank line, except that consecutive assistant
/// blocks sharing a request id join without one, and a tool call renders
/// directly under the assistant block whose request id it shares.
pub fn render_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();

    for (position, block) in blocks.iter().enumerate() {
        if position > 0 {
            if joins_previous(&blocks[position - 1].content, &block.content) {
                out.push('\n');
            } else {
                out.push_str("\n\n");
            }
        }
        out.push_str(&render_block(&block.content));
    }

    out
}

fn joins_previous(previous: &BlockContent, current: &BlockContent) -> bool {
    match (previous, current) {
        (
            BlockContent::Assistant {
                request_id: Some(prev),
                ..
            },
            BlockContent::Assistant {
                request_id: Some(next),
                ..
            },
        ) => prev == next,
        (
            BlockContent::Assistant {
                request_id: Some(prev),
                ..
            },
            BlockContent::ToolCall(tool),
        ) => tool.request_id.as_deref() == Some(prev.as_str()),
        _ => false,
    }
}

fn render_block(content: &BlockContent) -> String {
    match content {
        BlockContent::User { text } => format!("👤 {}", text),
        BlockContent::Assistant { text, .. } => text.clone(),
        BlockContent::Thinking { text, .. } => format!("💭 {}", text),
        BlockContent::ToolCall(tool) => render_tool_call(tool),
        BlockContent::Duration { duration_ms } => {
            format!("⏱ {}", format_duration_ms(*duration_ms))
        }
        BlockContent::System { text } => format!("ℹ️ {}", text),
    }
}

fn render_tool_call(tool: &ToolCallContent) -> String {
    let marker = if tool.is_error { "❌" } else { "🔧" };
    let mut out = format!("{} {}", marker, tool.label);

    if let Some(progress) = &tool.progress {
        out.push('\n');
        out.push_str("⏳ ");
        out.push_str(&truncate_line(progress, PROGRESS_PREVIEW_MAX));
    }

    if let Some(result) = &tool.result
        && !result.is_empty()
    {
        out.push('\n');
        out.push_str("→ ");
        out.push_str(&truncate_line(result, RESULT_PREVIEW_MAX));
    }

    out
}

/// Elapsed-time string: `Nms` under a second, `Ns` under a minute,
/// `Nm Ss` beyond.
pub fn format_duration_ms(duration_ms: u64) -> String {
    if duration_ms < 1_000 {
        format!("{}ms", duration_ms)
    } else if duration_ms < 60_000 {
        format!("{}s", duration_ms / 1_000)
    } else {
        let minutes = duration_ms / 60_000;
        let seconds = (duration_ms % 60_000) / 1_000;
        format!("{}m {}s", minutes, seconds)
    }
}
