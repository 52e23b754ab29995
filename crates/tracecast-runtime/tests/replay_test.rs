//! Replay-equals-live and restart-safety properties of the processing
//! pipeline, exercised through the public processor and visual state.

use serde_json::json;
use tracecast_engine::VisualState;
use tracecast_protocol::{LineProcessor, ProcessingContext};
use tracecast_testing::*;

fn sample_lines() -> Vec<String> {
    vec![
        user_line("run the tests"),
        thinking_line("r1", "which suite?"),
        assistant_text_line("r1", "Running them now."),
        tool_use_line("r1", "t1", "Bash", json!({"command": "cargo test"})),
        bash_progress_line("t1", "compiling"),
        bash_progress_line("t1", "compiling\ntesting"),
        tool_result_line("t1", "42 passed"),
        duration_line(8_500),
        compact_boundary_line(),
        user_line("and lint?"),
        tool_use_line("r2", "t2", "Bash", json!({"command": "cargo clippy"})),
        tool_error_line("t2", "3 warnings"),
        duration_line(2_000),
    ]
}

/// The markdown after consuming the file in one shot equals the markdown
/// after consuming it line by line.
#[test]
fn replay_equals_live() {
    let lines = sample_lines();

    let mut one_shot = LineProcessor::new();
    let mut full = VisualState::new();
    for line in &lines {
        for event in one_shot.process_raw(line) {
            full.apply(&event);
        }
    }

    let mut incremental = LineProcessor::new();
    let mut live = VisualState::new();
    for line in &lines {
        // One batch per line is the worst-case batching.
        let events = incremental.process_raw(line);
        live.apply_all(events.iter());
    }

    assert_eq!(full.render(), live.render());
    assert_eq!(full.blocks(), live.blocks());
}

/// Stopping at any line, persisting the context, and resuming produces
/// the same final block list as a single uninterrupted run.
#[test]
fn restart_at_any_offset_is_safe() {
    let lines = sample_lines();

    let mut reference = LineProcessor::new();
    let mut expected = VisualState::new();
    for line in &lines {
        expected.apply_all(reference.process_raw(line).iter());
    }

    for split in 0..=lines.len() {
        let mut state = VisualState::new();

        let mut before = LineProcessor::new();
        for line in &lines[..split] {
            state.apply_all(before.process_raw(line).iter());
        }

        // Persist and restore the context across the "restart".
        let persisted = serde_json::to_string(before.context()).unwrap();
        let context: ProcessingContext = serde_json::from_str(&persisted).unwrap();
        let mut after = LineProcessor::from_context(context);

        for line in &lines[split..] {
            state.apply_all(after.process_raw(line).iter());
        }

        assert_eq!(
            state.blocks(),
            expected.blocks(),
            "divergence when restarting after line {}",
            split
        );
    }
}

/// Block ids stay unique between clears even across a restart boundary.
#[test]
fn block_ids_unique_within_a_run() {
    let lines = sample_lines();
    let mut processor = LineProcessor::new();
    let mut seen = std::collections::HashSet::new();

    for line in &lines {
        for event in processor.process_raw(line) {
            match event {
                tracecast_types::SessionEvent::AddBlock { block } => {
                    assert!(seen.insert(block.id), "duplicate block id {}", block.id);
                }
                tracecast_types::SessionEvent::ClearAll => seen.clear(),
                tracecast_types::SessionEvent::UpdateBlock { block_id, .. } => {
                    assert!(seen.contains(&block_id));
                }
            }
        }
    }
}
