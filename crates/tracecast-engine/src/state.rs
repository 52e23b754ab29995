use std::collections::HashMap;

use tracecast_types::{Block, BlockId, SessionEvent};

/// Ordered block list derived from a session's event stream.
///
/// The live pipeline feeds trackers directly; this consumer exists to
/// replay a buffered prefix for late SSE subscribers, to render one-shot
/// output, and for debugging.
#[derive(Debug, Clone, Default)]
pub struct VisualState {
    blocks: Vec<Block>,
    index: HashMap<BlockId, usize>,
}

impl VisualState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::AddBlock { block } => {
                self.index.insert(block.id, self.blocks.len());
                self.blocks.push(block.clone());
            }
            SessionEvent::UpdateBlock { block_id, content } => {
                // Unknown ids are silently ignored.
                if let Some(&position) = self.index.get(block_id) {
                    self.blocks[position].content = content.clone();
                }
            }
            SessionEvent::ClearAll => {
                self.blocks.clear();
                self.index.clear();
            }
        }
    }

    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a SessionEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Render the whole state as markdown.
    pub fn render(&self) -> String {
        crate::markdown::render_blocks(&self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracecast_types::BlockContent;

    fn add(id: BlockId, content: BlockContent) -> SessionEvent {
        SessionEvent::AddBlock {
            block: Block::new(id, content),
        }
    }

    #[test]
    fn add_update_clear() {
        let mut state = VisualState::new();

        state.apply(&add(0, BlockContent::User { text: "hi".into() }));
        state.apply(&add(
            1,
            BlockContent::Assistant {
                text: "draft".into(),
                request_id: Some("r1".into()),
            },
        ));
        assert_eq!(state.blocks().len(), 2);

        state.apply(&SessionEvent::UpdateBlock {
            block_id: 1,
            content: BlockContent::Assistant {
                text: "final".into(),
                request_id: Some("r1".into()),
            },
        });
        assert!(matches!(
            &state.blocks()[1].content,
            BlockContent::Assistant { text, .. } if text == "final"
        ));

        state.apply(&SessionEvent::ClearAll);
        assert!(state.is_empty());
    }

    #[test]
    fn update_unknown_id_is_a_no_op() {
        let mut state = VisualState::new();
        state.apply(&add(0, BlockContent::User { text: "hi".into() }));

        state.apply(&SessionEvent::UpdateBlock {
            block_id: 99,
            content: BlockContent::System { text: "x".into() },
        });

        assert_eq!(state.blocks().len(), 1);
        assert!(matches!(&state.blocks()[0].content, BlockContent::User { .. }));
    }

    #[test]
    fn clear_then_reused_ids_index_correctly() {
        let mut state = VisualState::new();
        state.apply(&add(0, BlockContent::User { text: "first".into() }));
        state.apply(&SessionEvent::ClearAll);
        state.apply(&add(0, BlockContent::User { text: "second".into() }));

        state.apply(&SessionEvent::UpdateBlock {
            block_id: 0,
            content: BlockContent::User { text: "edited".into() },
        });

        assert_eq!(state.blocks().len(), 1);
        assert!(matches!(
            &state.blocks()[0].content,
            BlockContent::User { text } if text == "edited"
        ));
    }
}
