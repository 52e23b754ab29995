mod classify;
mod labels;
mod processor;
mod schema;

pub use classify::{LineKind, classify};
pub use labels::{LABEL_MAX, tool_label};
pub use processor::{LineProcessor, ProcessingContext, ToolBlockEntry};
pub use schema::{ContentBlock, RawContent, RawLine, RawMessage};
