mod markdown;
mod state;
mod tracker;

pub use markdown::{format_duration_ms, render_blocks};
pub use state::VisualState;
pub use tracker::{ActionKind, DispatchAction, TurnTracker};
