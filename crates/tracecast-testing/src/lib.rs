//! Shared test support: transcript line builders and a mock publisher.

mod fixtures;
mod publisher;

pub use fixtures::*;
pub use publisher::{CallKind, MockPublisher, RecordedCall};
