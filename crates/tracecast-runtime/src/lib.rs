mod config;
mod debounce;
mod discovery;
mod error;
mod hub;
mod publish;
mod service;
mod session;
mod store;
mod watch;

pub use config::{DispatchConfig, PlatformConfig, RelayConfig, SessionConfig, resolve_state_dir};
pub use debounce::{DebounceConfig, HandleKey, HandleMap};
pub use discovery::find_transcript;
pub use error::{Error, Result};
pub use hub::{EventBuffer, SessionHub};
pub use publish::{Publisher, PublishError, SlackPublisher, TelegramPublisher, build_publishers};
pub use service::{RelayService, SessionInfo};
pub use store::{HandleRecord, SessionState, StateStore};
pub use watch::{WatchBatch, spawn_tail};
