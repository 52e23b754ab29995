use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use tracecast_engine::TurnTracker;
use tracecast_protocol::ProcessingContext;
use tracecast_types::{Destination, MessageHandle, SessionId};

/// Durable per-session progress, written after each processed batch.
///
/// Restart resumes from `offset` with the same processing context and
/// per-destination turn state, so at most one in-flight batch replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub path: PathBuf,
    pub offset: u64,
    pub context: ProcessingContext,
    #[serde(default)]
    pub trackers: Vec<TurnTracker>,
    #[serde(default)]
    pub handles: Vec<HandleRecord>,
    pub saved_at: DateTime<Utc>,
}

/// One turn-to-message binding, flattened for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleRecord {
    pub destination: Destination,
    pub turn: u64,
    pub handle: MessageHandle,
}

/// One JSON file per session under the state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, session_id: &SessionId) -> PathBuf {
        let safe: String = session_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Atomic save: write to a temp file in the same directory, then rename,
    /// so readers see either the prior or the new full record.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        let target = self.file_for(&state.session_id);
        let tmp = target.with_extension("json.tmp");

        let content = serde_json::to_vec_pretty(state)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Load every persisted record, discarding records whose transcript no
    /// longer exists (the file is deleted along with the record).
    pub fn load_all(&self) -> Result<Vec<SessionState>> {
        let mut states = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = std::fs::read_to_string(&path)?;
            let state: SessionState = match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable state record");
                    continue;
                }
            };

            if !state.path.exists() {
                warn!(
                    session_id = %state.session_id,
                    path = %state.path.display(),
                    "transcript vanished; discarding state record"
                );
                let _ = std::fs::remove_file(&path);
                continue;
            }

            states.push(state);
        }

        Ok(states)
    }

    pub fn delete(&self, session_id: &SessionId) -> Result<()> {
        let path = self.file_for(session_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
