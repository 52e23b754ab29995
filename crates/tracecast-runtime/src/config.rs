use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracecast_types::{Destination, DestinationKind, SessionId};

/// Resolve the state directory based on priority:
/// 1. Explicit path
/// 2. TRACECAST_STATE environment variable
/// 3. XDG data directory (recommended default)
/// 4. ~/.tracecast (fallback for systems without XDG)
pub fn resolve_state_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("TRACECAST_STATE") {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("tracecast"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".tracecast"));
    }

    Err(Error::Config(
        "Could not determine state directory: no HOME directory or XDG data directory found"
            .to_string(),
    ))
}

/// Platform credentials for one destination kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub bot_token: String,
}

/// One session the service keeps attached across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: SessionId,
    pub path: PathBuf,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

/// Timing and budget knobs for the dispatch path.
///
/// Every value is configurable so tests can shrink the windows instead of
/// hard-coding the production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum gap between edits of the same message, per platform
    pub edit_gap_telegram_ms: u64,
    pub edit_gap_slack_ms: u64,
    /// Token-bucket budget: at most `rate_limit_ops` API calls per window
    pub rate_limit_ops: u32,
    pub rate_limit_window_secs: u64,
    /// Transient-failure retry policy
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Turn is finalized after this long without new blocks
    pub idle_finalize_ms: u64,
    /// Session teardown delay after the last destination detaches
    pub idle_grace_secs: u64,
    /// File-notification coalescing window before a read
    pub coalesce_window_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            edit_gap_telegram_ms: 1_000,
            edit_gap_slack_ms: 700,
            rate_limit_ops: 20,
            rate_limit_window_secs: 60,
            retry_max_attempts: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            idle_finalize_ms: 3_000,
            idle_grace_secs: 60,
            coalesce_window_ms: 150,
        }
    }
}

impl DispatchConfig {
    pub fn edit_gap(&self, kind: DestinationKind) -> Duration {
        match kind {
            DestinationKind::Telegram => Duration::from_millis(self.edit_gap_telegram_ms),
            DestinationKind::Slack => Duration::from_millis(self.edit_gap_slack_ms),
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn idle_finalize(&self) -> Duration {
        Duration::from_millis(self.idle_finalize_ms)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

/// Service configuration, stored as one YAML file.
///
/// The `sessions` list mirrors the HTTP attach payloads so a restart
/// re-attaches everything that was attached before.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub telegram: Option<PlatformConfig>,
    pub slack: Option<PlatformConfig>,
    /// Directories searched when attaching by session id without a path
    pub transcript_roots: Vec<PathBuf>,
    pub sessions: Vec<SessionConfig>,
    pub dispatch: DispatchConfig,
}

impl RelayConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Atomic save: write to a temp file in the same directory, then rename.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Transcript roots with the agent CLI's default location appended when
    /// nothing is configured.
    pub fn effective_transcript_roots(&self) -> Vec<PathBuf> {
        if !self.transcript_roots.is_empty() {
            return self.transcript_roots.clone();
        }
        match dirs::home_dir() {
            Some(home) => vec![home.join(".claude/projects")],
            None => Vec::new(),
        }
    }

    /// Record an attachment; returns false when it was already present.
    pub fn record_attachment(
        &mut self,
        session_id: &SessionId,
        path: &Path,
        destination: &Destination,
    ) -> bool {
        if let Some(session) = self
            .sessions
            .iter_mut()
            .find(|s| &s.session_id == session_id)
        {
            if session.destinations.contains(destination) {
                return false;
            }
            session.destinations.push(destination.clone());
            return true;
        }

        self.sessions.push(SessionConfig {
            session_id: session_id.clone(),
            path: path.to_path_buf(),
            destinations: vec![destination.clone()],
        });
        true
    }

    /// Remove an attachment; returns false when it was not present.
    pub fn record_detachment(&mut self, session_id: &SessionId, destination: &Destination) -> bool {
        let Some(session) = self
            .sessions
            .iter_mut()
            .find(|s| &s.session_id == session_id)
        else {
            return false;
        };

        let before = session.destinations.len();
        session.destinations.retain(|d| d != destination);
        let removed = session.destinations.len() < before;

        self.sessions.retain(|s| !s.destinations.is_empty());
        removed
    }
}
