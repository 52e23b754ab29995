use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::config::{DispatchConfig, RelayConfig};
use crate::debounce::{DebounceConfig, Dispatcher, HandleMap, spawn_dispatcher};
use crate::discovery::find_transcript;
use crate::hub::SessionHub;
use crate::publish::Publisher;
use crate::session::{PipelineSeed, SessionControl, SessionRuntime, spawn_session};
use crate::store::{SessionState, StateStore};
use crate::{Error, Result};
use tracecast_engine::{DispatchAction, TurnTracker};
use tracecast_types::{BufferedEvent, Destination, DestinationKind, SessionId};

/// Bound on queue draining during shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of the `/sessions` listing.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub path: PathBuf,
    pub destinations: Vec<Destination>,
}

struct SessionEntry {
    path: PathBuf,
    destinations: HashSet<Destination>,
    hub: Arc<SessionHub>,
    runtime: SessionRuntime,
    /// Bumped on every attach so a stale idle-grace timer cannot tear the
    /// session down after a re-attach.
    idle_epoch: u64,
}

struct DispatcherEntry {
    dispatcher: Dispatcher,
    refcount: usize,
}

/// The orchestrator: owns sessions, destinations, dispatchers, and state.
///
/// Attach/detach are idempotent. The sessions and dispatchers maps sit
/// behind plain mutexes; nothing awaits while holding them.
pub struct RelayService {
    weak_self: Weak<RelayService>,
    config_path: PathBuf,
    config: Mutex<RelayConfig>,
    dispatch: DispatchConfig,
    store: Arc<StateStore>,
    publishers: HashMap<DestinationKind, Arc<dyn Publisher>>,
    handles: HandleMap,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    dispatchers: Mutex<HashMap<Destination, DispatcherEntry>>,
    /// Persisted state waiting for its session/destinations to re-attach.
    restored: Mutex<HashMap<SessionId, SessionState>>,
    accepting: AtomicBool,
}

impl RelayService {
    /// Load persisted state and re-attach everything the configuration
    /// records. Publishers are injected so tests can run without tokens.
    pub fn start(
        config: RelayConfig,
        config_path: PathBuf,
        state_dir: PathBuf,
        publishers: HashMap<DestinationKind, Arc<dyn Publisher>>,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(StateStore::new(state_dir)?);

        let mut restored = HashMap::new();
        let handles: HandleMap = Arc::new(Mutex::new(HashMap::new()));
        for state in store.load_all()? {
            {
                let mut map = handles.lock().unwrap();
                for record in &state.handles {
                    map.insert(
                        (
                            state.session_id.clone(),
                            record.destination.clone(),
                            record.turn,
                        ),
                        record.handle.clone(),
                    );
                }
            }
            restored.insert(state.session_id.clone(), state);
        }

        let dispatch = config.dispatch.clone();
        let recorded_sessions = config.sessions.clone();

        let service = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            config_path,
            config: Mutex::new(config),
            dispatch,
            store,
            publishers,
            handles,
            sessions: Mutex::new(HashMap::new()),
            dispatchers: Mutex::new(HashMap::new()),
            restored: Mutex::new(restored),
            accepting: AtomicBool::new(true),
        });

        for session in recorded_sessions {
            for destination in session.destinations {
                if let Err(err) = service.attach(
                    Some(session.session_id.clone()),
                    Some(session.path.clone()),
                    destination.clone(),
                ) {
                    warn!(
                        session_id = %session.session_id,
                        destination = %destination,
                        error = %err,
                        "could not re-attach recorded destination"
                    );
                }
            }
        }

        Ok(service)
    }

    /// Attach a destination to a session, starting the watcher if needed.
    ///
    /// `session_id` may be omitted when `path` is given (a fresh id is
    /// generated); `path` may be omitted when the transcript can be found
    /// under the configured roots by session id.
    pub fn attach(
        &self,
        session_id: Option<SessionId>,
        path: Option<PathBuf>,
        destination: Destination,
    ) -> Result<SessionId> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::InvalidOperation("service is shutting down".into()));
        }

        let publisher = self
            .publishers
            .get(&destination.kind())
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "no credentials configured for {} destinations",
                    destination.kind().as_str()
                ))
            })?;

        let session_id = match (&session_id, &path) {
            (Some(id), _) => id.clone(),
            (None, Some(_)) => SessionId::generate(),
            (None, None) => {
                return Err(Error::Config(
                    "attach requires a session_id or a path".into(),
                ));
            }
        };

        let mut sessions = self.sessions.lock().unwrap();

        if let Some(entry) = sessions.get(&session_id)
            && entry.destinations.contains(&destination)
        {
            return Ok(session_id);
        }

        // Resolve the transcript path for new sessions.
        let resolved_path = match sessions.get(&session_id) {
            Some(entry) => entry.path.clone(),
            None => match path {
                Some(path) => path,
                None => {
                    let roots = self.config.lock().unwrap().effective_transcript_roots();
                    find_transcript(&roots, &session_id).ok_or_else(|| {
                        Error::UnknownSession(format!(
                            "no transcript found for {} under the configured roots",
                            session_id
                        ))
                    })?
                }
            },
        };

        if !sessions.contains_key(&session_id) {
            let entry = self.create_session(&session_id, resolved_path.clone())?;
            sessions.insert(session_id.clone(), entry);
        }

        let entry = sessions.get_mut(&session_id).expect("inserted above");

        let dispatch_tx = self.checkout_dispatcher(&destination, publisher);
        let tracker = self
            .restored_tracker(&session_id, &destination)
            .unwrap_or_else(|| TurnTracker::new(session_id.clone(), destination.clone()));

        let _ = entry.ctrl_tx().send(SessionControl::AddDestination {
            destination: destination.clone(),
            tracker,
            dispatch_tx,
        });
        entry.destinations.insert(destination.clone());
        entry.idle_epoch += 1;
        drop(sessions);

        self.persist_config(|config| {
            config.record_attachment(&session_id, &resolved_path, &destination)
        });

        info!(session_id = %session_id, destination = %destination, "destination attached");
        Ok(session_id)
    }

    /// Detach a destination. Unknown sessions and destinations succeed.
    pub fn detach(&self, session_id: &SessionId, destination: &Destination) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::InvalidOperation("service is shutting down".into()));
        }

        let now_idle = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(entry) = sessions.get_mut(session_id) else {
                return Ok(());
            };
            if !entry.destinations.remove(destination) {
                return Ok(());
            }

            let _ = entry.ctrl_tx().send(SessionControl::RemoveDestination {
                destination: destination.clone(),
            });

            self.release_dispatcher(destination);

            if entry.destinations.is_empty() {
                entry.idle_epoch += 1;
                Some(entry.idle_epoch)
            } else {
                None
            }
        };

        self.persist_config(|config| config.record_detachment(session_id, destination));
        info!(session_id = %session_id, destination = %destination, "destination detached");

        if let Some(epoch) = now_idle {
            self.arm_idle_grace(session_id.clone(), epoch);
        }

        Ok(())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().unwrap();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(session_id, entry)| SessionInfo {
                session_id: session_id.clone(),
                path: entry.path.clone(),
                destinations: entry.destinations.iter().cloned().collect(),
            })
            .collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub fn exists(&self, session_id: &SessionId, destination: &Destination) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .is_some_and(|entry| entry.destinations.contains(destination))
    }

    /// Subscribe to a session's event stream (buffered replay included).
    pub fn subscribe(&self, session_id: &SessionId) -> Option<mpsc::Receiver<BufferedEvent>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|entry| entry.hub.subscribe())
    }

    /// Graceful shutdown: stop accepting work, stop watchers, drain the
    /// debouncer queues for a bounded time, persist state.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("service shutting down");

        let entries: Vec<(SessionId, SessionEntry)> =
            self.sessions.lock().unwrap().drain().collect();

        let mut acks = Vec::new();
        for (session_id, entry) in entries {
            let _ = entry.runtime.shutdown_tx.send(true);
            let (ack_tx, ack_rx) = oneshot::channel();
            let _ = entry
                .runtime
                .ctrl_tx
                .send(SessionControl::Shutdown { ack: ack_tx });
            acks.push((session_id, ack_rx, entry.runtime.task));
        }

        for (session_id, ack_rx, task) in acks {
            if tokio::time::timeout(Duration::from_secs(1), ack_rx)
                .await
                .is_err()
            {
                warn!(session_id = %session_id, "session did not confirm shutdown; aborting");
            }
            task.abort();
        }

        let dispatchers: Vec<(Destination, DispatcherEntry)> =
            self.dispatchers.lock().unwrap().drain().collect();

        // Dropping the senders lets each worker drain its queue and exit.
        let mut tasks = Vec::new();
        for (destination, entry) in dispatchers {
            drop(entry.dispatcher.tx);
            tasks.push((destination, entry.dispatcher.task));
        }
        for (destination, mut task) in tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                warn!(destination = %destination, "dispatcher did not drain in time; aborting");
                task.abort();
            }
        }

        info!("service stopped");
    }

    fn create_session(&self, session_id: &SessionId, path: PathBuf) -> Result<SessionEntry> {
        let (offset, context) = match self.restored.lock().unwrap().get(session_id) {
            Some(state) if state.path == path => (state.offset, state.context.clone()),
            _ => (0, Default::default()),
        };

        let hub = Arc::new(SessionHub::new());
        let runtime = spawn_session(
            PipelineSeed {
                session_id: session_id.clone(),
                path: path.clone(),
                offset,
                context,
                idle_finalize: self.dispatch.idle_finalize(),
                coalesce_window: self.dispatch.coalesce_window(),
            },
            hub.clone(),
            self.store.clone(),
            self.handles.clone(),
        )?;

        Ok(SessionEntry {
            path,
            destinations: HashSet::new(),
            hub,
            runtime,
            idle_epoch: 0,
        })
    }

    fn restored_tracker(
        &self,
        session_id: &SessionId,
        destination: &Destination,
    ) -> Option<TurnTracker> {
        let restored = self.restored.lock().unwrap();
        let state = restored.get(session_id)?;
        state
            .trackers
            .iter()
            .find(|tracker| tracker.destination() == destination)
            .cloned()
    }

    fn checkout_dispatcher(
        &self,
        destination: &Destination,
        publisher: Arc<dyn Publisher>,
    ) -> mpsc::UnboundedSender<DispatchAction> {
        let mut dispatchers = self.dispatchers.lock().unwrap();
        let entry = dispatchers
            .entry(destination.clone())
            .or_insert_with(|| DispatcherEntry {
                dispatcher: spawn_dispatcher(
                    destination.clone(),
                    publisher,
                    DebounceConfig::for_destination(&self.dispatch, destination),
                    self.handles.clone(),
                ),
                refcount: 0,
            });
        entry.refcount += 1;
        entry.dispatcher.tx.clone()
    }

    fn release_dispatcher(&self, destination: &Destination) {
        let mut dispatchers = self.dispatchers.lock().unwrap();
        let Some(entry) = dispatchers.get_mut(destination) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            // In-flight retries are abandoned with the task.
            if let Some(entry) = dispatchers.remove(destination) {
                entry.dispatcher.task.abort();
            }
        }
    }

    fn arm_idle_grace(&self, session_id: SessionId, epoch: u64) {
        let grace = self.dispatch.idle_grace();
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(service) = weak.upgrade() else {
                return;
            };
            service.teardown_if_idle(&session_id, epoch);
        });
    }

    /// Idle-grace expiry: stop the session if nothing re-attached and no
    /// SSE subscriber remains.
    fn teardown_if_idle(&self, session_id: &SessionId, epoch: u64) {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(entry) = sessions.get(session_id) else {
            return;
        };
        if entry.idle_epoch != epoch
            || !entry.destinations.is_empty()
            || entry.hub.subscriber_count() > 0
        {
            return;
        }

        let entry = sessions.remove(session_id).expect("present above");
        drop(sessions);

        let _ = entry.runtime.shutdown_tx.send(true);
        let (ack_tx, _ack_rx) = oneshot::channel();
        let _ = entry
            .runtime
            .ctrl_tx
            .send(SessionControl::Shutdown { ack: ack_tx });

        info!(session_id = %session_id, "idle session stopped");
    }

    fn persist_config(&self, mutate: impl FnOnce(&mut RelayConfig) -> bool) {
        let mut config = self.config.lock().unwrap();
        if !mutate(&mut config) {
            return;
        }
        if let Err(err) = config.save_to(&self.config_path) {
            error!(error = %err, "could not persist configuration");
        }
    }
}

impl SessionEntry {
    fn ctrl_tx(&self) -> &mpsc::UnboundedSender<SessionControl> {
        &self.runtime.ctrl_tx
    }
}
