use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::debounce::HandleMap;
use crate::hub::SessionHub;
use crate::store::{HandleRecord, SessionState, StateStore};
use crate::watch::{WatchBatch, spawn_tail};
use crate::Result;
use tracecast_engine::{DispatchAction, TurnTracker};
use tracecast_protocol::{LineProcessor, ProcessingContext};
use tracecast_types::{Destination, SessionEvent, SessionId};

/// Control messages from the registry to a session's processing task.
pub(crate) enum SessionControl {
    AddDestination {
        destination: Destination,
        tracker: TurnTracker,
        dispatch_tx: mpsc::UnboundedSender<DispatchAction>,
    },
    RemoveDestination {
        destination: Destination,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Everything needed to resume (or start) one session's pipeline.
pub(crate) struct PipelineSeed {
    pub session_id: SessionId,
    pub path: PathBuf,
    pub offset: u64,
    pub context: ProcessingContext,
    pub idle_finalize: Duration,
    pub coalesce_window: Duration,
}

/// A running session: its control channel, tail shutdown, and task handle.
pub(crate) struct SessionRuntime {
    pub ctrl_tx: mpsc::UnboundedSender<SessionControl>,
    pub shutdown_tx: watch::Sender<bool>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn the tail watcher and the processing task for one session.
///
/// All event-producing stages for the session run sequentially inside the
/// spawned task, which is what preserves per-session ordering end to end.
pub(crate) fn spawn_session(
    seed: PipelineSeed,
    hub: Arc<SessionHub>,
    store: Arc<StateStore>,
    handles: HandleMap,
) -> Result<SessionRuntime> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();

    let batch_rx = spawn_tail(
        seed.path.clone(),
        seed.offset,
        seed.coalesce_window,
        shutdown_rx,
    )?;

    let pipeline = Pipeline {
        session_id: seed.session_id,
        path: seed.path,
        offset: seed.offset,
        processor: LineProcessor::from_context(seed.context),
        idle_finalize: seed.idle_finalize,
        hub,
        store,
        handles,
        trackers: HashMap::new(),
    };

    let task = tokio::spawn(pipeline.run(batch_rx, ctrl_rx));

    Ok(SessionRuntime {
        ctrl_tx,
        shutdown_tx,
        task,
    })
}

struct Pipeline {
    session_id: SessionId,
    path: PathBuf,
    offset: u64,
    processor: LineProcessor,
    idle_finalize: Duration,
    hub: Arc<SessionHub>,
    store: Arc<StateStore>,
    handles: HandleMap,
    trackers: HashMap<Destination, TrackerSlot>,
}

struct TrackerSlot {
    tracker: TurnTracker,
    dispatch_tx: mpsc::UnboundedSender<DispatchAction>,
}

impl Pipeline {
    async fn run(
        mut self,
        mut batch_rx: mpsc::Receiver<WatchBatch>,
        mut ctrl_rx: mpsc::UnboundedReceiver<SessionControl>,
    ) {
        info!(session_id = %self.session_id, path = %self.path.display(), "session pipeline started");
        let mut idle_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                batch = batch_rx.recv() => match batch {
                    Some(WatchBatch::Lines { lines, new_offset }) => {
                        debug!(session_id = %self.session_id, lines = lines.len(), "processing batch");
                        for line in &lines {
                            for event in self.processor.process_raw(line) {
                                self.dispatch_event(event);
                            }
                        }
                        self.offset = new_offset;
                        self.persist();
                        idle_deadline = self.next_idle_deadline();
                    }
                    Some(WatchBatch::Truncated) => {
                        self.processor.clear_context();
                        self.dispatch_event(SessionEvent::ClearAll);
                        self.offset = 0;
                        self.persist();
                        idle_deadline = None;
                    }
                    None => break,
                },
                ctrl = ctrl_rx.recv() => match ctrl {
                    Some(SessionControl::AddDestination { destination, tracker, dispatch_tx }) => {
                        self.trackers.insert(destination, TrackerSlot { tracker, dispatch_tx });
                    }
                    Some(SessionControl::RemoveDestination { destination }) => {
                        self.trackers.remove(&destination);
                    }
                    Some(SessionControl::Shutdown { ack }) => {
                        self.persist();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.persist();
                        break;
                    }
                },
                _ = sleep_until_opt(idle_deadline), if idle_deadline.is_some() => {
                    for slot in self.trackers.values_mut() {
                        slot.tracker.on_idle();
                    }
                    idle_deadline = None;
                    self.persist();
                }
            }
        }

        debug!(session_id = %self.session_id, "session pipeline stopped");
    }

    /// Feed one event to the buffer, the SSE hub, and every tracker, in
    /// that order, then forward the resulting actions to the debouncers.
    fn dispatch_event(&mut self, event: SessionEvent) {
        self.hub.publish(event.clone());

        for slot in self.trackers.values_mut() {
            for action in slot.tracker.on_event(&event) {
                let _ = slot.dispatch_tx.send(action);
            }
        }
    }

    fn next_idle_deadline(&self) -> Option<Instant> {
        let any_open = self
            .trackers
            .values()
            .any(|slot| slot.tracker.has_open_turn());
        any_open.then(|| Instant::now() + self.idle_finalize)
    }

    /// Persist progress. Called at most once per processed batch, after
    /// the batch's actions were handed to the debouncers.
    fn persist(&self) {
        let handles: Vec<HandleRecord> = {
            let map = self.handles.lock().unwrap();
            map.iter()
                .filter(|((session, _, _), _)| session == &self.session_id)
                .map(|((_, destination, turn), handle)| HandleRecord {
                    destination: destination.clone(),
                    turn: *turn,
                    handle: handle.clone(),
                })
                .collect()
        };

        let state = SessionState {
            session_id: self.session_id.clone(),
            path: self.path.clone(),
            offset: self.offset,
            context: self.processor.context().clone(),
            trackers: self
                .trackers
                .values()
                .map(|slot| slot.tracker.clone())
                .collect(),
            handles,
            saved_at: chrono::Utc::now(),
        };

        if let Err(err) = self.store.save(&state) {
            // Processing continues in memory; the next successful write
            // covers whatever this one lost.
            error!(session_id = %self.session_id, error = %err, "state write failed");
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
