use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::publish::{PublishError, Publisher};
use tracecast_engine::{ActionKind, DispatchAction};
use tracecast_types::{Destination, MessageHandle, SessionId};

/// Identity of one turn's message across the whole service.
pub type HandleKey = (SessionId, Destination, u64);

/// Turn-to-message bindings, written by dispatcher workers and read by the
/// session tasks at persist time.
pub type HandleMap = Arc<Mutex<HashMap<HandleKey, MessageHandle>>>;

/// Timing and budget knobs for one destination's dispatcher.
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Minimum gap between edits of the same message
    pub min_edit_gap: Duration,
    /// Budget over all API calls for this destination: at most
    /// `rate_limit_ops` in any sliding `rate_window`
    pub rate_limit_ops: u32,
    pub rate_window: Duration,
    /// Transient-failure retry policy
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl DebounceConfig {
    pub fn for_destination(config: &DispatchConfig, destination: &Destination) -> Self {
        Self {
            min_edit_gap: config.edit_gap(destination.kind()),
            rate_limit_ops: config.rate_limit_ops,
            rate_window: config.rate_window(),
            retry_max_attempts: config.retry_max_attempts,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }
}

/// A running per-destination dispatcher task.
pub(crate) struct Dispatcher {
    pub tx: mpsc::UnboundedSender<DispatchAction>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn the dispatcher worker for one destination.
///
/// Actions arrive in tracker order and execute FIFO per turn: a turn's
/// `Send` always completes (or permanently fails) before its edits run.
/// Queued edits for the same turn coalesce to the newest payload; nothing
/// is dropped by rate control, excess work just waits.
pub(crate) fn spawn_dispatcher(
    destination: Destination,
    publisher: Arc<dyn Publisher>,
    config: DebounceConfig,
    handles: HandleMap,
) -> Dispatcher {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Worker {
        destination,
        publisher,
        limiter: RateLimiter::new(config.rate_limit_ops, config.rate_window),
        config,
        handles,
        queue: VecDeque::new(),
        last_edit: HashMap::new(),
        failed_sends: HashSet::new(),
    };
    let task = tokio::spawn(worker.run(rx));
    Dispatcher { tx, task }
}

struct Worker {
    destination: Destination,
    publisher: Arc<dyn Publisher>,
    config: DebounceConfig,
    handles: HandleMap,
    limiter: RateLimiter,
    queue: VecDeque<DispatchAction>,
    last_edit: HashMap<(SessionId, u64), Instant>,
    failed_sends: HashSet<(SessionId, u64)>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DispatchAction>) {
        let mut closed = false;

        loop {
            // Pull in everything already waiting so edits coalesce.
            loop {
                match rx.try_recv() {
                    Ok(action) => self.enqueue(action),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }

            let Some(front) = self.queue.front().cloned() else {
                if closed {
                    break;
                }
                match rx.recv().await {
                    Some(action) => {
                        self.enqueue(action);
                        continue;
                    }
                    None => break,
                }
            };

            if let Some(delay) = self.eligibility_wait(&front) {
                if closed {
                    tokio::time::sleep(delay).await;
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        incoming = rx.recv() => match incoming {
                            Some(action) => self.enqueue(action),
                            None => closed = true,
                        }
                    }
                }
                continue;
            }

            let action = self.queue.pop_front().expect("front checked above");
            self.execute(action).await;
        }
    }

    fn enqueue(&mut self, action: DispatchAction) {
        if action.kind == ActionKind::Edit
            && let Some(existing) = self.queue.iter_mut().find(|queued| {
                queued.kind == ActionKind::Edit
                    && queued.session == action.session
                    && queued.turn == action.turn
            })
        {
            // Only the latest payload for a pending edit matters.
            existing.text = action.text;
            return;
        }
        self.queue.push_back(action);
    }

    /// How long the front action must still wait, or None when it may run
    /// now (in which case a rate token has been consumed).
    fn eligibility_wait(&mut self, action: &DispatchAction) -> Option<Duration> {
        let mut wait = Duration::ZERO;

        if action.kind == ActionKind::Edit
            && let Some(last) = self.last_edit.get(&(action.session.clone(), action.turn))
        {
            let gap_until = *last + self.config.min_edit_gap;
            let now = Instant::now();
            if gap_until > now {
                wait = wait.max(gap_until - now);
            }
        }

        wait = wait.max(self.limiter.wait_time());

        if wait > Duration::ZERO {
            return Some(wait);
        }

        self.limiter.record();
        None
    }

    async fn execute(&mut self, action: DispatchAction) {
        let turn_key = (action.session.clone(), action.turn);

        match action.kind {
            ActionKind::Send => {
                let result = with_retries(&mut self.limiter, &self.config, || {
                    self.publisher.send(&self.destination, &action.text)
                })
                .await;

                match result {
                    Ok(handle) => {
                        self.handles.lock().unwrap().insert(
                            (
                                action.session.clone(),
                                self.destination.clone(),
                                action.turn,
                            ),
                            handle,
                        );
                        self.last_edit.insert(turn_key, Instant::now());
                    }
                    Err(err) => {
                        warn!(
                            destination = %self.destination,
                            turn = action.turn,
                            error = %err,
                            "send failed; freezing turn without a message"
                        );
                        self.failed_sends.insert(turn_key);
                    }
                }
            }
            ActionKind::Edit => {
                if self.failed_sends.contains(&turn_key) {
                    debug!(turn = action.turn, "dropping edit for failed send");
                    return;
                }

                let handle = self
                    .handles
                    .lock()
                    .unwrap()
                    .get(&(
                        action.session.clone(),
                        self.destination.clone(),
                        action.turn,
                    ))
                    .cloned();

                let Some(handle) = handle else {
                    warn!(turn = action.turn, "edit without a message handle; dropping");
                    return;
                };

                let result = with_retries(&mut self.limiter, &self.config, || {
                    self.publisher.edit(&self.destination, &handle, &action.text)
                })
                .await;

                match result {
                    Ok(()) => {
                        self.last_edit.insert(turn_key, Instant::now());
                    }
                    Err(err) => {
                        // The message keeps its last published text.
                        warn!(
                            destination = %self.destination,
                            turn = action.turn,
                            error = %err,
                            "edit failed; message left as-is"
                        );
                    }
                }
            }
        }
    }
}

/// Run one API call with exponential backoff on transient failures.
///
/// Every retry attempt consumes a rate slot of its own; the first
/// attempt's slot was taken by the eligibility check.
async fn with_retries<T, F, Fut>(
    limiter: &mut RateLimiter,
    config: &DebounceConfig,
    mut op: F,
) -> Result<T, PublishError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PublishError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < config.retry_max_attempts => {
                let exponent = attempt.saturating_sub(1).min(16);
                let backoff = config
                    .retry_base_delay
                    .saturating_mul(1 << exponent)
                    .min(config.retry_max_delay);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying publish");
                tokio::time::sleep(backoff).await;

                let rate_wait = limiter.wait_time();
                if rate_wait > Duration::ZERO {
                    tokio::time::sleep(rate_wait).await;
                }
                limiter.record();

                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Sliding-window rate limiter: at most `ops` calls in any window of
/// `window`, measured over a log of recent call times.
struct RateLimiter {
    ops: usize,
    window: Duration,
    calls: VecDeque<Instant>,
}

impl RateLimiter {
    fn new(ops: u32, window: Duration) -> Self {
        Self {
            ops: ops.max(1) as usize,
            window,
            calls: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_time(&mut self) -> Duration {
        let now = Instant::now();
        self.prune(now);
        if self.calls.len() < self.ops {
            Duration::ZERO
        } else {
            let oldest = *self.calls.front().expect("len checked above");
            (oldest + self.window).saturating_duration_since(now)
        }
    }

    fn record(&mut self) {
        let now = Instant::now();
        self.prune(now);
        self.calls.push_back(now);
    }
}
