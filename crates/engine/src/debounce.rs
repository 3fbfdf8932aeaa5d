//! Coalesces bursts of calls to the same contract path into shared executions.
//!
//! Each path owns a small state machine. A submission records its contract as
//! the path's pending contract and sleeps for the path interval unless the
//! last execution is already older than the interval. When a sleeper wakes it
//! either joins an execution window opened after its own submission or opens a
//! new window running the latest pending contract. Every caller joining a
//! window receives the same result.
//!
//! A burst that keeps arriving for longer than the interval produces one
//! execution roughly per interval, not one in total.
//!
//! A cancelled submission withdraws its contract, so a window never runs it.
//! Path state is dropped once a path has no waiters, no subscribers and no
//! interval override, and its last execution is older than the interval.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use relay_types::{Contract, ExecutionResult, FailureKind, MetaId};
use tokio::{sync::broadcast, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ContractRouter;

type SharedResult = Shared<BoxFuture<'static, ExecutionResult>>;

#[derive(Clone)]
struct Window {
    opened_at: Instant,
    result: SharedResult,
}

struct PathState {
    interval: Duration,
    last_execution: Instant,
    /// Live submissions in arrival order, tagged with their ticket.
    pending: Vec<(u64, Contract)>,
    next_ticket: u64,
    /// Callers still sleeping before they join or open a window.
    waiters: usize,
    window: Option<Window>,
    events: broadcast::Sender<ExecutionResult>,
}

impl PathState {
    fn new(interval: Duration, stream_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(stream_capacity.max(1));
        Self {
            interval,
            last_execution: Instant::now(),
            pending: Vec::new(),
            next_ticket: 0,
            waiters: 0,
            window: None,
            events,
        }
    }

    fn enqueue(&mut self, contract: Contract) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.push((ticket, contract));
        self.waiters += 1;
        ticket
    }

    fn withdraw(&mut self, ticket: u64) {
        self.pending.retain(|(pending, _)| *pending != ticket);
        self.waiters = self.waiters.saturating_sub(1);
    }

    fn is_idle(&self, now: Instant, default_interval: Duration) -> bool {
        self.waiters == 0
            && self.pending.is_empty()
            && self.interval == default_interval
            && self.events.receiver_count() == 0
            && now.duration_since(self.last_execution) >= self.interval
    }
}

/// Debounce wrapper around a shared [`ContractRouter`].
pub struct Debouncer {
    router: Arc<ContractRouter>,
    default_interval: Duration,
    stream_capacity: usize,
    paths: Mutex<HashMap<String, PathState>>,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("default_interval", &self.default_interval)
            .field("paths", &self.lock().len())
            .finish()
    }
}

impl Debouncer {
    /// Wrap `router` using its configured debounce interval.
    pub fn new(router: Arc<ContractRouter>) -> Self {
        let interval = router.settings().debounce_interval();
        Self::with_interval(router, interval)
    }

    pub fn with_interval(router: Arc<ContractRouter>, default_interval: Duration) -> Self {
        let stream_capacity = router.settings().change_stream_capacity;
        Self {
            router,
            default_interval,
            stream_capacity,
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &Arc<ContractRouter> {
        &self.router
    }

    /// Override the interval for `path`.
    pub fn set_interval(&self, path: &str, interval: Duration) {
        self.with_state(path, |state| state.interval = interval);
    }

    /// Interval in effect for `path`.
    pub fn interval(&self, path: &str) -> Duration {
        self.lock()
            .get(path)
            .map_or(self.default_interval, |state| state.interval)
    }

    /// Receive every result produced by an execution window on `path`.
    pub fn subscribe(&self, path: &str) -> broadcast::Receiver<ExecutionResult> {
        self.with_state(path, |state| state.events.subscribe())
    }

    /// Submit `contract`, returning the result of the window it ends up in.
    pub async fn submit(&self, contract: Contract, cancel: &CancellationToken) -> ExecutionResult {
        let path = contract.path.clone();
        let submitted_at = Instant::now();
        let (ticket, delay) = {
            let mut paths = self.lock();
            self.prune_idle(&mut paths, &path, submitted_at);
            let state = self.state_entry(&mut paths, &path);
            let ticket = state.enqueue(contract);
            let delay = if submitted_at.duration_since(state.last_execution) >= state.interval {
                Duration::ZERO
            } else {
                state.interval
            };
            (ticket, delay)
        };
        debug!(contract = %path, ticket, delay_ms = delay.as_millis() as u64, "debounced call scheduled");
        self.run_scheduled(&path, ticket, submitted_at, delay, cancel).await
    }

    /// Number of paths currently holding debounce state.
    pub fn tracked_paths(&self) -> usize {
        self.lock().len()
    }

    async fn run_scheduled(
        &self,
        path: &str,
        ticket: u64,
        submitted_at: Instant,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let cancelled = if delay.is_zero() {
            cancel.is_cancelled()
        } else {
            tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = cancel.cancelled() => true,
            }
        };
        if cancelled {
            if let Some(state) = self.lock().get_mut(path) {
                state.withdraw(ticket);
            }
            debug!(contract = %path, ticket, "debounced call cancelled");
            return ExecutionResult::empty()
                .for_contract(path, MetaId::UNRESOLVED)
                .with_failure(FailureKind::Cancelled);
        }

        let window = {
            let mut paths = self.lock();
            let Some(state) = paths.get_mut(path) else {
                return ExecutionResult::empty().for_contract(path, MetaId::UNRESOLVED);
            };
            state.waiters = state.waiters.saturating_sub(1);
            let now = Instant::now();
            let joinable = state
                .window
                .as_ref()
                .filter(|window| window.opened_at >= submitted_at && now.duration_since(window.opened_at) <= state.interval)
                .map(|window| window.result.clone());

            match joinable {
                Some(result) => {
                    debug!(contract = %path, "joined open debounce window");
                    result
                }
                None => {
                    let Some((_, contract)) = state.pending.pop() else {
                        debug!(contract = %path, "nothing pending after debounce");
                        return ExecutionResult::empty().for_contract(path, MetaId::UNRESOLVED);
                    };
                    state.pending.clear();
                    state.last_execution = now;
                    let result = self.open_window(contract, state.events.clone());
                    state.window = Some(Window {
                        opened_at: now,
                        result: result.clone(),
                    });
                    debug!(contract = %path, "debounce window opened");
                    result
                }
            }
        };

        window.await
    }

    fn open_window(&self, contract: Contract, events: broadcast::Sender<ExecutionResult>) -> SharedResult {
        let router = Arc::clone(&self.router);
        async move {
            let result = router.send(contract).await;
            let _ = events.send(result.clone());
            result
        }
        .boxed()
        .shared()
    }

    fn with_state<T>(&self, path: &str, f: impl FnOnce(&mut PathState) -> T) -> T {
        let mut paths = self.lock();
        f(self.state_entry(&mut paths, path))
    }

    fn state_entry<'a>(&self, paths: &'a mut HashMap<String, PathState>, path: &str) -> &'a mut PathState {
        paths
            .entry(path.to_string())
            .or_insert_with(|| PathState::new(self.default_interval, self.stream_capacity))
    }

    fn prune_idle(&self, paths: &mut HashMap<String, PathState>, keep: &str, now: Instant) {
        let before = paths.len();
        paths.retain(|path, state| path == keep || !state.is_idle(now, self.default_interval));
        let pruned = before - paths.len();
        if pruned > 0 {
            debug!(pruned, remaining = paths.len(), "idle debounce paths dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PathState>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
