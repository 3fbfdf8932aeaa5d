//! Scripted in-memory provider.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use relay_types::{ConnectOutcome, ConnectionState, Contract, ContractKind, Provider, ProviderError, RawResult, ResolvedCall};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Scripted misbehavior of [`MockProvider::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFault {
    /// Return `ProviderError::Transport` with this message.
    Error(String),
    /// Panic with this message.
    Panic(String),
}

#[derive(Default)]
struct MockState {
    connection: ConnectionState,
    responses: HashMap<String, RawResult>,
    fallback: Option<RawResult>,
    fault: Option<MockFault>,
    executed: Vec<Contract>,
}

/// Provider answering from a `path -> RawResult` table.
///
/// Supports every contract kind unless restricted with
/// [`MockProvider::with_kinds`]. Unknown paths answer with the fallback
/// response, or with a failed result carrying status 404.
pub struct MockProvider {
    name: String,
    kinds: Option<HashSet<ContractKind>>,
    connect_failure: Option<String>,
    latency: Option<Duration>,
    state: Mutex<MockState>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    executions: AtomicUsize,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("executions", &self.execution_count())
            .finish()
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kinds: None,
            connect_failure: None,
            latency: None,
            state: Mutex::new(MockState::default()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        }
    }

    /// Only support contracts of these kinds.
    pub fn with_kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ContractKind>,
    {
        self.kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_response(self, path: impl Into<String>, response: RawResult) -> Self {
        self.set_response(path, response);
        self
    }

    /// Response for paths without an entry.
    pub fn with_fallback(self, response: RawResult) -> Self {
        self.lock().fallback = Some(response);
        self
    }

    /// Make every connect attempt fail with `error`.
    pub fn with_connect_failure(mut self, error: impl Into<String>) -> Self {
        self.connect_failure = Some(error.into());
        self
    }

    /// Sleep this long before answering each execution.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_fault(self, fault: MockFault) -> Self {
        self.set_fault(Some(fault));
        self
    }

    /// Replace the response for `path`.
    pub fn set_response(&self, path: impl Into<String>, response: RawResult) {
        self.lock().responses.insert(path.into(), response);
    }

    pub fn set_fault(&self, fault: Option<MockFault>) {
        self.lock().fault = fault;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Contract of the most recent execution, as the provider received it.
    pub fn last_contract(&self) -> Option<Contract> {
        self.lock().executed.last().cloned()
    }

    pub fn executed_contracts(&self) -> Vec<Contract> {
        self.lock().executed.clone()
    }

    fn set_connection(&self, connection: ConnectionState) {
        self.lock().connection = connection;
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        self.lock().connection
    }

    async fn connect(&self, cancel: &CancellationToken) -> ConnectOutcome {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            self.set_connection(ConnectionState::Disconnected);
            return ConnectOutcome::failed("connect cancelled");
        }
        self.set_connection(ConnectionState::Connecting);
        match &self.connect_failure {
            Some(error) => {
                self.set_connection(ConnectionState::Faulted);
                ConnectOutcome::failed(error.clone())
            }
            None => {
                self.set_connection(ConnectionState::Connected);
                ConnectOutcome::connected()
            }
        }
    }

    async fn disconnect(&self) -> ConnectOutcome {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connection(ConnectionState::Disconnected);
        ConnectOutcome::disconnected()
    }

    fn supports(&self, contract: &Contract) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&contract.kind))
    }

    async fn execute(&self, call: &ResolvedCall, cancel: &CancellationToken) -> Result<RawResult, ProviderError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let path = &call.contract.path;
        debug!(provider = %self.name, contract = %path, "mock execution");

        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
        }

        let (fault, response) = {
            let mut state = self.lock();
            state.executed.push(call.contract.clone());
            let response = state.responses.get(path).or(state.fallback.as_ref()).cloned();
            (state.fault.clone(), response)
        };

        match fault {
            Some(MockFault::Error(message)) => return Err(ProviderError::transport(message)),
            Some(MockFault::Panic(message)) => panic!("{message}"),
            None => {}
        }

        Ok(response.unwrap_or_else(|| RawResult::failed(format!("no response for '{path}'")).with_status(404)))
    }
}
