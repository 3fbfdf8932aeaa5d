//! In-process bridge: contracts are handed to a host task over a channel.

use std::sync::{Mutex, PoisonError};

use relay_types::{ConnectOutcome, ConnectionState, Contract, ContractKind, Provider, ProviderError, RawResult, ResolvedCall};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One contract awaiting an answer from the host.
#[derive(Debug)]
pub struct BridgeRequest {
    pub contract: Contract,
    reply: oneshot::Sender<RawResult>,
}

impl BridgeRequest {
    /// Send the host's answer back to the waiting provider.
    ///
    /// Returns `false` when the caller stopped waiting.
    pub fn respond(self, result: RawResult) -> bool {
        self.reply.send(result).is_ok()
    }
}

/// Receiving side of a bridge, owned by the host task.
#[derive(Debug)]
pub struct BridgeHost {
    receiver: mpsc::Receiver<BridgeRequest>,
}

impl BridgeHost {
    pub async fn recv(&mut self) -> Option<BridgeRequest> {
        self.receiver.recv().await
    }

    /// Answer every request with `handler` until the provider side is dropped.
    pub async fn serve<F>(mut self, mut handler: F)
    where
        F: FnMut(&Contract) -> RawResult,
    {
        while let Some(request) = self.receiver.recv().await {
            let result = handler(&request.contract);
            if !request.respond(result) {
                debug!("bridge caller went away before the reply");
            }
        }
    }
}

/// Provider forwarding contracts to a [`BridgeHost`].
#[derive(Debug)]
pub struct BridgeProvider {
    name: String,
    kinds: Option<Vec<ContractKind>>,
    sender: mpsc::Sender<BridgeRequest>,
    state: Mutex<ConnectionState>,
}

impl BridgeProvider {
    /// Create a provider and the host end it talks to.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, BridgeHost) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let provider = Self {
            name: name.into(),
            kinds: None,
            sender,
            state: Mutex::new(ConnectionState::Disconnected),
        };
        (provider, BridgeHost { receiver })
    }

    pub fn with_kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ContractKind>,
    {
        self.kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[async_trait::async_trait]
impl Provider for BridgeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        let state = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_connected() && self.sender.is_closed() {
            ConnectionState::Faulted
        } else {
            state
        }
    }

    async fn connect(&self, _cancel: &CancellationToken) -> ConnectOutcome {
        if self.sender.is_closed() {
            self.set_state(ConnectionState::Faulted);
            return ConnectOutcome::failed("bridge host is not running");
        }
        self.set_state(ConnectionState::Connected);
        ConnectOutcome::connected()
    }

    async fn disconnect(&self) -> ConnectOutcome {
        self.set_state(ConnectionState::Disconnected);
        ConnectOutcome::disconnected()
    }

    fn supports(&self, contract: &Contract) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&contract.kind))
    }

    async fn execute(&self, call: &ResolvedCall, cancel: &CancellationToken) -> Result<RawResult, ProviderError> {
        if !self.state().is_connected() {
            return Err(ProviderError::not_connected(self.name.clone()));
        }

        let (reply, answer) = oneshot::channel();
        let request = BridgeRequest {
            contract: call.contract.clone(),
            reply,
        };
        tokio::select! {
            sent = self.sender.send(request) => sent.map_err(|_| ProviderError::transport("bridge host closed"))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        }
        tokio::select! {
            result = answer => result.map_err(|_| ProviderError::transport("bridge host dropped the request")),
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        }
    }
}
