//! Provider contract consumed by the router, plus connection state types.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{contract::Contract, meta::MetaRegistration, result::RawResult, MetaId};

/// Integer key a provider is registered under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub u32);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state of a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed.
    Faulted,
}

impl ConnectionState {
    pub fn display(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Faulted => "Faulted",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Outcome of a connect or disconnect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub state: ConnectionState,
}

impl ConnectOutcome {
    pub fn connected() -> Self {
        Self {
            success: true,
            error: None,
            state: ConnectionState::Connected,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            success: true,
            error: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            state: ConnectionState::Faulted,
        }
    }
}

/// Errors a provider raises while executing a contract.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider is not connected: {name}")]
    NotConnected { name: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn not_connected(name: impl Into<String>) -> Self {
        Self::NotConnected { name: name.into() }
    }
}

/// A pluggable transport able to serve contracts.
///
/// Implementations manage their own connection state with interior
/// mutability; the router only observes it through [`Provider::state`] and
/// drives it through `connect`/`disconnect`. Cancellation is cooperative: the
/// token is handed to the provider, which should stop its transport I/O
/// promptly once it fires.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name used in logs.
    fn name(&self) -> &str;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    async fn connect(&self, cancel: &CancellationToken) -> ConnectOutcome;

    async fn disconnect(&self) -> ConnectOutcome;

    /// Whether this provider can serve `contract`.
    fn supports(&self, contract: &Contract) -> bool;

    /// Execute the resolved call and return the raw result.
    async fn execute(&self, call: &ResolvedCall, cancel: &CancellationToken) -> Result<RawResult, ProviderError>;
}

/// Per-invocation bundle handed through the pipeline.
#[derive(Clone)]
pub struct ResolvedCall {
    pub meta_id: MetaId,
    pub registration: Arc<MetaRegistration>,
    pub contract: Contract,
    /// Provider chosen up front; resolved by contract kind when absent.
    pub provider: Option<Arc<dyn Provider>>,
    /// Name used in logs; defaults to the registration's method.
    pub contract_name: Option<String>,
}

impl ResolvedCall {
    /// Build a call for `contract` under `registration` with no provider attached.
    pub fn new(registration: Arc<MetaRegistration>, contract: Contract) -> Self {
        Self {
            meta_id: registration.id,
            registration,
            contract,
            provider: None,
            contract_name: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_contract_name(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }
}

impl fmt::Debug for ResolvedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCall")
            .field("meta_id", &self.meta_id)
            .field("contract", &self.contract)
            .field("provider", &self.provider.as_ref().map(|provider| provider.name().to_string()))
            .field("contract_name", &self.contract_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_outcomes_report_state() {
        assert!(ConnectOutcome::connected().state.is_connected());
        let failed = ConnectOutcome::failed("refused");
        assert!(!failed.success);
        assert_eq!(failed.state, ConnectionState::Faulted);
        assert_eq!(failed.error.as_deref(), Some("refused"));
    }

    #[test]
    fn resolved_call_inherits_registration_id() {
        let registration = Arc::new(MetaRegistration::new("profile/get", Contract::new("GetProfile", "profile/get")));
        let call = ResolvedCall::new(Arc::clone(&registration), Contract::new("GetProfile", "profile/get"));
        assert_eq!(call.meta_id, registration.id);
        assert!(call.provider.is_none());
    }
}
