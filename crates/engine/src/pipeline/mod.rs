//! The execution pipeline: routing, connection gate, handler chain,
//! conversion, change detection and history.
//!
//! [`ContractRouter`] is the single entry point callers use. It never returns
//! an error: every failure is expressed as an [`ExecutionResult`] with
//! `success == false` and a [`FailureKind`] describing what went wrong.

mod convert;
mod history;

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use futures_util::FutureExt;
use relay_types::{
    ConnectOutcome, Contract, ContractHandler, Converter, ExecutionResult, FailureKind, HistoryEntry, MetaId, Provider,
    ProviderError, ProviderId, ResolvedCall,
};
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

pub use convert::{JsonConverter, convert_response};
pub use history::HistoryRing;

use crate::{
    config::RouterSettings,
    meta::MetaTable,
    provider::{ProviderRegistry, TypeProviderCache},
};

/// Shared pipeline state; only touched inside one short critical section per call.
struct PipelineState {
    responses: HashMap<MetaId, ExecutionResult>,
    history: HistoryRing,
    sequence_id: u64,
}

/// Routes contracts to providers and runs them through the execution pipeline.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct ContractRouter {
    settings: RouterSettings,
    meta: MetaTable,
    providers: ProviderRegistry,
    type_cache: TypeProviderCache,
    handlers: RwLock<Vec<Arc<dyn ContractHandler>>>,
    converter: Arc<dyn Converter>,
    state: Mutex<PipelineState>,
    changes: broadcast::Sender<ExecutionResult>,
    lifetime: CancellationToken,
}

impl std::fmt::Debug for ContractRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRouter")
            .field("settings", &self.settings)
            .field("registrations", &self.meta.len())
            .field("providers", &self.providers)
            .field("shut_down", &self.lifetime.is_cancelled())
            .finish()
    }
}

impl ContractRouter {
    /// Create a router over `meta` with no providers registered yet.
    pub fn new(settings: RouterSettings, meta: MetaTable) -> Self {
        let (changes, _) = broadcast::channel(settings.change_stream_capacity.max(1));
        Self {
            providers: ProviderRegistry::new(settings.default_provider, settings.prefer_default),
            type_cache: TypeProviderCache::new(),
            handlers: RwLock::new(Vec::new()),
            converter: Arc::new(JsonConverter::new()),
            state: Mutex::new(PipelineState {
                responses: HashMap::new(),
                history: HistoryRing::new(settings.history_capacity),
                sequence_id: 0,
            }),
            changes,
            lifetime: CancellationToken::new(),
            meta,
            settings,
        }
    }

    /// Replace the default converter used when a registration has none.
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn meta(&self) -> &MetaTable {
        &self.meta
    }

    /// Registry used to register providers and switch the default.
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Shorthand for `providers().register(id, provider)`.
    pub fn register_provider(&self, id: ProviderId, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        self.providers.register(id, provider)
    }

    /// Append a handler to the pre-execution chain.
    pub fn add_handler(&self, handler: impl ContractHandler + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Receive every result whose raw response differs from the previous one for its MetaId.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionResult> {
        self.changes.subscribe()
    }

    /// History entries, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock_state().history.entries()
    }

    /// History entry stored in ring slot `slot`.
    pub fn history_entry(&self, slot: usize) -> Option<HistoryEntry> {
        self.lock_state().history.get(slot).cloned()
    }

    /// Last result recorded for `meta_id`, successful or not.
    pub fn last_result(&self, meta_id: MetaId) -> Option<ExecutionResult> {
        self.lock_state().responses.get(&meta_id).cloned()
    }

    /// Number of pipeline completions recorded so far.
    pub fn sequence_id(&self) -> u64 {
        self.lock_state().sequence_id
    }

    /// Token cancelled by [`ContractRouter::shutdown`].
    pub fn lifetime_token(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Cancel in-flight calls and disconnect every provider.
    pub async fn shutdown(&self) -> Vec<(ProviderId, ConnectOutcome)> {
        info!(providers = self.providers.len(), "contract router shutting down");
        self.lifetime.cancel();
        self.providers.disconnect_all().await
    }

    /// Execute `contract` bound to the router's lifetime.
    pub async fn send(&self, contract: Contract) -> ExecutionResult {
        self.execute(contract, &self.lifetime).await
    }

    /// Look up the registration and provider for `contract`, then run it.
    pub async fn execute(&self, contract: Contract, cancel: &CancellationToken) -> ExecutionResult {
        let registration = self.meta.find_by_contract(&contract);
        let selection = self.providers.select(&registration, &contract);
        let contract_name = contract.path.clone();

        let mut call = ResolvedCall::new(registration, contract).with_contract_name(contract_name);
        if let Some(selection) = selection {
            debug!(
                contract = %call.contract.path,
                provider = %selection.id,
                source = ?selection.source,
                "provider selected"
            );
            call = call.with_provider(selection.provider);
        }
        self.execute_resolved(call, cancel).await
    }

    /// Run an already resolved call through the pipeline.
    ///
    /// Cancelling `cancel` or shutting the router down stops the call at the
    /// next gate; the provider sees the same token.
    pub async fn execute_resolved(&self, mut call: ResolvedCall, cancel: &CancellationToken) -> ExecutionResult {
        let contract_name = call
            .contract_name
            .get_or_insert_with(|| call.registration.method.clone())
            .clone();
        let contract_id = call.contract.path.clone();
        let meta_id = call.meta_id;

        let (token, _guard) = self.link_cancellation(cancel);
        match AssertUnwindSafe(self.run_pipeline(call, &contract_name, &token))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(contract = %contract_name, meta_id = %meta_id, error = %message, "provider panicked during execution");
                ExecutionResult::empty()
                    .for_contract(contract_id, meta_id)
                    .with_failure(FailureKind::ProviderExecutionFault)
            }
        }
    }

    async fn run_pipeline(&self, mut call: ResolvedCall, contract_name: &str, token: &CancellationToken) -> ExecutionResult {
        let meta_id = call.meta_id;
        let empty = |failure: FailureKind, path: &str| ExecutionResult::empty().for_contract(path, meta_id).with_failure(failure);

        let provider = match call.provider.clone() {
            Some(provider) => provider,
            None => match self.type_cache.resolve_by_type(&call.contract, &self.meta, &self.providers) {
                Some(provider) => {
                    call.provider = Some(Arc::clone(&provider));
                    provider
                }
                None => {
                    warn!(contract = %contract_name, meta_id = %meta_id, "no provider registered for contract");
                    return empty(FailureKind::NoProvider, &call.contract.path);
                }
            },
        };

        if token.is_cancelled() {
            return empty(FailureKind::Cancelled, &call.contract.path);
        }

        if !provider.state().is_connected() {
            let outcome = provider.connect(token).await;
            if !outcome.success {
                warn!(
                    contract = %contract_name,
                    provider = %provider.name(),
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "provider connection failed"
                );
                return empty(FailureKind::ConnectionFailure, &call.contract.path);
            }
            debug!(provider = %provider.name(), "provider connected");
        }

        if !provider.supports(&call.contract) {
            debug!(contract = %contract_name, provider = %provider.name(), "provider does not support contract");
            return ExecutionResult::unsupported().for_contract(call.contract.path.clone(), meta_id);
        }

        let handlers: Vec<Arc<dyn ContractHandler>> = self.handlers.read().unwrap_or_else(PoisonError::into_inner).clone();
        call.contract = handlers
            .iter()
            .fold(call.contract, |contract, handler| handler.update_contract(contract));

        if token.is_cancelled() {
            return empty(FailureKind::Cancelled, &call.contract.path);
        }

        let raw = match provider.execute(&call, token).await {
            Ok(raw) => raw,
            Err(ProviderError::Cancelled) => {
                debug!(contract = %contract_name, provider = %provider.name(), "execution cancelled");
                return empty(FailureKind::Cancelled, &call.contract.path);
            }
            Err(error) => {
                warn!(contract = %contract_name, provider = %provider.name(), error = %error, "provider execution failed");
                return empty(FailureKind::ProviderExecutionFault, &call.contract.path);
            }
        };

        let result = convert_response(&call, raw, self.converter.as_ref());
        self.record(result.clone(), contract_name);
        result
    }

    /// Update the response cache and sequence, then publish and log the result when it changed.
    fn record(&self, result: ExecutionResult, contract_name: &str) {
        let mut state = self.lock_state();
        let changed = state
            .responses
            .get(&result.meta_id)
            .is_none_or(|previous| previous.change_hash != result.change_hash);
        state.sequence_id += 1;
        let sequence_id = state.sequence_id;
        state.responses.insert(result.meta_id, result.clone());

        if changed && result.success {
            state.history.push(sequence_id, result.clone());
            // Sent under the lock so subscribers observe sequence order.
            let receivers = self.changes.send(result).unwrap_or(0);
            debug!(contract = %contract_name, sequence_id, receivers, "change published");
        } else {
            debug!(contract = %contract_name, sequence_id, changed, "result recorded");
        }
    }

    /// Child of the lifetime token that is also cancelled when `cancel` fires.
    fn link_cancellation(&self, cancel: &CancellationToken) -> (CancellationToken, DropGuard) {
        let linked = self.lifetime.child_token();
        if cancel.is_cancelled() {
            linked.cancel();
        } else {
            let caller = cancel.clone();
            let watched = linked.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => watched.cancel(),
                    _ = watched.cancelled() => {}
                }
            });
        }
        (linked.clone(), linked.drop_guard())
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
