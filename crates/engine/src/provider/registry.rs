use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::join_all;
use indexmap::IndexMap;
use relay_types::{ConnectOutcome, Contract, MetaRegistration, Provider, ProviderId};
use tracing::{debug, info, warn};

use super::selection::{ProviderSelection, select_provider};

struct RegistryState {
    providers: IndexMap<ProviderId, Arc<dyn Provider>>,
    default_id: ProviderId,
    prefer_default: bool,
}

/// Providers keyed by id, kept in registration order, plus the default-provider policy.
///
/// Every mutation bumps a generation counter so memoized routing (see
/// [`super::TypeProviderCache`]) can tell when its entries went stale.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    generation: AtomicU64,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ProviderRegistry")
            .field("providers", &state.providers.keys().collect::<Vec<_>>())
            .field("default_id", &state.default_id)
            .field("prefer_default", &state.prefer_default)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(default_id: ProviderId, prefer_default: bool) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                providers: IndexMap::new(),
                default_id,
                prefer_default,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Register `provider` under `id`, returning the provider it replaced.
    ///
    /// Replacing keeps the original registration position.
    pub fn register(&self, id: ProviderId, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        let name = provider.name().to_string();
        let replaced = self.write(|state| state.providers.insert(id, provider));
        info!(provider = %id, name = %name, replaced = replaced.is_some(), "provider registered");
        replaced
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn Provider>> {
        self.read(|state| state.providers.get(&id).cloned())
    }

    /// Make `id` the default provider.
    pub fn switch_default(&self, id: ProviderId) {
        let previous = self.write(|state| std::mem::replace(&mut state.default_id, id));
        debug!(from = %previous, to = %id, "default provider switched");
    }

    pub fn set_prefer_default(&self, prefer_default: bool) {
        self.write(|state| state.prefer_default = prefer_default);
    }

    pub fn default_id(&self) -> ProviderId {
        self.read(|state| state.default_id)
    }

    pub fn prefer_default(&self) -> bool {
        self.read(|state| state.prefer_default)
    }

    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.read(|state| state.providers.get(&state.default_id).cloned())
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.read(|state| state.providers.keys().copied().collect())
    }

    /// Snapshot of the registered providers in registration order.
    pub fn providers(&self) -> Vec<(ProviderId, Arc<dyn Provider>)> {
        self.read(|state| {
            state
                .providers
                .iter()
                .map(|(id, provider)| (*id, Arc::clone(provider)))
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.read(|state| state.providers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Choose the provider for `contract` under `registration`.
    ///
    /// Runs against a snapshot so `Provider::supports` is called without the lock held.
    pub fn select(&self, registration: &MetaRegistration, contract: &Contract) -> Option<ProviderSelection> {
        let (providers, default_id, prefer_default) =
            self.read(|state| (state.providers.clone(), state.default_id, state.prefer_default));
        select_provider(&providers, default_id, prefer_default, registration, contract)
    }

    /// Disconnect every registered provider, returning each outcome.
    pub async fn disconnect_all(&self) -> Vec<(ProviderId, ConnectOutcome)> {
        let providers = self.providers();
        let outcomes = join_all(providers.iter().map(|(_, provider)| provider.disconnect())).await;
        providers
            .into_iter()
            .zip(outcomes)
            .map(|((id, provider), outcome)| {
                if !outcome.success {
                    warn!(provider = %id, name = %provider.name(), error = ?outcome.error, "provider disconnect failed");
                }
                (id, outcome)
            })
            .collect()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn read<T>(&self, f: impl FnOnce(&RegistryState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut RegistryState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let output = f(&mut state);
        self.generation.fetch_add(1, Ordering::AcqRel);
        output
    }
}
