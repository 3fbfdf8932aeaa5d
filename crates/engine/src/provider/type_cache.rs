use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use relay_types::{Contract, ContractKind, Provider, ProviderId};
use tracing::debug;

use super::registry::ProviderRegistry;
use crate::meta::MetaTable;

#[derive(Default)]
struct CacheState {
    generation: u64,
    entries: HashMap<ContractKind, (ProviderId, Arc<dyn Provider>)>,
}

/// Memoized provider resolution keyed by contract kind.
///
/// Entries are dropped wholesale whenever the registry generation moves.
#[derive(Default)]
pub struct TypeProviderCache {
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for TypeProviderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TypeProviderCache")
            .field("generation", &state.generation)
            .field("kinds", &state.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the provider serving contracts of `contract`'s kind.
    ///
    /// On a miss the registration is looked up in `table` and the registry's
    /// selection order applied; the outcome is cached until the registry changes.
    pub fn resolve_by_type(
        &self,
        contract: &Contract,
        table: &MetaTable,
        registry: &ProviderRegistry,
    ) -> Option<Arc<dyn Provider>> {
        let generation = registry.generation();
        {
            let mut state = self.lock();
            if state.generation != generation {
                state.entries.clear();
                state.generation = generation;
            }
            if let Some((_, provider)) = state.entries.get(&contract.kind) {
                return Some(Arc::clone(provider));
            }
        }

        let registration = table.find_by_contract(contract);
        let selection = registry.select(&registration, contract)?;
        debug!(
            contract = %contract.kind,
            provider = %selection.id,
            source = ?selection.source,
            "provider resolved by contract type"
        );

        let mut state = self.lock();
        // A registry change during resolution makes this selection stale; skip caching it.
        if state.generation == generation {
            state
                .entries
                .insert(contract.kind.clone(), (selection.id, Arc::clone(&selection.provider)));
        }
        Some(selection.provider)
    }

    /// Provider id cached for `kind`, if any.
    pub fn cached(&self, kind: &ContractKind) -> Option<ProviderId> {
        self.lock().entries.get(kind).map(|(id, _)| *id)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
