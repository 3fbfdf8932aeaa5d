use std::sync::Arc;

use indexmap::IndexMap;
use relay_types::{Contract, MetaRegistration, Provider, ProviderId};
use tracing::warn;

/// Which rule picked a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    /// The registration names its provider.
    Override,
    /// `prefer_default` is on and the default provider supports the contract.
    PreferredDefault,
    /// First registered provider reporting support.
    Scan,
    /// Nothing claimed the contract; the default provider is used as is.
    Fallback,
}

/// A provider chosen for a contract together with the rule that chose it.
#[derive(Clone)]
pub struct ProviderSelection {
    pub id: ProviderId,
    pub provider: Arc<dyn Provider>,
    pub source: SelectionSource,
}

impl std::fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("source", &self.source)
            .finish()
    }
}

/// Pick the provider serving `contract` under `registration`.
///
/// Precedence:
/// - the registration's provider override, when that id is registered;
/// - the default provider, when `prefer_default` is set and it supports the contract;
/// - the first provider in registration order that supports the contract;
/// - the default provider.
///
/// Returns `None` only when the fallback default is not registered either.
pub(crate) fn select_provider(
    providers: &IndexMap<ProviderId, Arc<dyn Provider>>,
    default_id: ProviderId,
    prefer_default: bool,
    registration: &MetaRegistration,
    contract: &Contract,
) -> Option<ProviderSelection> {
    if let Some(override_id) = registration.provider_override {
        match providers.get(&override_id) {
            Some(provider) => {
                return Some(ProviderSelection {
                    id: override_id,
                    provider: Arc::clone(provider),
                    source: SelectionSource::Override,
                });
            }
            None => warn!(
                method = %registration.method,
                provider = %override_id,
                "provider override is not registered; falling back to selection"
            ),
        }
    }

    let default_provider = providers.get(&default_id);
    if prefer_default
        && let Some(provider) = default_provider
        && provider.supports(contract)
    {
        return Some(ProviderSelection {
            id: default_id,
            provider: Arc::clone(provider),
            source: SelectionSource::PreferredDefault,
        });
    }

    if let Some((id, provider)) = providers.iter().find(|(_, provider)| provider.supports(contract)) {
        return Some(ProviderSelection {
            id: *id,
            provider: Arc::clone(provider),
            source: SelectionSource::Scan,
        });
    }

    default_provider.map(|provider| ProviderSelection {
        id: default_id,
        provider: Arc::clone(provider),
        source: SelectionSource::Fallback,
    })
}
