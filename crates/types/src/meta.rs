//! Static registration entries binding a MetaId to a method and its overrides.

use std::{fmt, sync::Arc};

use crate::{
    contract::{Contract, ContractKind, MetaId},
    convert::Converter,
    provider::ProviderId,
};

/// Registration entry for one contract shape.
///
/// Built once from configuration and read-only afterwards.
#[derive(Clone)]
pub struct MetaRegistration {
    pub id: MetaId,
    /// Method name; also the default contract name in logs.
    pub method: String,
    /// Prototype contract whose kind is matched during lookups.
    pub prototype: Option<Contract>,
    /// Provider that always serves this contract when set.
    pub provider_override: Option<ProviderId>,
    /// Converter used instead of the router's default.
    pub converter_override: Option<Arc<dyn Converter>>,
}

impl MetaRegistration {
    /// Register `prototype` under `method`; the id is computed from the prototype.
    pub fn new(method: impl Into<String>, prototype: Contract) -> Self {
        Self {
            id: prototype.meta_id(),
            method: method.into(),
            prototype: Some(prototype),
            provider_override: None,
            converter_override: None,
        }
    }

    /// The sentinel registration returned when no entry matches.
    pub fn unresolved() -> Self {
        Self {
            id: MetaId::UNRESOLVED,
            method: String::new(),
            prototype: None,
            provider_override: None,
            converter_override: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider_override = Some(provider);
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter_override = Some(converter);
        self
    }

    pub fn kind(&self) -> Option<&ContractKind> {
        self.prototype.as_ref().map(|prototype| &prototype.kind)
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_resolved()
    }
}

impl fmt::Debug for MetaRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRegistration")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("kind", &self.kind())
            .field("provider_override", &self.provider_override)
            .field("converter_override", &self.converter_override.is_some())
            .finish()
    }
}
