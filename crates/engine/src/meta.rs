//! Registration table lookups by contract kind and by MetaId.

use std::{collections::HashMap, sync::Arc};

use relay_types::{Contract, MetaId, MetaRegistration};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while building a [`MetaTable`].
#[derive(Debug, Error)]
pub enum MetaTableError {
    #[error("duplicate MetaId {id}: '{first}' and '{duplicate}'")]
    DuplicateMetaId { id: MetaId, first: String, duplicate: String },

    #[error("registration '{method}' has no prototype contract")]
    MissingPrototype { method: String },
}

/// Immutable registration table built once at startup.
#[derive(Debug)]
pub struct MetaTable {
    registrations: Vec<Arc<MetaRegistration>>,
    by_id: HashMap<MetaId, Arc<MetaRegistration>>,
    unresolved: Arc<MetaRegistration>,
}

impl MetaTable {
    /// Build a table, keeping the first entry when two registrations share a MetaId.
    pub fn new(registrations: Vec<MetaRegistration>) -> Self {
        let registrations: Vec<Arc<MetaRegistration>> = registrations.into_iter().map(Arc::new).collect();
        let mut by_id: HashMap<MetaId, Arc<MetaRegistration>> = HashMap::with_capacity(registrations.len());
        for registration in &registrations {
            if let Some(existing) = by_id.get(&registration.id) {
                warn!(
                    meta_id = %registration.id,
                    kept = %existing.method,
                    ignored = %registration.method,
                    "duplicate MetaId in registration table"
                );
                continue;
            }
            by_id.insert(registration.id, Arc::clone(registration));
        }
        debug!(registrations = registrations.len(), "registration table built");

        Self {
            registrations,
            by_id,
            unresolved: Arc::new(MetaRegistration::unresolved()),
        }
    }

    /// Build a table, rejecting duplicate MetaIds and registrations without a prototype.
    pub fn try_new(registrations: Vec<MetaRegistration>) -> Result<Self, MetaTableError> {
        let mut seen: HashMap<MetaId, &str> = HashMap::with_capacity(registrations.len());
        for registration in &registrations {
            if registration.prototype.is_none() {
                return Err(MetaTableError::MissingPrototype {
                    method: registration.method.clone(),
                });
            }
            if let Some(first) = seen.insert(registration.id, &registration.method) {
                return Err(MetaTableError::DuplicateMetaId {
                    id: registration.id,
                    first: first.to_string(),
                    duplicate: registration.method.clone(),
                });
            }
        }
        Ok(Self::new(registrations))
    }

    /// First registration whose prototype kind matches `contract`'s kind, or the sentinel.
    pub fn find_by_contract(&self, contract: &Contract) -> Arc<MetaRegistration> {
        self.registrations
            .iter()
            .find(|registration| registration.kind() == Some(&contract.kind))
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.unresolved))
    }

    pub fn find_by_id(&self, id: MetaId) -> Option<Arc<MetaRegistration>> {
        self.by_id.get(&id).cloned()
    }

    /// Registrations in table order.
    pub fn registrations(&self) -> &[Arc<MetaRegistration>] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl Default for MetaTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
