//! Shared type definitions for the relay workspace.
//!
//! - `contract`: contract descriptors, type tags and MetaId computation
//! - `meta`: registration entries
//! - `provider`: the `Provider` trait, connection state and `ResolvedCall`
//! - `convert`: converter and handler interfaces
//! - `result`: raw results, models and execution results

pub mod contract;
pub mod convert;
pub mod meta;
pub mod provider;
pub mod result;

pub use contract::{Contract, ContractKind, MetaId, ParseTypeTagError, TypeTag, meta_id_for};
pub use convert::{ContractHandler, ConversionError, Converter};
pub use meta::MetaRegistration;
pub use provider::{ConnectOutcome, ConnectionState, Provider, ProviderError, ProviderId, ResolvedCall};
pub use result::{
    ExecutionResult, FailureKind, HistoryEntry, Model, RawData, RawResult, UNSUPPORTED_CHANGE_HASH, UNSUPPORTED_CONTRACT_MESSAGE,
};

/// Compute the MetaId of `contract` from its kind and type tags.
pub fn compute_meta_id(contract: &Contract) -> MetaId {
    contract.meta_id()
}
