//! Response conversion and contract pre-processing interfaces.

use crate::{contract::Contract, contract::TypeTag, result::Model};

/// Errors raised while converting a raw text response into a model.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to decode '{target}': {source}")]
    Decode {
        target: TypeTag,
        #[source]
        source: serde_json::Error,
    },
}

impl ConversionError {
    pub fn decode(target: &TypeTag, source: serde_json::Error) -> Self {
        Self::Decode {
            target: target.clone(),
            source,
        }
    }
}

/// Turns a raw text response into a model of the requested type.
pub trait Converter: Send + Sync {
    fn convert(&self, target: &TypeTag, raw: &str) -> Result<Model, ConversionError>;
}

/// Pre-processing step applied to every contract before execution.
///
/// Handlers run in registration order; each receives the previous handler's
/// output.
pub trait ContractHandler: Send + Sync {
    fn update_contract(&self, contract: Contract) -> Contract;
}

impl<F> ContractHandler for F
where
    F: Fn(Contract) -> Contract + Send + Sync,
{
    fn update_contract(&self, contract: Contract) -> Contract {
        self(contract)
    }
}
