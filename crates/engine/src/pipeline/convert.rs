//! Raw-result to model conversion.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use relay_types::{ConversionError, Converter, ExecutionResult, FailureKind, Model, RawData, RawResult, ResolvedCall, TypeTag};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

type Decoder = Arc<dyn Fn(&TypeTag, &str) -> Result<Model, ConversionError> + Send + Sync>;

/// Default converter: deserializes JSON text into registered model types.
///
/// Decoders are keyed by type tag. Tags without a decoder decode into
/// [`Model::Json`]; the unit tag always yields [`Model::Unit`].
#[derive(Clone, Default)]
pub struct JsonConverter {
    decoders: HashMap<TypeTag, Decoder>,
}

impl std::fmt::Debug for JsonConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonConverter")
            .field("types", &self.decoders.keys().map(TypeTag::as_str).collect::<Vec<_>>())
            .finish()
    }
}

impl JsonConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode text tagged `name` into `T`.
    pub fn with_type<T>(mut self, name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.register::<T>(TypeTag::named(name));
        self
    }

    /// Decode text tagged `tag` into `T`.
    pub fn register<T>(&mut self, tag: TypeTag)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let decoder: Decoder = Arc::new(|target: &TypeTag, raw: &str| {
            serde_json::from_str::<T>(raw)
                .map(Model::typed)
                .map_err(|source| ConversionError::decode(target, source))
        });
        self.decoders.insert(tag, decoder);
    }

    pub fn knows(&self, tag: &TypeTag) -> bool {
        self.decoders.contains_key(tag)
    }
}

impl Converter for JsonConverter {
    fn convert(&self, target: &TypeTag, raw: &str) -> Result<Model, ConversionError> {
        match target {
            TypeTag::Unit => Ok(Model::Unit),
            TypeTag::String | TypeTag::Void => Ok(Model::Text(raw.to_string())),
            _ => match self.decoders.get(target) {
                Some(decoder) => decoder(target, raw),
                None => serde_json::from_str::<Value>(raw)
                    .map(Model::Json)
                    .map_err(|source| ConversionError::decode(target, source)),
            },
        }
    }
}

/// Turn a provider's raw result into an execution result for `call`.
///
/// `default_converter` is used unless the call's registration carries its own.
/// Decode failures are reported as unsuccessful results with
/// [`FailureKind::ConversionFault`] rather than propagated.
pub fn convert_response(call: &ResolvedCall, raw: RawResult, default_converter: &dyn Converter) -> ExecutionResult {
    let output = call.contract.effective_output();
    let change_hash = raw.change_hash();

    let converted = match (&output, &raw.data) {
        (TypeTag::String, data) => Ok(Model::from(data.clone())),
        (target, RawData::Text(text)) => {
            let converter: &dyn Converter = match call.registration.converter_override.as_deref() {
                Some(converter) => converter,
                None => default_converter,
            };
            converter.convert(target, text)
        }
        (TypeTag::Unit, _) => Ok(Model::Unit),
        (_, data) => Ok(Model::from(data.clone())),
    };

    let mut success = raw.success;
    let mut error = raw.error;
    let mut failure = (!success).then_some(FailureKind::ProviderReported);
    let model = match converted {
        Ok(model) => model,
        Err(conversion_error) => {
            debug!(contract = %call.contract.path, meta_id = %call.meta_id, error = %conversion_error, "response conversion failed");
            success = false;
            error = Some(conversion_error.to_string());
            failure = Some(FailureKind::ConversionFault);
            Model::Empty
        }
    };

    ExecutionResult {
        contract_id: call.contract.path.clone(),
        meta_id: call.meta_id,
        timestamp: Utc::now(),
        change_hash,
        result_type: output,
        payload: call.contract.payload.clone(),
        raw: raw.data,
        model,
        success,
        error,
        status_code: raw.status_code,
        failure,
    }
}
