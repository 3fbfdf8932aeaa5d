//! Raw provider results, converted models and pipeline execution results.

use std::{
    any::Any,
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::contract::{MetaId, TypeTag};

/// Fixed error text carried by the unsupported-contract sentinel.
pub const UNSUPPORTED_CONTRACT_MESSAGE: &str = "Unsupported contract for Provider";

/// Change hash carried by the unsupported-contract sentinel.
pub const UNSUPPORTED_CHANGE_HASH: i64 = -1;

/// Body returned by a provider before conversion.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawData {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    /// Already-structured data; passed through conversion untouched.
    Json(Value),
}

impl RawData {
    /// Map a JSON value onto raw data, keeping strings as text.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn hash_into(&self, hasher: &mut DefaultHasher) {
        match self {
            Self::Empty => 0u8.hash(hasher),
            Self::Text(text) => {
                1u8.hash(hasher);
                text.hash(hasher);
            }
            Self::Bytes(bytes) => {
                2u8.hash(hasher);
                bytes.hash(hasher);
            }
            Self::Json(value) => {
                3u8.hash(hasher);
                // serde_json maps are ordered, so the rendering is stable for equal values.
                value.to_string().hash(hasher);
            }
        }
    }
}

impl From<String> for RawData {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RawData {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Result of a single provider execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RawResult {
    pub success: bool,
    pub data: RawData,
    pub error: Option<String>,
    /// Transport status code (HTTP status for REST providers, `0` when not applicable).
    pub status_code: i32,
}

impl RawResult {
    pub fn ok(data: impl Into<RawData>) -> Self {
        Self {
            success: true,
            data: data.into(),
            error: None,
            status_code: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: RawData::Empty,
            error: Some(error.into()),
            status_code: 0,
        }
    }

    pub fn with_status(mut self, status_code: i32) -> Self {
        self.status_code = status_code;
        self
    }

    /// Hash used for change detection. Never negative.
    pub fn change_hash(&self) -> i64 {
        let mut hasher = DefaultHasher::new();
        self.success.hash(&mut hasher);
        self.data.hash_into(&mut hasher);
        self.error.hash(&mut hasher);
        self.status_code.hash(&mut hasher);
        (hasher.finish() >> 1) as i64
    }
}

/// Converted response value.
#[derive(Clone, Default)]
pub enum Model {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    /// The singleton "no value" model.
    Unit,
    /// A decoded, strongly-typed model.
    Typed {
        type_name: &'static str,
        value: Arc<dyn Any + Send + Sync>,
    },
}

impl Model {
    /// Wrap a decoded value.
    pub fn typed<T: Any + Send + Sync>(value: T) -> Self {
        Self::Typed {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Borrow the typed model as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Typed { value, .. } => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }
}

impl From<RawData> for Model {
    fn from(data: RawData) -> Self {
        match data {
            RawData::Empty => Self::Empty,
            RawData::Text(text) => Self::Text(text),
            RawData::Bytes(bytes) => Self::Bytes(bytes),
            RawData::Json(value) => Self::Json(value),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Unit => f.write_str("Unit"),
            Self::Typed { type_name, .. } => f.debug_struct("Typed").field("type_name", type_name).finish(),
        }
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty | Self::Unit => serializer.serialize_unit(),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Bytes(bytes) => bytes.serialize(serializer),
            Self::Json(value) => value.serialize(serializer),
            Self::Typed { type_name, .. } => serializer.serialize_str(&format!("<{type_name}>")),
        }
    }
}

/// Why an execution result is unsuccessful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider could not be connected.
    ConnectionFailure,
    /// The selected provider does not serve the contract.
    UnsupportedContract,
    /// The provider errored or panicked while executing.
    ProviderExecutionFault,
    /// The raw response could not be converted into the declared output type.
    ConversionFault,
    /// The provider completed and reported `success = false`.
    ProviderReported,
    /// Cancellation was observed before the provider finished.
    Cancelled,
    /// No provider is registered to serve the call.
    NoProvider,
}

/// Outcome of one pass through the execution pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionResult {
    /// Contract path the result belongs to.
    pub contract_id: String,
    pub meta_id: MetaId,
    pub timestamp: DateTime<Utc>,
    /// Hash of the raw result; used only for change detection.
    pub change_hash: i64,
    pub result_type: TypeTag,
    /// Payload of the executed contract.
    pub payload: Value,
    pub raw: RawData,
    pub model: Model,
    pub success: bool,
    pub error: Option<String>,
    pub status_code: i32,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// The empty sentinel returned when the pipeline gives up without a provider answer.
    pub fn empty() -> Self {
        Self {
            contract_id: String::new(),
            meta_id: MetaId::UNRESOLVED,
            timestamp: Utc::now(),
            change_hash: 0,
            result_type: TypeTag::String,
            payload: Value::Null,
            raw: RawData::Empty,
            model: Model::Empty,
            success: false,
            error: None,
            status_code: 0,
            failure: None,
        }
    }

    /// The sentinel returned when the selected provider does not serve the contract.
    pub fn unsupported() -> Self {
        Self {
            change_hash: UNSUPPORTED_CHANGE_HASH,
            error: Some(UNSUPPORTED_CONTRACT_MESSAGE.to_string()),
            failure: Some(FailureKind::UnsupportedContract),
            ..Self::empty()
        }
    }

    /// Attach the contract identity to a sentinel.
    pub fn for_contract(mut self, contract_id: impl Into<String>, meta_id: MetaId) -> Self {
        self.contract_id = contract_id.into();
        self.meta_id = meta_id;
        self
    }

    pub fn with_failure(mut self, failure: FailureKind) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Whether this is the empty sentinel (no provider answer).
    pub fn is_empty_sentinel(&self) -> bool {
        !self.success && self.change_hash == 0 && self.raw.is_empty() && self.error.is_none()
    }

    pub fn is_unsupported(&self) -> bool {
        self.failure == Some(FailureKind::UnsupportedContract)
    }
}

/// One slot of the execution history ring.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub sequence_id: u64,
    pub result: ExecutionResult,
}
