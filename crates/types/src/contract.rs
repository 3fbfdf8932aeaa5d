//! Contract descriptors and their deterministic identities.

use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    str::FromStr,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic type tag attached to a contract's input and output.
///
/// Tags are plain names rather than reflected types; converters and decoders
/// key their tables by tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TypeTag {
    /// Text payloads, passed through without conversion.
    String,
    /// No declared output. Treated the same as [`TypeTag::String`].
    Void,
    /// The "no value" marker. Converted results become [`crate::Model::Unit`].
    Unit,
    /// A named model type (e.g. `ProfileDto`).
    Named(String),
}

impl TypeTag {
    /// Build a named tag.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Canonical name of the tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Void => "void",
            Self::Unit => "unit",
            Self::Named(name) => name,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.as_str().to_string()
    }
}

impl FromStr for TypeTag {
    type Err = ParseTypeTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "" => Err(ParseTypeTagError),
            "string" => Ok(Self::String),
            "void" => Ok(Self::Void),
            "unit" => Ok(Self::Unit),
            other => Ok(Self::Named(other.to_string())),
        }
    }
}

impl TryFrom<String> for TypeTag {
    type Error = ParseTypeTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("type tag must not be empty")]
pub struct ParseTypeTagError;

/// Declared contract type; the runtime identity used for registration lookups.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractKind(String);

impl ContractKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Deterministic identity of a contract's declared shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaId(i64);

impl MetaId {
    /// Identity carried by lookups that matched no registration.
    pub const UNRESOLVED: MetaId = MetaId(-1);

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn is_resolved(self) -> bool {
        self != Self::UNRESOLVED
    }
}

impl fmt::Display for MetaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the MetaId for a `(kind, input, output)` triple.
///
/// The combination is order sensitive: swapping the input and output tags
/// yields a different id. A missing output tag hashes differently from every
/// explicit tag. The top bit is cleared so computed ids never collide with
/// [`MetaId::UNRESOLVED`].
pub fn meta_id_for(kind: &ContractKind, input: &TypeTag, output: Option<&TypeTag>) -> MetaId {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    0u8.hash(&mut hasher);
    input.hash(&mut hasher);
    1u8.hash(&mut hasher);
    output.hash(&mut hasher);
    MetaId((hasher.finish() >> 1) as i64)
}

/// Immutable descriptor of one remote operation.
///
/// A new contract value is built per invocation. Handlers in the execution
/// pipeline transform contracts by value and return the updated copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Declared contract type.
    pub kind: ContractKind,
    /// Method identifier, e.g. `profile/get`.
    pub path: String,
    /// Opaque request body.
    #[serde(default)]
    pub payload: Value,
    /// Request metadata that handlers may extend (auth tokens, tracing ids).
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Input type tag.
    pub input: TypeTag,
    /// Declared output type tag. `None` is treated as [`TypeTag::String`].
    #[serde(default)]
    pub output: Option<TypeTag>,
}

impl Contract {
    /// Start a contract of `kind` addressed at `path` with string input and no declared output.
    pub fn new(kind: impl Into<ContractKind>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
            payload: Value::Null,
            headers: IndexMap::new(),
            input: TypeTag::String,
            output: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_input(mut self, input: TypeTag) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: TypeTag) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Identity of this contract's declared shape.
    pub fn meta_id(&self) -> MetaId {
        meta_id_for(&self.kind, &self.input, self.output.as_ref())
    }

    /// Output tag with the `None` / `Void` normalization applied.
    pub fn effective_output(&self) -> TypeTag {
        match &self.output {
            None | Some(TypeTag::Void) => TypeTag::String,
            Some(tag) => tag.clone(),
        }
    }
}
