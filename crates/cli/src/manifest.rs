//! Manifest loading: router settings, provider declarations and contract registrations.
//!
//! A manifest is JSON or YAML, chosen by file extension:
//!
//! ```yaml
//! settings:
//!   preferDefault: false
//!   defaultProvider: 0
//! providers:
//!   - id: 0
//!     name: local
//!     type: mock
//!     responses:
//!       ping: pong
//! contracts:
//!   - kind: Ping
//!     method: ping
//! ```
//!
//! Without a `settings` block the router settings come from the settings file
//! (`RELAY_CONFIG_PATH`, else the user config directory).

use std::{fs, path::Path, sync::Arc, time::Duration};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use relay_engine::{ConfigError, ContractRouter, MetaTable, MetaTableError, RouterSettings, load_settings, load_settings_from_path};
use relay_providers::{HttpProvider, HttpProviderConfig, HttpProviderError, MockProvider};
use relay_types::{
    Contract, ContractKind, ConversionError, Converter, MetaRegistration, Model, Provider, ProviderId, RawData, RawResult,
    TypeTag,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

static PROVIDER_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("provider name regex should compile"));
static METHOD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+(/[A-Za-z0-9._-]+)*$").expect("method regex should compile"));

/// Errors raised while loading a manifest or building a router from it.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported manifest extension for '{path}' (expected .json, .yaml or .yml)")]
    UnsupportedFormat { path: String },

    #[error("invalid provider name '{name}': {reason}")]
    InvalidProviderName { name: String, reason: String },

    #[error("invalid method '{method}': {reason}")]
    InvalidMethod { method: String, reason: String },

    #[error("provider id {id} is declared more than once")]
    DuplicateProviderId { id: ProviderId },

    #[error("contract '{method}' names unknown provider {id}")]
    UnknownProvider { method: String, id: ProviderId },

    #[error("contract '{method}' names unknown converter '{converter}'")]
    UnknownConverter { method: String, converter: String },

    #[error(transparent)]
    Settings(#[from] ConfigError),

    #[error(transparent)]
    Table(#[from] MetaTableError),

    #[error("provider '{name}': {source}")]
    Http {
        name: String,
        #[source]
        source: HttpProviderError,
    },
}

/// Parsed manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    /// Inline router settings; the settings file is used when absent.
    #[serde(default)]
    pub settings: Option<RouterSettings>,
    #[serde(default)]
    pub providers: Vec<ProviderDecl>,
    #[serde(default)]
    pub contracts: Vec<ContractDecl>,
}

/// One provider declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDecl {
    pub id: ProviderId,
    pub name: String,
    /// Contract kinds served; every kind when omitted.
    #[serde(default)]
    pub kinds: Option<Vec<ContractKind>>,
    #[serde(flatten)]
    pub transport: TransportDecl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportDecl {
    #[serde(rename_all = "camelCase")]
    Mock {
        /// Path to response body; strings stay text, anything else is structured data.
        #[serde(default)]
        responses: IndexMap<String, Value>,
        #[serde(default)]
        connect_failure: Option<String>,
        #[serde(default)]
        latency_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Http {
        base_url: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
        #[serde(default)]
        health_path: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

/// One contract registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractDecl {
    pub kind: ContractKind,
    pub method: String,
    /// Path used when calling the contract; defaults to the method.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_input")]
    pub input: TypeTag,
    #[serde(default)]
    pub output: Option<TypeTag>,
    #[serde(default)]
    pub provider: Option<ProviderId>,
    /// `json` (the router default) or `text`.
    #[serde(default)]
    pub converter: Option<String>,
}

fn default_input() -> TypeTag {
    TypeTag::String
}

impl ContractDecl {
    pub fn prototype(&self) -> Contract {
        let mut contract = Contract::new(self.kind.clone(), self.path.clone().unwrap_or_else(|| self.method.clone()))
            .with_input(self.input.clone());
        contract.output = self.output.clone();
        contract
    }
}

/// Converter keeping text responses as text whatever the declared output.
#[derive(Debug, Default)]
pub struct TextConverter;

impl Converter for TextConverter {
    fn convert(&self, target: &TypeTag, raw: &str) -> Result<Model, ConversionError> {
        match target {
            TypeTag::Unit => Ok(Model::Unit),
            _ => Ok(Model::Text(raw.to_string())),
        }
    }
}

/// Load a manifest, picking the parser from the file extension.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    let manifest: Manifest = match path.extension().and_then(|extension| extension.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        Some("yaml" | "yml") => serde_yaml::from_str(&content)?,
        _ => {
            return Err(ManifestError::UnsupportedFormat {
                path: path.display().to_string(),
            });
        }
    };
    manifest.validate()?;
    debug!(
        path = %path.display(),
        providers = manifest.providers.len(),
        contracts = manifest.contracts.len(),
        "manifest loaded"
    );
    Ok(manifest)
}

impl Manifest {
    /// Check names, provider references and settings.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if let Some(settings) = &self.settings {
            settings.validate()?;
        }

        let mut seen = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            validate_provider_name(&provider.name)?;
            if seen.contains(&provider.id) {
                return Err(ManifestError::DuplicateProviderId { id: provider.id });
            }
            seen.push(provider.id);
        }

        for contract in &self.contracts {
            validate_method(&contract.method)?;
            if let Some(id) = contract.provider
                && !seen.contains(&id)
            {
                return Err(ManifestError::UnknownProvider {
                    method: contract.method.clone(),
                    id,
                });
            }
            if let Some(converter) = contract.converter.as_deref()
                && !matches!(converter, "json" | "text")
            {
                return Err(ManifestError::UnknownConverter {
                    method: contract.method.clone(),
                    converter: converter.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Registration table for the declared contracts; duplicate shapes are rejected.
    pub fn meta_table(&self) -> Result<MetaTable, ManifestError> {
        let text_converter: Arc<dyn Converter> = Arc::new(TextConverter);
        let registrations = self
            .contracts
            .iter()
            .map(|contract| {
                let mut registration = MetaRegistration::new(contract.method.clone(), contract.prototype());
                if let Some(id) = contract.provider {
                    registration = registration.with_provider(id);
                }
                if contract.converter.as_deref() == Some("text") {
                    registration = registration.with_converter(Arc::clone(&text_converter));
                }
                registration
            })
            .collect();
        Ok(MetaTable::try_new(registrations)?)
    }

    /// Router settings in precedence order: an explicit settings file, the
    /// manifest's `settings` block, then the default settings file.
    pub fn resolve_settings(&self, settings_path: Option<&Path>) -> Result<RouterSettings, ManifestError> {
        let settings = match (settings_path, &self.settings) {
            (Some(path), _) => load_settings_from_path(path)?,
            (None, Some(settings)) => settings.clone(),
            (None, None) => load_settings()?,
        };
        debug!(
            history_capacity = settings.history_capacity,
            prefer_default = settings.prefer_default,
            default_provider = %settings.default_provider,
            "router settings resolved"
        );
        Ok(settings)
    }

    /// Build a router with every declared provider registered, using [`Manifest::resolve_settings`].
    pub fn build_router(&self) -> Result<Arc<ContractRouter>, ManifestError> {
        self.build_router_with(self.resolve_settings(None)?)
    }

    pub fn build_router_with(&self, settings: RouterSettings) -> Result<Arc<ContractRouter>, ManifestError> {
        let router = ContractRouter::new(settings, self.meta_table()?);
        for declaration in &self.providers {
            router.register_provider(declaration.id, build_provider(declaration)?);
        }
        Ok(Arc::new(router))
    }

    pub fn find_contract(&self, kind: &str) -> Option<&ContractDecl> {
        self.contracts
            .iter()
            .find(|contract| contract.kind.as_str() == kind || contract.method == kind)
    }
}

fn build_provider(declaration: &ProviderDecl) -> Result<Arc<dyn Provider>, ManifestError> {
    match &declaration.transport {
        TransportDecl::Mock {
            responses,
            connect_failure,
            latency_ms,
        } => {
            let mut provider = MockProvider::new(declaration.name.clone());
            if let Some(kinds) = &declaration.kinds {
                provider = provider.with_kinds(kinds.iter().cloned());
            }
            if let Some(error) = connect_failure {
                provider = provider.with_connect_failure(error.clone());
            }
            if let Some(latency_ms) = latency_ms {
                provider = provider.with_latency(Duration::from_millis(*latency_ms));
            }
            for (path, body) in responses {
                provider.set_response(path.clone(), RawResult::ok(RawData::from_json(body.clone())));
            }
            Ok(Arc::new(provider))
        }
        TransportDecl::Http {
            base_url,
            headers,
            health_path,
            timeout_ms,
        } => {
            let mut config = HttpProviderConfig::new(base_url.clone());
            config.headers = headers.clone();
            config.health_path = health_path.clone();
            config.kinds = declaration.kinds.clone();
            if let Some(timeout_ms) = timeout_ms {
                config.timeout = Duration::from_millis(*timeout_ms);
            }
            let provider = HttpProvider::new(declaration.name.clone(), config).map_err(|source| ManifestError::Http {
                name: declaration.name.clone(),
                source,
            })?;
            Ok(Arc::new(provider))
        }
    }
}

fn validate_provider_name(name: &str) -> Result<(), ManifestError> {
    if !PROVIDER_NAME_REGEX.is_match(name) {
        return Err(ManifestError::InvalidProviderName {
            name: name.to_string(),
            reason: "Provider names must contain only lowercase letters, numbers, dots, underscores, and hyphens".to_string(),
        });
    }
    Ok(())
}

fn validate_method(method: &str) -> Result<(), ManifestError> {
    if !METHOD_REGEX.is_match(method) {
        return Err(ManifestError::InvalidMethod {
            method: method.to_string(),
            reason: "Methods are slash-separated segments of letters, numbers, dots, underscores, and hyphens".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_MANIFEST: &str = r#"
settings:
  historyCapacity: 8
providers:
  - id: 0
    name: local
    type: mock
    kinds: [Ping, GetProfile]
    responses:
      ping: pong
      profile/get: '{"name":"x"}'
  - id: 1
    name: rest
    type: http
    baseUrl: http://localhost:9999
    healthPath: health
contracts:
  - kind: Ping
    method: ping
  - kind: GetProfile
    method: profile/get
    output: ProfileDto
    provider: 0
"#;

    fn write(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_yaml_manifest() {
        let (_dir, path) = write("relay.yaml", YAML_MANIFEST);
        let manifest = load_manifest(&path).unwrap();

        assert_eq!(manifest.settings.as_ref().unwrap().history_capacity, 8);
        assert_eq!(manifest.providers.len(), 2);
        assert!(matches!(manifest.providers[1].transport, TransportDecl::Http { .. }));

        let profile = manifest.find_contract("GetProfile").unwrap();
        assert_eq!(profile.output, Some(TypeTag::named("ProfileDto")));
        assert_eq!(profile.prototype().path, "profile/get");
    }

    #[test]
    fn loads_json_manifest() {
        let (_dir, path) = write(
            "relay.json",
            r#"{ "providers": [{ "id": 3, "name": "m", "type": "mock" }], "contracts": [{ "kind": "Ping", "method": "ping", "provider": 3 }] }"#,
        );
        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.contracts[0].provider, Some(ProviderId(3)));
        assert_eq!(manifest.contracts[0].input, TypeTag::String);
    }

    #[test]
    fn rejects_unknown_extension() {
        let (_dir, path) = write("relay.toml", "");
        assert!(matches!(load_manifest(&path), Err(ManifestError::UnsupportedFormat { .. })));
    }

    #[test]
    fn rejects_unknown_provider_reference() {
        let (_dir, path) = write(
            "relay.json",
            r#"{ "contracts": [{ "kind": "Ping", "method": "ping", "provider": 7 }] }"#,
        );
        assert!(matches!(
            load_manifest(&path),
            Err(ManifestError::UnknownProvider { id: ProviderId(7), .. })
        ));
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(validate_provider_name("Local").is_err());
        assert!(validate_provider_name("local-1").is_ok());
        assert!(validate_method("profile/get").is_ok());
        assert!(validate_method("profile//get").is_err());
        assert!(validate_method("").is_err());
    }

    #[test]
    fn duplicate_contract_shapes_are_rejected() {
        let manifest: Manifest = serde_json::from_str(
            r#"{ "contracts": [{ "kind": "Ping", "method": "ping" }, { "kind": "Ping", "method": "ping/again" }] }"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.meta_table(),
            Err(ManifestError::Table(MetaTableError::DuplicateMetaId { .. }))
        ));
    }

    #[tokio::test]
    async fn built_router_serves_mock_responses() {
        let (_dir, path) = write("relay.yaml", YAML_MANIFEST);
        let router = load_manifest(&path).unwrap().build_router().unwrap();
        assert_eq!(router.providers().len(), 2);

        let result = router.send(Contract::new("Ping", "ping")).await;
        assert!(result.success);
        assert_eq!(result.model.as_text(), Some("pong"));

        let profile = router
            .send(Contract::new("GetProfile", "profile/get").with_output(TypeTag::named("ProfileDto")))
            .await;
        assert!(profile.success);
        assert_eq!(profile.model.as_json(), Some(&serde_json::json!({"name": "x"})));
    }

    #[test]
    fn settings_file_fills_in_missing_settings_block() {
        let (dir, path) = write("relay.json", r#"{ "contracts": [{ "kind": "Ping", "method": "ping" }] }"#);
        let settings_path = dir.path().join("router.json");
        fs::write(&settings_path, r#"{ "historyCapacity": 3, "preferDefault": true }"#).unwrap();
        let manifest = load_manifest(&path).unwrap();

        temp_env::with_var(relay_engine::CONFIG_PATH_ENV, Some(&settings_path), || {
            let settings = manifest.resolve_settings(None).unwrap();
            assert_eq!(settings.history_capacity, 3);
            assert!(settings.prefer_default);
        });
    }

    #[test]
    fn inline_settings_win_over_settings_file() {
        let (dir, path) = write("relay.yaml", YAML_MANIFEST);
        let settings_path = dir.path().join("router.json");
        fs::write(&settings_path, r#"{ "historyCapacity": 3 }"#).unwrap();
        let manifest = load_manifest(&path).unwrap();

        temp_env::with_var(relay_engine::CONFIG_PATH_ENV, Some(&settings_path), || {
            assert_eq!(manifest.resolve_settings(None).unwrap().history_capacity, 8);
        });
        assert_eq!(manifest.resolve_settings(Some(settings_path.as_path())).unwrap().history_capacity, 3);
    }

    #[test]
    fn invalid_settings_file_is_reported() {
        let (dir, path) = write("relay.json", r#"{}"#);
        let settings_path = dir.path().join("router.json");
        fs::write(&settings_path, r#"{ "historyCapacity": 0 }"#).unwrap();
        let manifest = load_manifest(&path).unwrap();
        assert!(matches!(
            manifest.resolve_settings(Some(settings_path.as_path())),
            Err(ManifestError::Settings(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn text_converter_keeps_text() {
        let model = TextConverter.convert(&TypeTag::named("ProfileDto"), "{}").unwrap();
        assert_eq!(model.as_text(), Some("{}"));
        assert!(TextConverter.convert(&TypeTag::Unit, "").unwrap().is_unit());
    }
}
