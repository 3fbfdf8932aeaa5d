//! REST transport over `reqwest`.
//!
//! Contracts map onto `{base_url}/{path}`. A contract with a null payload is
//! sent as `GET`; anything else is sent as a JSON `POST`. The response body is
//! returned as text together with the HTTP status code, so conversion into a
//! typed model stays in the pipeline.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use relay_types::{ConnectOutcome, ConnectionState, Contract, ContractKind, Provider, ProviderError, RawResult, ResolvedCall};
use reqwest::{
    Client, Method,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Characters escaped inside a single path segment.
const SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while building an [`HttpProvider`].
#[derive(Debug, Error)]
pub enum HttpProviderError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid header '{name}'")]
    InvalidHeader { name: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Settings for an [`HttpProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    /// Headers sent with every request.
    pub headers: IndexMap<String, String>,
    /// Path probed by `connect`; connecting succeeds without a request when unset.
    pub health_path: Option<String>,
    /// Contract kinds served; every kind when `None`.
    pub kinds: Option<Vec<ContractKind>>,
    pub timeout: Duration,
}

impl HttpProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: IndexMap::new(),
            health_path: None,
            kinds: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Provider executing contracts as HTTP requests.
pub struct HttpProvider {
    name: String,
    base_url: Url,
    health_path: Option<String>,
    kinds: Option<Vec<ContractKind>>,
    http: Client,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, config: HttpProviderConfig) -> Result<Self, HttpProviderError> {
        let base_url = Url::parse(&config.base_url).map_err(|error| HttpProviderError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: error.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HttpProviderError::InvalidBaseUrl {
                url: config.base_url,
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json, text/plain"));
        for (name, value) in &config.headers {
            let invalid = || HttpProviderError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            default_headers.insert(header_name, header_value);
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            name: name.into(),
            base_url,
            health_path: config.health_path,
            kinds: config.kinds,
            http,
            state: Mutex::new(ConnectionState::Disconnected),
        })
    }

    /// Absolute URL for a contract path, with each segment percent-encoded.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let encoded: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, SEGMENT_ENCODE_SET).to_string())
            .collect();
        format!("{base}/{}", encoded.join("/"))
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn probe(&self, health_path: &str) -> Result<(), String> {
        let url = self.url_for(health_path);
        let response = self.http.get(&url).send().await.map_err(|error| error.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("health probe {url} returned {status}"))
        }
    }
}

#[async_trait::async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self, cancel: &CancellationToken) -> ConnectOutcome {
        let Some(health_path) = self.health_path.as_deref() else {
            self.set_state(ConnectionState::Connected);
            return ConnectOutcome::connected();
        };

        self.set_state(ConnectionState::Connecting);
        let outcome = tokio::select! {
            result = self.probe(health_path) => result,
            _ = cancel.cancelled() => Err("connect cancelled".to_string()),
        };
        match outcome {
            Ok(()) => {
                debug!(provider = %self.name, base_url = %self.base_url, "http provider connected");
                self.set_state(ConnectionState::Connected);
                ConnectOutcome::connected()
            }
            Err(error) => {
                warn!(provider = %self.name, error = %error, "http provider health probe failed");
                self.set_state(ConnectionState::Faulted);
                ConnectOutcome::failed(error)
            }
        }
    }

    async fn disconnect(&self) -> ConnectOutcome {
        self.set_state(ConnectionState::Disconnected);
        ConnectOutcome::disconnected()
    }

    fn supports(&self, contract: &Contract) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&contract.kind))
    }

    async fn execute(&self, call: &ResolvedCall, cancel: &CancellationToken) -> Result<RawResult, ProviderError> {
        let contract = &call.contract;
        let url = self.url_for(&contract.path);
        let method = if contract.payload.is_null() { Method::GET } else { Method::POST };
        debug!(provider = %self.name, %method, %url, "http request");

        let mut request = self.http.request(method, &url);
        for (name, value) in &contract.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !matches!(contract.payload, Value::Null) {
            request = request.json(&contract.payload);
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        let (status, body) = tokio::select! {
            result = send => result.map_err(|error| ProviderError::transport(error.to_string()))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status_code = i32::from(status.as_u16());
        if status.is_success() {
            Ok(RawResult::ok(body).with_status(status_code))
        } else {
            let error = if body.trim().is_empty() { status.to_string() } else { body };
            Ok(RawResult::failed(error).with_status(status_code))
        }
    }
}
