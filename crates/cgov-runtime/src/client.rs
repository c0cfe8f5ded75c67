//! The runtime seam and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use cgov_core::{BundleVersion, Namespace};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::retry::RetryPolicy;

/// Header carrying the bundle version on push.
pub const BUNDLE_VERSION_HEADER: &str = "X-Bundle-Version";

/// Decision document returned by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDecision {
    /// Final outcome.
    pub allow: bool,
    /// Allow rules that matched.
    #[serde(default)]
    pub allow_matches: Vec<String>,
    /// Deny rules that matched.
    #[serde(default)]
    pub deny_matches: Vec<String>,
}

/// Operations the engine needs from a policy runtime.
#[async_trait]
pub trait PolicyRuntime: Send + Sync {
    /// Load bundle text for a namespace.
    async fn push_bundle(&self, namespace: &Namespace, version: BundleVersion, text: &str) -> Result<(), RuntimeError>;

    /// Evaluate `input` against the namespace's active bundle. `timeout`
    /// overrides the client default for this call.
    async fn query(
        &self,
        namespace: &Namespace,
        input: &Value,
        timeout: Option<Duration>,
    ) -> Result<RuntimeDecision, RuntimeError>;

    /// Whether the runtime is serving.
    async fn health(&self) -> Result<(), RuntimeError>;

    /// The retry and failure policy the client applies.
    fn retry_policy(&self) -> &RetryPolicy;
}

/// [`PolicyRuntime`] over an OPA-style REST API.
#[derive(Debug, Clone)]
pub struct HttpRuntimeClient {
    client: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
    timeout: Duration,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: Option<RuntimeDecision>,
}

impl HttpRuntimeClient {
    /// Build a client from configuration.
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate().map_err(|e| RuntimeError::Config(e.to_string()))?;
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|_| RuntimeError::Config("token contains invalid header characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RuntimeError::Config(format!("failed to build HTTP client: {e}")))?;
        let mut base = Url::parse(&config.base_url).map_err(|e| RuntimeError::Config(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            retry: config.retry.clone(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url, RuntimeError> {
        self.base
            .join(path)
            .map_err(|e| RuntimeError::Config(format!("invalid runtime path {path}: {e}")))
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, RuntimeError> {
        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                RuntimeError::Timeout {
                    operation: operation.to_string(),
                    after_ms: timeout.as_millis() as u64,
                }
            } else {
                RuntimeError::Transport {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: clip(body, MAX_ERROR_BODY),
            });
        }
        Ok(response)
    }

    async fn push_once(&self, namespace: &Namespace, version: BundleVersion, text: &str) -> Result<(), RuntimeError> {
        let url = self.url(&format!("v1/policies/{namespace}"))?;
        let request = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "text/plain")
            .header(BUNDLE_VERSION_HEADER, version.get().to_string())
            .body(text.to_string());
        self.send("push", request, self.timeout).await.map(|_| ())
    }

    async fn query_once(
        &self,
        namespace: &Namespace,
        input: &Value,
        timeout: Duration,
    ) -> Result<RuntimeDecision, RuntimeError> {
        let url = self.url(&format!("v1/data/cgov/{namespace}/decision"))?;
        let request = self.client.post(url).json(&serde_json::json!({ "input": input }));
        let response = self.send("query", request, timeout).await?;
        let body: QueryResponse = response.json().await.map_err(|e| RuntimeError::Decode {
            operation: "query".into(),
            reason: e.to_string(),
        })?;
        body.result.ok_or_else(|| RuntimeError::Decode {
            operation: "query".into(),
            reason: format!("no decision document for namespace {namespace}; is a bundle loaded?"),
        })
    }

    async fn health_once(&self) -> Result<(), RuntimeError> {
        let url = self.url("health")?;
        self.send("health", self.client.get(url), self.timeout).await.map(|_| ())
    }
}

#[async_trait]
impl PolicyRuntime for HttpRuntimeClient {
    async fn push_bundle(&self, namespace: &Namespace, version: BundleVersion, text: &str) -> Result<(), RuntimeError> {
        self.retry
            .run("push", || self.push_once(namespace, version, text))
            .await?;
        tracing::info!(namespace = %namespace, version = %version, bytes = text.len(), "bundle pushed to runtime");
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        input: &Value,
        timeout: Option<Duration>,
    ) -> Result<RuntimeDecision, RuntimeError> {
        let timeout = timeout.unwrap_or(self.timeout);
        self.retry
            .run("query", || self.query_once(namespace, input, timeout))
            .await
    }

    async fn health(&self) -> Result<(), RuntimeError> {
        self.retry.run("health", || self.health_once()).await
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Longest error body kept, in bytes.
const MAX_ERROR_BODY: usize = 512;

/// Cut `body` to at most `max` bytes on a char boundary.
fn clip(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
