// Engram Salience: Embedding Boundary
//
// The vector channel depends on an external embedding provider. This module
// owns that boundary: the provider trait, a hard timeout around every call,
// HTTP status classification, and an HTTP client speaking the Ollama and
// OpenAI-compatible wire formats.
//
// Status policy: 2xx ok; 429 and 5xx degraded (the credential is presumed
// good, so the caller proceeds with a warning); 401/403 auth failure;
// any other status is a provider error.

use crate::atoms::constants::EMBEDDING_TIMEOUT_MS;
use crate::atoms::error::{EngineError, EngineResult};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Anything that can turn text into a vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

/// Run `provider.embed` under a deadline. An elapsed deadline drops the
/// in-flight future and surfaces `EngineError::Timeout`.
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout_ms: u64,
) -> EngineResult<Vec<f32>> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), provider.embed(text)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("[memory] {} embedding timed out after {}ms", provider.name(), timeout_ms);
            Err(EngineError::timeout(format!("{} embed", provider.name()), timeout_ms))
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Status classification
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProviderStatus {
    Ok,
    /// Usable, with a warning (rate limit or server error).
    Degraded(String),
    AuthFailure(String),
    Failed(String),
}

impl ProviderStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, ProviderStatus::Ok | ProviderStatus::Degraded(_))
    }
}

pub fn classify_provider_status(status: u16) -> ProviderStatus {
    match status {
        200..=299 => ProviderStatus::Ok,
        401 | 403 => ProviderStatus::AuthFailure(format!("provider rejected credentials (HTTP {status})")),
        429 => ProviderStatus::Degraded("provider rate limited (HTTP 429); credential accepted".into()),
        500..=599 => ProviderStatus::Degraded(format!("provider server error (HTTP {status}); credential accepted")),
        _ => ProviderStatus::Failed(format!("unexpected provider response (HTTP {status})")),
    }
}

/// Pull the first vector out of any of the supported response shapes:
/// `{embeddings: [[..]]}`, `{embedding: [..]}`, `{data: [{embedding: [..]}]}`.
pub fn parse_embedding(v: &Value) -> Option<Vec<f32>> {
    let arr = v["embeddings"][0]
        .as_array()
        .or_else(|| v["embedding"].as_array())
        .or_else(|| v["data"][0]["embedding"].as_array())?;
    let vec: Vec<f32> = arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
    (!vec.is_empty()).then_some(vec)
}

// ═════════════════════════════════════════════════════════════════════════════
// HTTP client
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Deadline for one `embed` call, both wire formats included.
    #[serde(default = "default_embed_timeout")]
    pub timeout_ms: u64,
}

fn default_embed_timeout() -> u64 {
    EMBEDDING_TIMEOUT_MS
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            api_key: None,
            timeout_ms: EMBEDDING_TIMEOUT_MS,
        }
    }
}

/// Ollama first (`/api/embed`), then OpenAI-compatible (`/v1/embeddings`).
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        EmbeddingClient { client: Client::new(), config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn post_embed(&self, path: &str, body: Value) -> EngineResult<Vec<f32>> {
        let resp = self.authorized(self.client.post(self.url(path)).json(&body)).send().await?;
        let status = resp.status().as_u16();
        match classify_provider_status(status) {
            ProviderStatus::Ok => {}
            ProviderStatus::AuthFailure(msg) => return Err(EngineError::Auth(msg)),
            ProviderStatus::Degraded(msg) | ProviderStatus::Failed(msg) => {
                let text = resp.text().await.unwrap_or_default();
                return Err(EngineError::provider(path, format!("{msg}: {text}")));
            }
        }
        let v: Value = resp.json().await?;
        parse_embedding(&v).ok_or_else(|| EngineError::provider(path, "response carried no embedding vector"))
    }

    /// Check the endpoint. Auth failures and timeouts are errors; rate
    /// limits and server errors come back as `Degraded`.
    pub async fn validate_provider(&self, timeout_ms: u64) -> EngineResult<ProviderStatus> {
        let req = self.authorized(self.client.get(self.url("/v1/models")));
        let resp = match tokio::time::timeout(Duration::from_millis(timeout_ms), req.send()).await {
            Ok(r) => r?,
            Err(_) => return Err(EngineError::timeout("provider validation", timeout_ms)),
        };
        let status = classify_provider_status(resp.status().as_u16());
        match &status {
            ProviderStatus::Ok => info!("[memory] Embedding provider at {} validated", self.config.base_url),
            ProviderStatus::Degraded(w) => warn!("[memory] Embedding provider degraded: {}", w),
            ProviderStatus::AuthFailure(msg) => return Err(EngineError::Auth(msg.clone())),
            ProviderStatus::Failed(msg) => return Err(EngineError::provider(&self.config.base_url, msg.clone())),
        }
        Ok(status)
    }

    async fn embed_unbounded(&self, text: &str) -> EngineResult<Vec<f32>> {
        let ollama = self
            .post_embed("/api/embed", json!({ "model": self.config.model, "input": text }))
            .await;
        match ollama {
            Ok(v) => Ok(v),
            Err(EngineError::Auth(msg)) => Err(EngineError::Auth(msg)),
            Err(first) => {
                info!("[memory] Ollama embed failed ({}); trying OpenAI format", first);
                self.post_embed("/v1/embeddings", json!({ "model": self.config.model, "input": text }))
                    .await
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    /// Ollama first, then OpenAI format, all under `config.timeout_ms`.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let deadline = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(deadline, self.embed_unbounded(text)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[memory] {} embedding timed out after {}ms", self.config.model, self.config.timeout_ms);
                Err(EngineError::timeout(format!("{} embed", self.config.model), self.config.timeout_ms))
            }
        }
    }
}
