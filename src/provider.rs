use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schemas::Message;

/// Identity key for the Model Pool: a provider client is reused for every
/// request that shares the same `(provider, model_id, endpoint)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandleKey {
    pub provider: String,
    pub model_id: String,
    pub endpoint: Option<String>,
}

impl ModelHandleKey {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            endpoint,
        }
    }
}

impl std::fmt::Display for ModelHandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}/{}@{}", self.provider, self.model_id, endpoint),
            None => write!(f, "{}/{}", self.provider, self.model_id),
        }
    }
}

/// A single model invocation request: the conversation so far plus the
/// names of tools the agent is permitted to call.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub inference: InferenceParams,
}

/// Free-form inference knobs forwarded to the provider untouched; the core
/// does not interpret temperature/top_p/etc, it only threads them through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceParams {
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What a provider invocation returns: response text, token accounting,
/// and any tool calls the model requested (left uninterpreted by the core).
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub response_text: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),
}

impl ProviderError {
    /// Transient failures (network hiccups, 5xx, rate limiting) are
    /// eligible for retry; deterministic ones (bad auth, malformed
    /// request, unknown model) are not, per the error taxonomy.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::RateLimited(_))
    }
}

/// A client bound to one [`ModelHandleKey`]. Owned exclusively by the
/// Model Pool; callers never hold one directly, they go through the pool.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, ProviderError>;

    /// Default no-op; providers with real connections to tear down (HTTP
    /// pools, streaming sockets) override this. Called by the Model Pool
    /// during LIFO teardown at workflow end.
    async fn close(&self) {}
}

/// Mints [`ModelProvider`] clients for handle keys under one `provider`
/// name. Registered with the Model Pool by the embedding caller; the core
/// never constructs a factory itself.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create_client(&self, key: &ModelHandleKey) -> Result<Arc<dyn ModelProvider>, ProviderError>;
}
