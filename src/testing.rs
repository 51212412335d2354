//! In-memory test doubles for the provider and tool registry interfaces.
//!
//! These are the core's own testing utilities (not an external adapter):
//! deterministic stand-ins so executors and substrate are testable without
//! network access, per the Testable Properties in §8.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::provider::{InvokeRequest, InvokeResponse, ModelHandleKey, ModelProvider, ProviderError, ProviderFactory, ToolCall};
use crate::tools::{Tool, ToolError, ToolRegistry};

/// Wires up `env_logger` the same way the teacher's own examples do
/// (`env_logger::Builder::from_env(...).init()`), so `RUST_LOG=debug
/// cargo test` surfaces the retry/compaction `log::` calls in
/// `substrate/`. `try_init` rather than `init`, since every test in the
/// suite may call this and a second unconditional `init()` panics.
/// `env_logger` is a dev-dependency, so this helper stays behind
/// `cfg(test)` rather than living on the `testing` feature surface that
/// downstream embedders (who don't get dev-dependencies) also compile.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Scripted per-agent responses, returned in call order. A mock provider
/// does not distinguish between agents by handle key — the caller wires
/// one `MockProvider` per agent via a [`MockProviderFactory`] keyed by
/// model id, matching how scenarios S1-S6 script distinct agents.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<Vec<MockResponse>>,
    calls: AtomicUsize,
}

#[derive(Clone)]
pub struct MockResponse {
    pub text: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub tool_calls: Vec<ToolCall>,
    pub error: Option<ProviderError>,
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_input: 10,
            tokens_output: 10,
            tool_calls: Vec::new(),
            error: None,
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = input;
        self.tokens_output = output;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn error(error: ProviderError) -> Self {
        Self {
            text: String::new(),
            tokens_input: 0,
            tokens_output: 0,
            tool_calls: Vec::new(),
            error: Some(error),
        }
    }
}

impl MockProvider {
    pub fn script(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn invoke(&self, _request: InvokeRequest) -> Result<InvokeResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("mock provider lock poisoned");
        if responses.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "mock provider script exhausted".to_string(),
            ));
        }
        let next = responses.remove(0);
        if let Some(err) = next.error {
            return Err(err);
        }
        Ok(InvokeResponse {
            response_text: next.text,
            tokens_input: next.tokens_input,
            tokens_output: next.tokens_output,
            tool_calls: next.tool_calls,
        })
    }
}

/// Hands out a fixed [`MockProvider`] per model id, so a test can script
/// different response sequences for different agents sharing one
/// `provider` name.
#[derive(Default, Clone)]
pub struct MockProviderFactory {
    providers: Arc<Mutex<HashMap<String, Arc<MockProvider>>>>,
}

impl MockProviderFactory {
    pub fn register(&self, model_id: impl Into<String>, provider: MockProvider) {
        self.providers
            .lock()
            .expect("mock factory lock poisoned")
            .insert(model_id.into(), Arc::new(provider));
    }
}

#[async_trait]
impl ProviderFactory for MockProviderFactory {
    async fn create_client(&self, key: &ModelHandleKey) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let providers = self.providers.lock().expect("mock factory lock poisoned");
        providers
            .get(&key.model_id)
            .cloned()
            .map(|p| p as Arc<dyn ModelProvider>)
            .ok_or_else(|| ProviderError::ModelNotFound(key.model_id.clone()))
    }
}

/// A tool registry over an in-memory map, for tests that exercise
/// tool-bearing agents without a real tool implementation.
#[derive(Default)]
pub struct MockToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl MockToolRegistry {
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }
}

impl ToolRegistry for MockToolRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

/// A trivial echo tool, useful when a test only needs the registry to
/// resolve a name without caring about the tool's actual behavior.
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_plays_back_script_in_order() {
        let provider = MockProvider::script(vec![MockResponse::text("first"), MockResponse::text("second")]);
        let req = InvokeRequest {
            messages: Vec::new(),
            tool_names: Vec::new(),
            inference: Default::default(),
        };
        let first = provider.invoke(req.clone()).await.unwrap();
        assert_eq!(first.response_text, "first");
        let second = provider.invoke(req).await.unwrap();
        assert_eq!(second.response_text, "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_provider_surfaces_scripted_error() {
        let provider = MockProvider::script(vec![MockResponse::error(ProviderError::Transient("boom".into()))]);
        let req = InvokeRequest {
            messages: Vec::new(),
            tool_names: Vec::new(),
            inference: Default::default(),
        };
        let err = provider.invoke(req).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
