use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("input validation failed: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("denied by tool security policy: {0}")]
    Denied(String),
}

impl ToolError {
    /// Only a tool that explicitly opts in (by returning `ExecutionFailed`
    /// and declaring itself retriable through its own logic) is retried;
    /// the substrate otherwise treats every `ToolError` as terminal for
    /// that invocation, per the error taxonomy in §7.
    pub fn is_retriable(&self) -> bool {
        false
    }
}

/// A named capability an agent can invoke mid-turn. The core never
/// interprets tool bodies — it only carries the name through to the
/// provider and, for providers that surface a tool call, dispatches to
/// the registry on the caller's behalf.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Resolves tool names declared in `agents.<id>.tools` to [`Tool`]
/// instances. The Capability Gate uses `lookup` to validate every
/// declared tool name exists before any invocation begins.
pub trait ToolRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>>;
}
