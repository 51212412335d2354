use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::provider::{InferenceParams, ModelHandleKey, ModelProvider};
use crate::tools::Tool;

/// A stable digest of an agent's effective configuration: identity key for
/// the Agent Cache. Two requests for the same agent id with identical
/// effective config must produce the same fingerprint, and therefore hit
/// the same cache entry (§4.6's "cache hit is an invariant").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentConfigFingerprint(pub [u8; 32]);

impl std::fmt::Display for AgentConfigFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    agent_id: &'a str,
    system_prompt: &'a str,
    tools: Vec<&'a str>,
    handle_key: &'a ModelHandleKey,
    inference: &'a InferenceParams,
}

/// Hashes the canonical (sorted-tool-list) serialization of an agent's
/// effective configuration. `serde_json::to_vec` on a struct with a `Vec`
/// field preserves declaration order, so tools are sorted by the caller
/// before fingerprinting — the struct itself does not re-sort, keeping
/// this function a pure hash rather than a normalization step in disguise.
pub fn fingerprint(
    agent_id: &str,
    system_prompt: &str,
    tools: &[String],
    handle_key: &ModelHandleKey,
    inference: &InferenceParams,
) -> AgentConfigFingerprint {
    let mut sorted_tools: Vec<&str> = tools.iter().map(String::as_str).collect();
    sorted_tools.sort_unstable();

    let input = FingerprintInput {
        agent_id,
        system_prompt,
        tools: sorted_tools,
        handle_key,
        inference,
    };

    let canonical = serde_json::to_vec(&input).expect("fingerprint input is always serializable");
    let digest = Sha256::digest(&canonical);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    AgentConfigFingerprint(bytes)
}

/// An agent fully assembled for use: bound model client, resolved tool
/// handles, effective system prompt. Immutable once built — a config
/// change produces a new fingerprint and therefore a new cache entry,
/// never a mutation of an existing one (§3 invariants).
#[derive(Clone)]
pub struct AssembledAgent {
    pub agent_id: String,
    pub system_prompt: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub model: Arc<dyn ModelProvider>,
    pub handle_key: ModelHandleKey,
}

/// Per-run cache of assembled agents, keyed by fingerprint. A fresh
/// instance is created per workflow invocation by the run driver — unlike
/// the Model Pool, this cache is never shared across runs (§4.6).
#[derive(Default)]
pub struct AgentCache {
    agents: DashMap<AgentConfigFingerprint, Arc<AssembledAgent>>,
}

impl AgentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached agent for `fingerprint`, or calls `build` to
    /// assemble and insert one. `build` may be expensive (tool resolution,
    /// pool lookup, both fallible) so it only runs on a genuine miss; a
    /// failed build leaves no entry behind, so the next call retries it.
    pub async fn get_or_build<F, Fut, E>(
        &self,
        fingerprint: AgentConfigFingerprint,
        build: F,
    ) -> Result<Arc<AssembledAgent>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<AssembledAgent, E>>,
    {
        if let Some(existing) = self.agents.get(&fingerprint) {
            return Ok(existing.clone());
        }
        let assembled = Arc::new(build().await?);
        self.agents
            .entry(fingerprint)
            .or_insert_with(|| assembled.clone());
        Ok(self.agents.get(&fingerprint).unwrap().clone())
    }

    pub fn contains_fingerprint(&self, fingerprint: AgentConfigFingerprint) -> bool {
        self.agents.contains_key(&fingerprint)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ModelHandleKey {
        ModelHandleKey::new("mock", "mock-large", None)
    }

    #[test]
    fn fingerprint_is_stable_for_identical_input() {
        let inference = InferenceParams::default();
        let a = fingerprint("writer", "be terse", &["search".to_string()], &key(), &inference);
        let b = fingerprint("writer", "be terse", &["search".to_string()], &key(), &inference);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_tool_declaration_order() {
        let inference = InferenceParams::default();
        let tools_a = vec!["search".to_string(), "calc".to_string()];
        let tools_b = vec!["calc".to_string(), "search".to_string()];
        let a = fingerprint("writer", "be terse", &tools_a, &key(), &inference);
        let b = fingerprint("writer", "be terse", &tools_b, &key(), &inference);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_prompt() {
        let inference = InferenceParams::default();
        let a = fingerprint("writer", "be terse", &[], &key(), &inference);
        let b = fingerprint("writer", "be verbose", &[], &key(), &inference);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cache_returns_same_instance_for_same_fingerprint() {
        let cache = AgentCache::new();
        let fp = fingerprint("writer", "be terse", &[], &key(), &InferenceParams::default());

        let build = || async {
            Ok::<_, std::convert::Infallible>(AssembledAgent {
                agent_id: "writer".to_string(),
                system_prompt: "be terse".to_string(),
                tools: Vec::new(),
                model: Arc::new(crate::testing::MockProvider::default()),
                handle_key: key(),
            })
        };

        let first = cache.get_or_build(fp, build).await.unwrap();
        let second = cache.get_or_build(fp, build).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
