use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// The currently supported specification schema version.
pub const SUPPORTED_VERSION: i64 = 0;

/// A parsed, but not yet capability-gated, workflow specification.
///
/// Parsing only covers the fields this crate recognizes (§6); structural
/// schema validation is out of scope and is the embedding caller's
/// responsibility. Unrecognized fields are ignored rather than rejected —
/// rejection of unsupported *features* among recognized fields is the
/// Capability Gate's job, not the parser's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub version: i64,
    pub workflow_id: String,
    pub runtime: RuntimeConfig,
    pub agents: HashMap<String, AgentSpec>,
    pub pattern: PatternConfig,
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub context_policy: ContextPolicy,
    #[serde(default)]
    pub outputs: OutputsConfig,
}

impl Spec {
    pub fn from_yaml(source: &str) -> Result<Self, SpecError> {
        let spec: Spec = serde_yaml::from_str(source)?;
        spec.check_version()?;
        Ok(spec)
    }

    pub fn from_json(source: &str) -> Result<Self, SpecError> {
        let spec: Spec = serde_json::from_str(source)?;
        spec.check_version()?;
        Ok(spec)
    }

    fn check_version(&self) -> Result<(), SpecError> {
        if self.version != SUPPORTED_VERSION {
            return Err(SpecError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Counting-semaphore cap on concurrent invocations (§5). Absent means
    /// "use this pattern's own default" — 5 for Parallel, 10 for Workflow
    /// and Orchestrator-Workers (§5: "default chosen per executor") —
    /// which is why this isn't a plain `usize` with a single serde
    /// default: one spec-wide default can't capture a per-pattern one.
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

pub const DEFAULT_MAX_PARALLEL_PARALLEL: usize = 5;
pub const DEFAULT_MAX_PARALLEL_WORKFLOW: usize = 10;
pub const DEFAULT_MAX_PARALLEL_ORCHESTRATOR: usize = 5;

impl RuntimeConfig {
    pub fn max_parallel_or(&self, default: usize) -> usize {
        self.max_parallel.unwrap_or(default).max(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budgets {
    pub max_tokens: Option<u64>,
    pub max_steps: Option<u64>,
    pub max_duration_s: Option<u64>,
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
}

fn default_warn_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePolicy {
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub backoff: BackoffMode,
    #[serde(default = "default_wait_min_ms")]
    pub wait_min_ms: u64,
    #[serde(default = "default_wait_max_ms")]
    pub wait_max_ms: u64,
}

fn default_wait_min_ms() -> u64 {
    200
}

fn default_wait_max_ms() -> u64 {
    10_000
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: BackoffMode::default(),
            wait_min_ms: default_wait_min_ms(),
            wait_max_ms: default_wait_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffMode {
    #[default]
    Constant,
    Exponential,
    ExponentialJittered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub inference: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputsConfig {
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPolicy {
    #[serde(default)]
    pub compaction: CompactionConfig,
    /// When true, an undefined template reference is a fatal
    /// `TemplateError` instead of rendering as an empty string with a
    /// `template.undefined` event (§4.1).
    #[serde(default)]
    pub strict_templates: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_when_tokens_over")]
    pub when_tokens_over: u64,
    #[serde(default = "default_summary_ratio")]
    pub summary_ratio: f64,
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent_messages: usize,
    #[serde(default)]
    pub summarization_model: Option<String>,
}

fn default_when_tokens_over() -> u64 {
    8_000
}

fn default_summary_ratio() -> f64 {
    0.5
}

fn default_preserve_recent() -> usize {
    4
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub artifacts: Vec<OutputArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub path: String,
    pub from: String,
}

/// One of the seven coordination patterns, tagged by `pattern.type` and
/// carrying its pattern-specific configuration payload.
///
/// Matching on this enum, rather than probing an untyped map at executor
/// time, is the "convert to tagged, typed values" design note (§9):
/// downstream pattern executors never see raw spec maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "kebab-case")]
pub enum PatternConfig {
    Chain(ChainConfig),
    Routing(RoutingConfig),
    Parallel(ParallelConfig),
    Workflow(WorkflowConfig),
    Graph(GraphConfig),
    EvaluatorOptimizer(EvaluatorOptimizerConfig),
    OrchestratorWorkers(OrchestratorWorkersConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub steps: Vec<ChainStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub agent: String,
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub router_agent: String,
    pub input: String,
    pub routes: Vec<Route>,
    #[serde(default)]
    pub default_route: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub condition: String,
    pub steps: Vec<ChainStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub reduce: Option<ChainStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub steps: Vec<ChainStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub tasks: Vec<WorkflowTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: String,
    pub agent: String,
    pub input: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub start_node: String,
    #[serde(default)]
    pub end_nodes: Vec<String>,
    pub nodes: Vec<GraphNode>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

fn default_max_iterations() -> u64 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub agent: String,
    pub input: String,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Schema-level list of targets; only the first is ever traversed
    /// (§9 open question: preserve round-trip loading, restrict traversal).
    pub targets: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorOptimizerConfig {
    pub producer_agent: String,
    pub evaluator_agent: String,
    pub optimizer_agent: String,
    pub input: String,
    pub score_path: String,
    pub quality_threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorWorkersConfig {
    pub orchestrator_agent: String,
    pub input: String,
    pub worker_agents: Vec<String>,
    #[serde(default)]
    pub reduce: Option<ChainStep>,
    /// Rejected at the capability gate unless absent or `1` — this
    /// implementation is single-round only (§4.8.7).
    #[serde(default)]
    pub max_rounds: Option<u32>,
}
