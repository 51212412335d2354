use thiserror::Error;

use crate::capability::RemediationReport;
use crate::provider::ProviderError;
use crate::template::TemplateError;
use crate::tools::ToolError;

/// Aggregated error type surfaced by the workflow driver.
///
/// Every fallible operation in the crate returns a narrower, per-layer
/// error; this type composes them via `#[from]` so `run_workflow` has a
/// single return type, mirroring how the teacher crate rolls per-chain
/// errors up into one top-level enum.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("spec rejected by capability gate: {0}")]
    Capability(#[from] RemediationReport),

    #[error("failed to parse specification: {0}")]
    SpecParse(#[from] SpecError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(#[from] BudgetError),

    #[error("pattern execution error: {0}")]
    Pattern(#[from] PatternError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("workflow cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("unsupported spec version {0}, only version 0 is supported")]
    UnsupportedVersion(i64),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal budget breach: tokens, step count, or wall-clock duration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BudgetError {
    #[error("token budget exceeded: {used} > {limit}")]
    Tokens { used: u64, limit: u64 },

    #[error("step budget exceeded: {used} > {limit}")]
    Steps { used: u64, limit: u64 },

    #[error("duration budget exceeded: {used_s} > {limit_s}")]
    Duration { used_s: u64, limit_s: u64 },
}

/// Structural failures rooted in pattern semantics rather than a single
/// agent invocation: unresolved references, cycles, unmatched routes, and
/// the like.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("no route matched classification and no default route is declared")]
    NoRouteMatched,

    #[error("dependency cycle detected in workflow DAG")]
    CyclicDependency,

    #[error("graph edge references unknown node '{0}'")]
    UnknownNode(String),

    #[error("reference to unknown agent id '{0}'")]
    UnknownAgent(String),

    #[error("task depends on unknown task id '{0}'")]
    UnknownTaskDependency(String),

    #[error("score_path expression '{0}' did not resolve to a number")]
    NonNumericScore(String),

    #[error("graph traversal exceeded max_iterations ({0})")]
    MaxIterationsExceeded(u64),

    #[error("orchestrator plan failed to parse: {0}")]
    UnparseablePlan(String),

    #[error("orchestrator plan references unknown worker agent '{0}'")]
    UnknownWorker(String),

    #[error("duplicate task id '{0}' in workflow DAG")]
    DuplicateTaskId(String),

    #[error("empty chain is not a valid pattern")]
    EmptyChain,

    #[error("branch '{0}' failed: {1}")]
    BranchFailed(String, Box<WorkflowError>),

    #[error("task '{0}' failed: {1}")]
    TaskFailed(String, Box<WorkflowError>),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("rendered artifact path escapes the output root: {0}")]
    PathEscape(String),

    #[error("rendered artifact path is absolute: {0}")]
    AbsolutePath(String),

    #[error("artifact already exists and force-overwrite is not set: {0}")]
    AlreadyExists(String),

    #[error("io error writing artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),
}
