//! The seven pattern executors (§4.8), dispatched from one entry point.
//!
//! Every executor takes `&Arc<RunContext>` rather than `&RunContext`: the
//! parallel-capable ones (Parallel, Workflow, Orchestrator-Workers) need to
//! clone the run into spawned tasks, and a uniform signature across all
//! seven keeps the dispatcher a plain match rather than a per-pattern
//! special case.

mod chain;
mod evaluator_optimizer;
mod graph;
mod orchestrator_workers;
mod parallel;
mod routing;
mod workflow;

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::WorkflowError;
use crate::runner::RunContext;
use crate::spec::PatternConfig;

/// The `&'static str` carried on `Event::PatternStart`/`PatternEnd` —
/// purely a label, has no bearing on dispatch.
pub fn pattern_name(pattern: &PatternConfig) -> &'static str {
    match pattern {
        PatternConfig::Chain(_) => "chain",
        PatternConfig::Routing(_) => "routing",
        PatternConfig::Parallel(_) => "parallel",
        PatternConfig::Workflow(_) => "workflow",
        PatternConfig::Graph(_) => "graph",
        PatternConfig::EvaluatorOptimizer(_) => "evaluator-optimizer",
        PatternConfig::OrchestratorWorkers(_) => "orchestrator-workers",
    }
}

/// Runs the pattern named by `pattern` against `run`, returning the final
/// Execution Context on success. Every pattern-structural error
/// (unresolved reference, cycle, unmatched route, ...) surfaces here;
/// `run` already carries the fail-fast cancellation token each executor
/// honors internally.
pub async fn dispatch(run: &Arc<RunContext>, pattern: &PatternConfig) -> Result<ExecutionContext, WorkflowError> {
    match pattern {
        PatternConfig::Chain(cfg) => chain::execute(run, cfg).await.map(ExecutionContext::Chain),
        PatternConfig::Routing(cfg) => routing::execute(run, cfg).await.map(ExecutionContext::Routing),
        PatternConfig::Parallel(cfg) => parallel::execute(run, cfg).await.map(ExecutionContext::Parallel),
        PatternConfig::Workflow(cfg) => workflow::execute(run, cfg).await.map(ExecutionContext::Workflow),
        PatternConfig::Graph(cfg) => graph::execute(run, cfg).await.map(ExecutionContext::Graph),
        PatternConfig::EvaluatorOptimizer(cfg) => evaluator_optimizer::execute(run, cfg)
            .await
            .map(ExecutionContext::EvaluatorOptimizer),
        PatternConfig::OrchestratorWorkers(cfg) => orchestrator_workers::execute(run, cfg)
            .await
            .map(ExecutionContext::OrchestratorWorkers),
    }
}
