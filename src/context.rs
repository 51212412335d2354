use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ToolCall;

/// One agent invocation's recorded output, the unit every pattern-specific
/// context shape is built from (§3's `{response, tokens, metadata}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub response: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl StepOutcome {
    pub fn new(response: impl Into<String>, tokens_input: u64, tokens_output: u64) -> Self {
        Self {
            response: response.into(),
            tokens_input,
            tokens_output,
            metadata: HashMap::new(),
        }
    }

    /// Records the names of tools actually executed during this turn
    /// (§4.3: the substrate resolves and runs each requested tool before
    /// the turn is considered complete) as `metadata.tool_calls`, visible
    /// to templates referencing this step/task/branch/node.
    pub fn with_tool_calls(mut self, tool_calls: &[ToolCall]) -> Self {
        if !tool_calls.is_empty() {
            let names: Vec<Value> = tool_calls.iter().map(|c| Value::String(c.name.clone())).collect();
            self.metadata.insert("tool_calls".to_string(), Value::Array(names));
        }
        self
    }

    /// Renders as the JSON shape template expressions see at
    /// `steps[i]`/`tasks.<id>`/`branches.<id>`/`nodes.<id>`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Execution Context grows monotonically within one run: fields are only
/// appended to or inserted into, per-pattern shape is fixed at executor
/// start, and a completed entry is never mutated (§3 invariants). Each
/// variant corresponds to exactly one pattern executor's view.
#[derive(Debug, Clone)]
pub enum ExecutionContext {
    Chain(ChainContext),
    Routing(RoutingContext),
    Parallel(ParallelContext),
    Workflow(WorkflowContext),
    Graph(GraphContext),
    EvaluatorOptimizer(EvaluatorOptimizerContext),
    OrchestratorWorkers(OrchestratorWorkersContext),
}

#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    pub steps: Vec<StepOutcome>,
    pub last_response: Option<String>,
}

impl ChainContext {
    pub fn push(&mut self, outcome: StepOutcome) {
        self.last_response = Some(outcome.response.clone());
        self.steps.push(outcome);
    }

    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        let steps: Vec<Value> = self.steps.iter().map(StepOutcome::to_value).collect();
        roots.insert("steps".to_string(), Value::Array(steps));
        roots.insert(
            "last_response".to_string(),
            self.last_response
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        roots
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub classification: Option<String>,
    pub selected_route: Option<String>,
    pub route_output: Option<ChainContext>,
}

impl RoutingContext {
    /// Roots visible while evaluating a route condition: just
    /// `classification` layered over the run's inputs (§4.8.2 — conditions
    /// are "a boolean expression over the classification and inputs").
    pub fn condition_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        roots.insert(
            "classification".to_string(),
            self.classification.clone().map(Value::String).unwrap_or(Value::Null),
        );
        roots
    }

    /// Full post-execution roots: classification, the selected route's
    /// name, and everything the inner chain exposes (`steps`,
    /// `last_response`), for artifact templates and downstream tooling.
    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = match &self.route_output {
            Some(inner) => inner.to_roots(base),
            None => base.clone(),
        };
        roots.insert(
            "classification".to_string(),
            self.classification.clone().map(Value::String).unwrap_or(Value::Null),
        );
        roots.insert(
            "selected_route".to_string(),
            self.selected_route.clone().map(Value::String).unwrap_or(Value::Null),
        );
        roots
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParallelContext {
    pub branches: HashMap<String, StepOutcome>,
    pub reduce: Option<StepOutcome>,
}

impl ParallelContext {
    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        let branches: serde_json::Map<String, Value> = self
            .branches
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        roots.insert("branches".to_string(), Value::Object(branches));
        if let Some(reduce) = &self.reduce {
            roots.insert("reduce".to_string(), reduce.to_value());
        }
        roots
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub tasks: HashMap<String, StepOutcome>,
}

impl WorkflowContext {
    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        let tasks: serde_json::Map<String, Value> = self
            .tasks
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        roots.insert("tasks".to_string(), Value::Object(tasks));
        roots
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub nodes: HashMap<String, StepOutcome>,
    pub execution_path: Vec<String>,
    pub iteration: u64,
}

impl GraphContext {
    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        let nodes: serde_json::Map<String, Value> = self
            .nodes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        roots.insert("nodes".to_string(), Value::Object(nodes));
        roots.insert(
            "execution_path".to_string(),
            Value::Array(self.execution_path.iter().cloned().map(Value::String).collect()),
        );
        roots.insert("iteration".to_string(), Value::Number(self.iteration.into()));
        roots
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluatorOptimizerContext {
    pub iteration: u64,
    pub current_output: Option<String>,
    pub evaluation: Option<Value>,
    pub score: Option<f64>,
    pub best: Option<(String, f64)>,
    /// True only when `quality_threshold` was met before `max_iterations`
    /// ran out; a run that exhausts its budget still returns `best` with
    /// this left false (§4.8.6 scenario S5).
    pub success: bool,
}

impl EvaluatorOptimizerContext {
    /// Ties keep the earliest best score (§8 invariant 8): a later
    /// iteration with an equal score must not replace it.
    pub fn consider(&mut self, output: String, score: f64) {
        let replace = match &self.best {
            Some((_, best_score)) => score > *best_score,
            None => true,
        };
        if replace {
            self.best = Some((output, score));
        }
    }

    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        roots.insert("iteration".to_string(), Value::Number(self.iteration.into()));
        roots.insert(
            "current_output".to_string(),
            self.current_output.clone().map(Value::String).unwrap_or(Value::Null),
        );
        roots.insert(
            "evaluation".to_string(),
            self.evaluation.clone().unwrap_or(Value::Null),
        );
        roots.insert(
            "score".to_string(),
            self.score
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        roots.insert("success".to_string(), Value::Bool(self.success));
        roots
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorWorkersContext {
    pub plan: Vec<PlannedTask>,
    pub worker_results: HashMap<String, StepOutcome>,
    pub reduced: Option<StepOutcome>,
}

impl OrchestratorWorkersContext {
    pub fn to_roots(&self, base: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut roots = base.clone();
        let worker_results: serde_json::Map<String, Value> = self
            .worker_results
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        roots.insert("worker_results".to_string(), Value::Object(worker_results));
        if let Some(reduced) = &self.reduced {
            roots.insert("reduced".to_string(), reduced.to_value());
        }
        roots
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub worker_id: String,
    pub input: String,
}
