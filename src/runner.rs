//! Ties the substrate (§4.3-4.6), caches, and event stream into one "run
//! context" value threaded explicitly through every pattern executor
//! (§9 "Ambient state" design note) — no global singleton, so parallel
//! workflow invocations stay isolated and tests stay deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent_cache::{fingerprint, AgentCache, AgentConfigFingerprint, AssembledAgent};
use crate::capability;
use crate::context::{ExecutionContext, StepOutcome};
use crate::error::{PatternError, WorkflowError};
use crate::events::{emit, Event, EventSink};
use crate::executors;
use crate::model_pool::ModelPool;
use crate::provider::{InferenceParams, ModelHandleKey};
use crate::schemas::Message;
use crate::spec::Spec;
use crate::substrate::{invoke_agent, BudgetLedger, CompactionHook, NotesHook};
use crate::template;
use crate::tools::{Tool, ToolError, ToolRegistry};

/// Everything a pattern executor needs to invoke agents, render
/// templates, and evaluate conditions, without reaching for global state.
pub struct RunContext {
    pub run_id: Uuid,
    pub spec: Arc<Spec>,
    pub cancel: CancellationToken,
    model_pool: Arc<ModelPool>,
    agent_cache: AgentCache,
    budget: BudgetLedger,
    compaction: CompactionHook,
    notes: NotesHook,
    tools: Arc<dyn ToolRegistry>,
    events: Option<EventSink>,
    strict_templates: bool,
    inputs: HashMap<String, Value>,
    histories: DashMap<AgentConfigFingerprint, Arc<AsyncMutex<Vec<Message>>>>,
    started_at: Instant,
}

impl RunContext {
    pub fn new(
        spec: Arc<Spec>,
        model_pool: Arc<ModelPool>,
        tools: Arc<dyn ToolRegistry>,
        events: Option<EventSink>,
        inputs: HashMap<String, Value>,
    ) -> Self {
        let budgets = spec.runtime.budgets.clone();
        let compaction = CompactionHook::new(spec.context_policy.compaction.clone());
        let strict_templates = spec.context_policy.strict_templates;
        Self {
            run_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            model_pool,
            agent_cache: AgentCache::new(),
            budget: BudgetLedger::new(budgets),
            compaction,
            notes: NotesHook::new(),
            tools,
            events,
            strict_templates,
            inputs,
            histories: DashMap::new(),
            started_at: Instant::now(),
            spec,
        }
    }

    pub fn emit(&self, event: Event) {
        emit(self.events.as_ref(), event);
    }

    pub fn agent_cache_len(&self) -> usize {
        self.agent_cache.len()
    }

    pub fn budget(&self) -> &BudgetLedger {
        &self.budget
    }

    pub fn notes(&self) -> &NotesHook {
        &self.notes
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// The base root map every template render and condition evaluation
    /// starts from: just the run's resolved input values, under `inputs`.
    pub fn base_roots(&self) -> HashMap<String, Value> {
        let mut roots = HashMap::new();
        let inputs: serde_json::Map<String, Value> = self.inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        roots.insert("inputs".to_string(), Value::Object(inputs));
        roots
    }

    /// Renders `template_src` against `roots`, honoring
    /// `context_policy.strict_templates` (§4.1): undefined references are
    /// fatal in strict mode, or surfaced as a non-fatal `template.undefined`
    /// event otherwise.
    pub fn render(&self, template_src: &str, roots: &HashMap<String, Value>) -> Result<String, WorkflowError> {
        let tmpl = template::Template::parse(template_src)?;
        let (rendered, undefined) = tmpl.render_reporting(roots, self.strict_templates)?;
        for path in undefined {
            self.emit(Event::TemplateUndefined { run_id: self.run_id, path });
        }
        Ok(rendered)
    }

    /// Evaluates a bare boolean expression (routing conditions, graph edge
    /// conditions) in the same non-strict mode as an undefined-tolerant
    /// render — a condition referencing an unset input is falsy, not fatal.
    pub fn eval_condition(&self, src: &str, roots: &HashMap<String, Value>) -> Result<bool, WorkflowError> {
        Ok(template::eval_condition(src, roots)?)
    }

    /// Evaluates a bare expression to its raw JSON value — used for
    /// `score_path` extraction against an evaluator's structured response.
    pub fn eval_value(&self, src: &str, roots: &HashMap<String, Value>) -> Result<Value, WorkflowError> {
        Ok(template::eval_expression(src, roots)?)
    }

    async fn resolve_agent(&self, agent_id: &str) -> Result<(Arc<AssembledAgent>, AgentConfigFingerprint), WorkflowError> {
        let agent_spec = self
            .spec
            .agents
            .get(agent_id)
            .ok_or_else(|| PatternError::UnknownAgent(agent_id.to_string()))?;

        let model_id = agent_spec.model_id.clone().unwrap_or_else(|| self.spec.runtime.model_id.clone());
        let handle_key = ModelHandleKey::new(
            self.spec.runtime.provider.clone(),
            model_id,
            self.spec.runtime.endpoint.clone(),
        );
        let inference = InferenceParams {
            values: agent_spec.inference.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let fp = fingerprint(agent_id, &agent_spec.prompt, &agent_spec.tools, &handle_key, &inference);

        if self.agent_cache.contains_fingerprint(fp) {
            self.emit(Event::CacheHit { run_id: self.run_id, key: agent_id.to_string() });
        } else {
            self.emit(Event::CacheMiss { run_id: self.run_id, key: agent_id.to_string() });
        }

        let model = self.model_pool.get_or_create(&handle_key).await?;
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(agent_spec.tools.len());
        for name in &agent_spec.tools {
            let tool = self
                .tools
                .lookup(name)
                .ok_or_else(|| ToolError::InvalidInput(format!("tool '{name}' not in registry")))?;
            tools.push(tool);
        }

        let agent_id_owned = agent_id.to_string();
        let system_prompt = agent_spec.prompt.clone();
        let assembled = self
            .agent_cache
            .get_or_build(fp, || async move {
                Ok::<_, WorkflowError>(AssembledAgent {
                    agent_id: agent_id_owned,
                    system_prompt,
                    tools,
                    model,
                    handle_key,
                })
            })
            .await?;

        Ok((assembled, fp))
    }

    async fn history_for(&self, fp: AgentConfigFingerprint) -> Arc<AsyncMutex<Vec<Message>>> {
        self.histories.entry(fp).or_insert_with(|| Arc::new(AsyncMutex::new(Vec::new()))).clone()
    }

    /// Invokes `agent_id` through the full substrate for one step/task/node,
    /// identified by `step_ref` for logging, notes, and events. This is the
    /// single path every pattern executor uses to talk to a model.
    pub async fn invoke(&self, agent_id: &str, step_ref: &str, rendered_input: &str) -> Result<StepOutcome, WorkflowError> {
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        self.emit(Event::StepStart {
            run_id: self.run_id,
            step_ref: step_ref.to_string(),
            agent_id: agent_id.to_string(),
        });

        let result = self.invoke_inner(agent_id, step_ref, rendered_input).await;

        match &result {
            Ok(_) => {
                self.emit(Event::StepEnd {
                    run_id: self.run_id,
                    step_ref: step_ref.to_string(),
                    agent_id: agent_id.to_string(),
                });
            }
            Err(err) => {
                self.emit(Event::AgentInvokeFailure {
                    run_id: self.run_id,
                    step_ref: step_ref.to_string(),
                    reason: err.to_string(),
                });
                if let WorkflowError::BudgetExceeded(reason) = err {
                    self.emit(Event::BudgetExceeded { run_id: self.run_id, reason: reason.to_string() });
                }
                // Fail-fast (§7): the first terminal error cancels the
                // workflow token so sibling branches/tasks stop at their
                // next suspension point.
                self.cancel.cancel();
            }
        }

        result
    }

    async fn invoke_inner(&self, agent_id: &str, step_ref: &str, rendered_input: &str) -> Result<StepOutcome, WorkflowError> {
        let (agent, fp) = self.resolve_agent(agent_id).await?;
        let history_lock = self.history_for(fp).await;
        let mut history = history_lock.lock().await;

        let summarizer = self.summarizer_for(&agent).await?;

        let outcome = invoke_agent(
            &agent,
            &mut history,
            rendered_input,
            &self.spec.runtime.failure_policy,
            &self.compaction,
            summarizer.as_ref(),
            &self.budget,
            &self.notes,
            step_ref,
            &|attempt| {
                self.emit(Event::AgentInvokeAttempt {
                    run_id: self.run_id,
                    step_ref: step_ref.to_string(),
                    attempt,
                });
            },
            &|| {
                self.emit(Event::AgentInvokeSuccess {
                    run_id: self.run_id,
                    step_ref: step_ref.to_string(),
                });
            },
        )
        .await?;

        if outcome.budget_warning {
            let (used_in, used_out, _) = self.budget.totals();
            self.emit(Event::BudgetWarning {
                run_id: self.run_id,
                tokens_used: used_in + used_out,
                limit: self.spec.runtime.budgets.max_tokens.unwrap_or_default(),
            });
        }

        Ok(StepOutcome::new(outcome.response_text, outcome.tokens_input, outcome.tokens_output)
            .with_tool_calls(&outcome.tool_calls))
    }

    /// Resolves the model client compaction should summarize with:
    /// `summarization_model` on the same provider when configured,
    /// otherwise the invoking agent's own model (§4.4).
    async fn summarizer_for(&self, agent: &AssembledAgent) -> Result<Arc<dyn crate::provider::ModelProvider>, WorkflowError> {
        let cfg = &self.spec.context_policy.compaction;
        if !cfg.enabled {
            return Ok(agent.model.clone());
        }
        match &cfg.summarization_model {
            Some(model_id) => {
                let key = ModelHandleKey::new(
                    self.spec.runtime.provider.clone(),
                    model_id.clone(),
                    self.spec.runtime.endpoint.clone(),
                );
                Ok(self.model_pool.get_or_create(&key).await?)
            }
            None => Ok(agent.model.clone()),
        }
    }
}

/// Everything a completed (or aborted) run hands back to its caller.
pub struct RunOutcome {
    pub context: ExecutionContext,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub steps: u64,
    pub artifacts_written: Vec<String>,
}

/// Loads nothing itself — `spec` is already parsed — but runs the full
/// lifecycle: capability gate, pattern dispatch, artifact rendering,
/// then teardown, in that order, regardless of success or failure
/// (§3 Lifecycle, §7 propagation policy).
pub async fn run_workflow(
    spec: Spec,
    model_pool: Arc<ModelPool>,
    tools: Arc<dyn ToolRegistry>,
    events: Option<EventSink>,
    inputs: HashMap<String, Value>,
    output_root: &std::path::Path,
    force_overwrite: bool,
) -> Result<RunOutcome, WorkflowError> {
    let report = capability::check(&spec, tools.as_ref());
    if report.is_fatal() {
        return Err(WorkflowError::Capability(report));
    }

    let spec = Arc::new(spec);
    let run = Arc::new(RunContext::new(spec.clone(), model_pool.clone(), tools, events, inputs));
    run.emit(Event::WorkflowStart { run_id: run.run_id });

    let pattern_name = executors::pattern_name(&spec.pattern);
    run.emit(Event::PatternStart { run_id: run.run_id, pattern: pattern_name });
    let dispatch_result = executors::dispatch(&run, &spec.pattern).await;
    run.emit(Event::PatternEnd { run_id: run.run_id, pattern: pattern_name });

    let outcome = match dispatch_result {
        Ok(context) => {
            let artifacts_written = crate::artifact::render_all(&spec, &context, run.base_roots(), output_root, force_overwrite)?;
            let (tokens_input, tokens_output, steps) = run.budget.totals();
            Ok(RunOutcome {
                context,
                tokens_input,
                tokens_output,
                steps,
                artifacts_written,
            })
        }
        Err(err) => Err(err),
    };

    model_pool.teardown().await;
    run.emit(Event::WorkflowEnd { run_id: run.run_id });

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Spec;
    use crate::testing::{MockProviderFactory, MockProvider, MockResponse, MockToolRegistry};
    use std::collections::HashMap as StdHashMap;

    fn factories(pairs: Vec<(&str, MockProvider)>) -> StdHashMap<String, Arc<dyn crate::provider::ProviderFactory>> {
        let factory = MockProviderFactory::default();
        for (model_id, provider) in pairs {
            factory.register(model_id, provider);
        }
        let mut map: StdHashMap<String, Arc<dyn crate::provider::ProviderFactory>> = StdHashMap::new();
        map.insert("mock".to_string(), Arc::new(factory));
        map
    }

    #[tokio::test]
    async fn s1_two_step_chain_caches_agent_and_model_once() {
        crate::testing::init_test_logging();
        let yaml = r#"
version: 0
workflow_id: s1
runtime:
  provider: mock
  model_id: mock-a
agents:
  a:
    prompt: "You are A"
  b:
    prompt: "You are B"
    model_id: mock-b
pattern:
  type: chain
  config:
    steps:
      - agent: a
        input: "Hello"
      - agent: b
        input: "Echo: {{ steps[0].response }}"
"#;
        let spec = Spec::from_yaml(yaml).unwrap();
        let pool = Arc::new(ModelPool::new(factories(vec![
            ("mock-a", MockProvider::script(vec![MockResponse::text("WORLD")])),
            ("mock-b", MockProvider::script(vec![MockResponse::text("ok")])),
        ])));
        let tools = Arc::new(MockToolRegistry::default());
        let dir = std::env::temp_dir().join(format!("agentflow-test-{}", Uuid::new_v4()));

        let outcome = run_workflow(spec, pool, tools, None, StdHashMap::new(), &dir, false)
            .await
            .unwrap();

        match outcome.context {
            ExecutionContext::Chain(chain) => {
                assert_eq!(chain.steps.len(), 2);
                assert_eq!(chain.steps[0].response, "WORLD");
                assert_eq!(chain.steps[1].response, "ok");
                assert_eq!(chain.last_response, Some("ok".to_string()));
            }
            _ => panic!("expected chain context"),
        }
    }

    #[tokio::test]
    async fn capability_gate_rejects_before_any_side_effects() {
        let yaml = r#"
version: 0
workflow_id: empty
runtime:
  provider: mock
  model_id: mock-a
agents: {}
pattern:
  type: chain
  config:
    steps: []
"#;
        let spec = Spec::from_yaml(yaml).unwrap();
        let pool = Arc::new(ModelPool::new(StdHashMap::new()));
        let tools = Arc::new(MockToolRegistry::default());
        let dir = std::env::temp_dir().join(format!("agentflow-test-{}", Uuid::new_v4()));

        let err = run_workflow(spec, pool, tools, None, StdHashMap::new(), &dir, false)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Capability(_)));
    }
}
