//! The retry/budget substrate: the single choke point every agent
//! invocation flows through (§4.3).
//!
//! Ordering is fixed and load-bearing: after each attempt, the compaction
//! hook runs first (it may shrink the conversation and therefore the
//! token count), then the budget ledger scores the response, then the
//! caller is free to update its execution context. Running budget
//! enforcement before compaction would abort workloads a summarization
//! pass could have kept alive (§9 "retry/compaction interleaving").
//!
//! A turn does not end at the first model response: if it requests tools,
//! `invoke_agent` resolves each by name against the agent's bound tools,
//! runs it, appends the result as a `Message::tool(...)` turn, and invokes
//! the model again with that turn in history — repeating until a response
//! carries no tool calls. Compaction and budget accounting run once per
//! underlying model call, not once per returned [`InvocationOutcome`], so
//! a tool-heavy turn is still metered turn by turn.

mod budget;
mod compaction;
mod notes;
mod retry;

pub use budget::{BudgetCheck, BudgetLedger};
pub use compaction::CompactionHook;
pub use notes::{JournalRecord, NotesHook};

use crate::agent_cache::AssembledAgent;
use crate::error::{BudgetError, WorkflowError};
use crate::provider::{InferenceParams, InvokeRequest, ModelProvider, ToolCall};
use crate::schemas::Message;
use crate::spec::FailurePolicy;
use crate::tools::ToolError;

/// Safety bound on how many tool-call round trips a single agent turn may
/// take before giving up. The spec gives tools no per-agent round limit of
/// their own (unlike Graph's `max_iterations`), so this is a mandatory,
/// non-configurable backstop against a model that never stops requesting
/// tools, not a budget the spec exposes.
const MAX_TOOL_ROUNDS: u32 = 25;

/// What one substrate-wrapped invocation produced, after compaction and
/// budget accounting have both run.
pub struct InvocationOutcome {
    pub response_text: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub tool_calls: Vec<ToolCall>,
    pub budget_warning: bool,
}

/// Runs one agent turn through the full substrate: retry-wrapped
/// invocation, then compaction, then budget scoring, then a notes-hook
/// append. `history` is mutated in place (the new turn's messages are
/// appended, and compaction may replace its oldest portion).
#[allow(clippy::too_many_arguments)]
pub async fn invoke_agent(
    agent: &AssembledAgent,
    history: &mut Vec<Message>,
    input: &str,
    policy: &FailurePolicy,
    compaction: &CompactionHook,
    summarizer: &dyn ModelProvider,
    ledger: &BudgetLedger,
    notes: &NotesHook,
    step_ref: &str,
    on_attempt: &dyn Fn(u32),
    on_success: &dyn Fn(),
) -> Result<InvocationOutcome, WorkflowError> {
    history.push(Message::human(input.to_string()));

    let tool_names: Vec<String> = agent.tools.iter().map(|t| t.name().to_string()).collect();

    let mut tokens_input_total = 0u64;
    let mut tokens_output_total = 0u64;
    let mut budget_warning = false;
    let mut executed_tool_calls: Vec<ToolCall> = Vec::new();
    let mut round: u32 = 0;

    loop {
        let messages_for_attempt = history.clone();

        let response = retry::with_retry(policy, |attempt_no| {
            log::debug!(
                "invoking agent '{}' for {} (attempt {})",
                agent.agent_id,
                step_ref,
                attempt_no
            );
            on_attempt(attempt_no);
            let request = InvokeRequest {
                messages: messages_for_attempt.clone(),
                tool_names: tool_names.clone(),
                inference: InferenceParams::default(),
            };
            async move { agent.model.invoke(request).await }
        })
        .await
        .map_err(WorkflowError::from)?;
        on_success();

        history.push(Message::ai(response.response_text.clone()));

        let estimated_tokens = history.iter().map(|m| m.content.len() as u64 / 4).sum();
        compaction
            .maybe_compact(history, estimated_tokens, summarizer)
            .await
            .map_err(WorkflowError::from)?;

        let check = ledger
            .record_invocation(response.tokens_input, response.tokens_output)
            .map_err(|e: BudgetError| WorkflowError::BudgetExceeded(e))?;
        budget_warning = budget_warning || check.newly_warned;
        tokens_input_total += response.tokens_input;
        tokens_output_total += response.tokens_output;

        notes
            .record(
                step_ref,
                &agent.agent_id,
                input,
                &response.response_text,
                response.tokens_input,
                response.tokens_output,
            )
            .await;

        if response.tool_calls.is_empty() {
            return Ok(InvocationOutcome {
                response_text: response.response_text,
                tokens_input: tokens_input_total,
                tokens_output: tokens_output_total,
                tool_calls: executed_tool_calls,
                budget_warning,
            });
        }

        round += 1;
        if round > MAX_TOOL_ROUNDS {
            return Err(ToolError::ExecutionFailed(format!(
                "agent '{}' requested tools for {MAX_TOOL_ROUNDS} consecutive turns without a final answer",
                agent.agent_id
            ))
            .into());
        }

        for tool_call in &response.tool_calls {
            let tool = agent
                .tools
                .iter()
                .find(|t| t.name() == tool_call.name)
                .ok_or_else(|| {
                    ToolError::InvalidInput(format!(
                        "agent '{}' requested tool '{}', which is not bound to it",
                        agent.agent_id, tool_call.name
                    ))
                })?;

            log::debug!("agent '{}' calling tool '{}'", agent.agent_id, tool_call.name);
            let result = tool.call(tool_call.arguments.clone()).await.map_err(WorkflowError::from)?;
            history.push(Message::tool(result.to_string()));
            executed_tool_calls.push(tool_call.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelHandleKey;
    use crate::spec::{BackoffMode, Budgets, CompactionConfig};
    use crate::testing::{MockProvider, MockResponse};
    use std::sync::Arc;

    fn agent_with(provider: MockProvider) -> AssembledAgent {
        AssembledAgent {
            agent_id: "writer".to_string(),
            system_prompt: "be terse".to_string(),
            tools: Vec::new(),
            model: Arc::new(provider),
            handle_key: ModelHandleKey::new("mock", "mock-large", None),
        }
    }

    #[tokio::test]
    async fn happy_path_records_tokens_and_notes() {
        let agent = agent_with(MockProvider::script(vec![MockResponse::text("hi there").with_tokens(10, 5)]));
        let mut history = Vec::new();
        let policy = FailurePolicy {
            retries: 0,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let compaction = CompactionHook::new(CompactionConfig {
            enabled: false,
            when_tokens_over: 0,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let summarizer = MockProvider::default();
        let ledger = BudgetLedger::new(Budgets {
            max_tokens: Some(1000),
            max_steps: None,
            max_duration_s: None,
            warn_threshold: 0.8,
        });
        let notes = NotesHook::new();

        let outcome = invoke_agent(
            &agent,
            &mut history,
            "hello",
            &policy,
            &compaction,
            &summarizer,
            &ledger,
            &notes,
            "steps[0]",
            &|_| {},
            &|| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.response_text, "hi there");
        assert_eq!(ledger.totals(), (10, 5, 1));
        assert_eq!(notes.records().await.len(), 1);
    }

    #[tokio::test]
    async fn budget_breach_surfaces_as_workflow_error() {
        let agent = agent_with(MockProvider::script(vec![MockResponse::text("x").with_tokens(2000, 0)]));
        let mut history = Vec::new();
        let policy = FailurePolicy {
            retries: 0,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let compaction = CompactionHook::new(CompactionConfig {
            enabled: false,
            when_tokens_over: 0,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let summarizer = MockProvider::default();
        let ledger = BudgetLedger::new(Budgets {
            max_tokens: Some(1000),
            max_steps: None,
            max_duration_s: None,
            warn_threshold: 0.8,
        });
        let notes = NotesHook::new();

        let err = invoke_agent(
            &agent,
            &mut history,
            "hello",
            &policy,
            &compaction,
            &summarizer,
            &ledger,
            &notes,
            "steps[0]",
            &|_| {},
            &|| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkflowError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn tool_call_is_dispatched_and_result_fed_back_to_the_model() {
        use crate::provider::ToolCall;
        use crate::testing::EchoTool;

        let mut agent = agent_with(MockProvider::script(vec![
            MockResponse::text("let me check").with_tool_calls(vec![ToolCall {
                name: "echo".to_string(),
                arguments: serde_json::json!({"value": "ping"}),
            }]),
            MockResponse::text("the tool said ping"),
        ]));
        agent.tools = vec![Arc::new(EchoTool::new("echo"))];

        let mut history = Vec::new();
        let policy = FailurePolicy {
            retries: 0,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let compaction = CompactionHook::new(CompactionConfig {
            enabled: false,
            when_tokens_over: 0,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let summarizer = MockProvider::default();
        let ledger = BudgetLedger::new(Budgets {
            max_tokens: None,
            max_steps: None,
            max_duration_s: None,
            warn_threshold: 0.8,
        });
        let notes = NotesHook::new();

        let outcome = invoke_agent(
            &agent,
            &mut history,
            "what's the ping status?",
            &policy,
            &compaction,
            &summarizer,
            &ledger,
            &notes,
            "steps[0]",
            &|_| {},
            &|| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.response_text, "the tool said ping");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "echo");
        // Both model turns' token usage is rolled into one outcome.
        assert_eq!(outcome.tokens_input, 20);
        assert_eq!(outcome.tokens_output, 20);
        // history now holds: human input, ai (tool request), tool result, ai (final).
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].message_type, crate::schemas::MessageType::Tool);
        assert_eq!(history[2].content, r#"{"value":"ping"}"#);
    }

    #[tokio::test]
    async fn unbound_tool_name_is_a_terminal_tool_error() {
        use crate::provider::ToolCall;

        let agent = agent_with(MockProvider::script(vec![MockResponse::text("calling").with_tool_calls(vec![ToolCall {
            name: "not_bound".to_string(),
            arguments: serde_json::Value::Null,
        }])]));

        let mut history = Vec::new();
        let policy = FailurePolicy {
            retries: 0,
            backoff: BackoffMode::Constant,
            wait_min_ms: 1,
            wait_max_ms: 1,
        };
        let compaction = CompactionHook::new(CompactionConfig {
            enabled: false,
            when_tokens_over: 0,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let summarizer = MockProvider::default();
        let ledger = BudgetLedger::new(Budgets {
            max_tokens: None,
            max_steps: None,
            max_duration_s: None,
            warn_threshold: 0.8,
        });
        let notes = NotesHook::new();

        let err = invoke_agent(
            &agent,
            &mut history,
            "hello",
            &policy,
            &compaction,
            &summarizer,
            &ledger,
            &notes,
            "steps[0]",
            &|_| {},
            &|| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkflowError::Tool(ToolError::InvalidInput(_))));
    }
}
