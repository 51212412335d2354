use tokio::sync::mpsc;
use uuid::Uuid;

/// Structured span events emitted for observability (§6). The core never
/// assumes a tracing backend: callers supply an [`EventSink`] and do
/// whatever they like with what arrives on it (log, forward to an
/// exporter, assert on in tests).
#[derive(Debug, Clone)]
pub enum Event {
    WorkflowStart { run_id: Uuid },
    WorkflowEnd { run_id: Uuid },
    PatternStart { run_id: Uuid, pattern: &'static str },
    PatternEnd { run_id: Uuid, pattern: &'static str },
    StepStart { run_id: Uuid, step_ref: String, agent_id: String },
    StepEnd { run_id: Uuid, step_ref: String, agent_id: String },
    AgentInvokeAttempt { run_id: Uuid, step_ref: String, attempt: u32 },
    AgentInvokeSuccess { run_id: Uuid, step_ref: String },
    AgentInvokeFailure { run_id: Uuid, step_ref: String, reason: String },
    BudgetWarning { run_id: Uuid, tokens_used: u64, limit: u64 },
    BudgetExceeded { run_id: Uuid, reason: String },
    TemplateUndefined { run_id: Uuid, path: String },
    CacheHit { run_id: Uuid, key: String },
    CacheMiss { run_id: Uuid, key: String },
}

pub type EventSink = mpsc::UnboundedSender<Event>;

/// Sends `event`, silently dropping it if the caller's receiver has been
/// closed — an observer going away mid-run is not a reason to fail the
/// workflow.
pub fn emit(sink: Option<&EventSink>, event: Event) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
