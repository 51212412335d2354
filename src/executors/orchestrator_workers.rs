//! The Orchestrator-Workers pattern (§4.8.7): an orchestrator agent emits a
//! plan of worker tasks, workers run concurrently, and an optional reduce
//! step composes the final answer. Multi-round orchestration is rejected
//! at the capability gate, so this executor only ever runs one planning
//! round.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::{OrchestratorWorkersContext, PlannedTask};
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::{OrchestratorWorkersConfig, DEFAULT_MAX_PARALLEL_ORCHESTRATOR};

pub async fn execute(run: &Arc<RunContext>, cfg: &OrchestratorWorkersConfig) -> Result<OrchestratorWorkersContext, WorkflowError> {
    let mut ctx = OrchestratorWorkersContext::default();

    let base = run.base_roots();
    let rendered_input = run.render(&cfg.input, &base)?;
    let plan_outcome = run.invoke(&cfg.orchestrator_agent, "orchestrator", &rendered_input).await?;

    let plan: Vec<PlannedTask> = serde_json::from_str(&plan_outcome.response)
        .map_err(|err| PatternError::UnparseablePlan(err.to_string()))?;

    for task in &plan {
        if !cfg.worker_agents.iter().any(|w| w == &task.worker_id) {
            return Err(PatternError::UnknownWorker(task.worker_id.clone()).into());
        }
    }
    ctx.plan = plan.clone();

    let max_parallel = run.spec.runtime.max_parallel_or(DEFAULT_MAX_PARALLEL_ORCHESTRATOR);
    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut set = JoinSet::new();

    for task in plan {
        let run = run.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            if run.cancel.is_cancelled() {
                return (task.id, Err(WorkflowError::Cancelled));
            }
            let step_ref = format!("workers.{}", task.id);
            let result = run.invoke(&task.worker_id, &step_ref, &task.input).await;
            (task.id, result)
        });
    }

    let mut first_err: Option<WorkflowError> = None;
    while let Some(joined) = set.join_next().await {
        let (task_id, result) = joined.expect("worker task panicked");
        match result {
            Ok(outcome) => {
                ctx.worker_results.insert(task_id, outcome);
            }
            Err(err) if first_err.is_none() => {
                first_err = Some(PatternError::TaskFailed(task_id, Box::new(err)).into());
            }
            Err(_) => {}
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    if let Some(reduce_step) = &cfg.reduce {
        let roots = ctx.to_roots(&run.base_roots());
        let rendered = run.render(&reduce_step.input, &roots)?;
        let outcome = run.invoke(&reduce_step.agent, "reduce", &rendered).await?;
        ctx.reduced = Some(outcome);
    }

    Ok(ctx)
}
