//! The Parallel pattern (§4.8.3): independent branches run concurrently,
//! bounded by a semaphore, with an optional reduce step composing their
//! outputs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::ParallelContext;
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::{ParallelConfig, DEFAULT_MAX_PARALLEL_PARALLEL};

use super::chain;

pub async fn execute(run: &Arc<RunContext>, cfg: &ParallelConfig) -> Result<ParallelContext, WorkflowError> {
    let max_parallel = run.spec.runtime.max_parallel_or(DEFAULT_MAX_PARALLEL_PARALLEL);
    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut set = JoinSet::new();

    for branch in &cfg.branches {
        let run = run.clone();
        let branch = branch.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            if run.cancel.is_cancelled() {
                return (branch.id, Err(WorkflowError::Cancelled));
            }
            let step_ref_prefix = format!("branches.{}", branch.id);
            let result = chain::run_steps(&run, &branch.steps, &step_ref_prefix, &HashMap::new()).await;
            (branch.id, result)
        });
    }

    // Drain every spawned branch before deciding success/failure: a
    // sibling that already started keeps running to completion even
    // after the cancellation token fires (§7 "cancel, don't abort").
    let mut ctx = ParallelContext::default();
    let mut first_err: Option<WorkflowError> = None;
    while let Some(joined) = set.join_next().await {
        let (branch_id, result) = joined.expect("branch task panicked");
        match result {
            Ok(chain_ctx) => {
                if let Some(last) = chain_ctx.steps.last() {
                    ctx.branches.insert(branch_id, last.clone());
                }
            }
            Err(err) if first_err.is_none() => {
                first_err = Some(PatternError::BranchFailed(branch_id, Box::new(err)).into());
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
        ctx.reduce = Some(outcome);
    }

    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_pool::ModelPool;
    use crate::provider::ProviderFactory;
    use crate::spec::{PatternConfig, Spec};
    use crate::testing::{MockProvider, MockProviderFactory, MockResponse, MockToolRegistry};
    use std::collections::HashMap as StdHashMap;

    fn spec_with_branches() -> Spec {
        let yaml = r#"
version: 0
workflow_id: parallel-test
runtime:
  provider: mock
  model_id: mock-a
  max_parallel: 2
agents:
  a:
    prompt: "agent a"
  b:
    prompt: "agent b"
  reducer:
    prompt: "combine"
pattern:
  type: parallel
  config:
    branches:
      - id: one
        steps:
          - agent: a
            input: "do one"
      - id: two
        steps:
          - agent: b
            input: "do two"
    reduce:
      agent: reducer
      input: "{{ branches.one.response }} + {{ branches.two.response }}"
"#;
        Spec::from_yaml(yaml).unwrap()
    }

    fn pool() -> Arc<ModelPool> {
        let factory = MockProviderFactory::default();
        factory.register(
            "mock-a",
            MockProvider::script(vec![
                MockResponse::text("one-done"),
                MockResponse::text("two-done"),
                MockResponse::text("combined"),
            ]),
        );
        let mut map: StdHashMap<String, Arc<dyn ProviderFactory>> = StdHashMap::new();
        map.insert("mock".to_string(), Arc::new(factory));
        Arc::new(ModelPool::new(map))
    }

    #[tokio::test]
    async fn branches_populate_disjoint_keys_and_reduce_sees_both() {
        let spec = Arc::new(spec_with_branches());
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool(),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));
        let cfg = match &spec.pattern {
            PatternConfig::Parallel(cfg) => cfg.clone(),
            _ => unreachable!(),
        };

        let ctx = execute(&run, &cfg).await.unwrap();
        assert_eq!(ctx.branches.len(), 2);
        assert!(ctx.branches.contains_key("one"));
        assert!(ctx.branches.contains_key("two"));
        assert_eq!(ctx.reduce.unwrap().response, "combined");
    }
}
