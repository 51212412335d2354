//! The Workflow pattern (§4.8.4): a DAG of tasks, each depending on zero or
//! more others, run layer by layer with intra-layer concurrency bounded by
//! a semaphore.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::WorkflowContext;
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::{WorkflowConfig, WorkflowTask, DEFAULT_MAX_PARALLEL_WORKFLOW};

pub async fn execute(run: &Arc<RunContext>, cfg: &WorkflowConfig) -> Result<WorkflowContext, WorkflowError> {
    let layers = layer_tasks(&cfg.tasks)?;

    let max_parallel = run.spec.runtime.max_parallel_or(DEFAULT_MAX_PARALLEL_WORKFLOW);
    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut ctx = WorkflowContext::default();

    for layer in layers {
        let mut set = JoinSet::new();
        for task in layer {
            let run = run.clone();
            let task = task.clone();
            let semaphore = semaphore.clone();
            let base = ctx.to_roots(&run.base_roots());
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                if run.cancel.is_cancelled() {
                    return (task.id, Err(WorkflowError::Cancelled));
                }
                let result = run_task(&run, &task, &base).await;
                (task.id, result)
            });
        }

        let mut first_err: Option<WorkflowError> = None;
        while let Some(joined) = set.join_next().await {
            let (task_id, result) = joined.expect("task join panicked");
            match result {
                Ok(outcome) => {
                    ctx.tasks.insert(task_id, outcome);
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
    }

    Ok(ctx)
}

async fn run_task(
    run: &RunContext,
    task: &WorkflowTask,
    base: &HashMap<String, serde_json::Value>,
) -> Result<crate::context::StepOutcome, WorkflowError> {
    let rendered_input = run.render(&task.input, base)?;
    run.invoke(&task.agent, &format!("tasks.{}", task.id), &rendered_input).await
}

/// Builds a dependency graph over `tasks` and returns them grouped into
/// layers: each layer's tasks depend only on tasks in strictly earlier
/// layers, so every task in a layer can run concurrently (§4.8.4).
/// Rejects cycles and duplicate task ids before any task runs.
fn layer_tasks(tasks: &[WorkflowTask]) -> Result<Vec<Vec<WorkflowTask>>, WorkflowError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

    for task in tasks {
        if index_of.contains_key(&task.id) {
            return Err(PatternError::DuplicateTaskId(task.id.clone()).into());
        }
        index_of.insert(task.id.clone(), graph.add_node(task.id.clone()));
    }

    for task in tasks {
        let to = index_of[&task.id];
        for dep in &task.depends_on {
            let from = index_of
                .get(dep)
                .ok_or_else(|| PatternError::UnknownTaskDependency(dep.clone()))?;
            graph.add_edge(*from, to, ());
        }
    }

    let order = toposort(&graph, None).map_err(|_| PatternError::CyclicDependency)?;

    let by_id: HashMap<String, WorkflowTask> = tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
    let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
    for node in &order {
        let task_id = &graph[*node];
        let task = &by_id[task_id];
        let d = task
            .depends_on
            .iter()
            .map(|dep| depth[&index_of[dep]] + 1)
            .max()
            .unwrap_or(0);
        depth.insert(*node, d);
    }

    let max_depth = depth.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<WorkflowTask>> = vec![Vec::new(); max_depth + 1];
    for node in &order {
        let task_id = &graph[*node];
        layers[depth[node]].push(by_id[task_id].clone());
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, depends_on: &[&str]) -> WorkflowTask {
        WorkflowTask {
            id: id.to_string(),
            agent: "a".to_string(),
            input: "x".to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn independent_tasks_share_one_layer() {
        let layers = layer_tasks(&[task("a", &[]), task("b", &[])]).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 2);
    }

    #[test]
    fn dependent_task_lands_in_a_later_layer() {
        let layers = layer_tasks(&[task("a", &[]), task("b", &["a"])]).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0][0].id, "a");
        assert_eq!(layers[1][0].id, "b");
    }

    #[test]
    fn cycle_is_rejected() {
        let err = layer_tasks(&[task("a", &["b"]), task("b", &["a"])]).unwrap_err();
        assert!(matches!(err, WorkflowError::Pattern(PatternError::CyclicDependency)));
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let err = layer_tasks(&[task("a", &[]), task("a", &[])]).unwrap_err();
        assert!(matches!(err, WorkflowError::Pattern(PatternError::DuplicateTaskId(_))));
    }
}
