//! The Graph pattern (§4.8.5): agent nodes connected by conditional edges,
//! traversed one node at a time from `start_node` until an end node, a
//! stall (no edge condition satisfied), or `max_iterations` is reached.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::GraphContext;
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::{GraphConfig, GraphNode};

pub async fn execute(run: &Arc<RunContext>, cfg: &GraphConfig) -> Result<GraphContext, WorkflowError> {
    let nodes: HashMap<&str, &GraphNode> = cfg.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    validate(cfg, &nodes)?;

    let mut ctx = GraphContext::default();
    let mut current = cfg.start_node.clone();

    // `iteration` counts edge traversals, not node visits: the start node
    // is visited for free (iteration stays 0) and each subsequent hop
    // increments it once. This keeps `iteration` equal to the number of
    // routing decisions made, matching the node-count-minus-one a spec
    // author reasons about when picking `max_iterations` (§8 scenario S4).
    loop {
        let node = nodes[current.as_str()];
        let roots = ctx.to_roots(&run.base_roots());
        let rendered_input = run.render(&node.input, &roots)?;
        let outcome = run.invoke(&node.agent, &format!("nodes.{}", node.id), &rendered_input).await?;
        ctx.nodes.insert(node.id.clone(), outcome);
        ctx.execution_path.push(node.id.clone());

        if cfg.end_nodes.iter().any(|end| end == &node.id) {
            return Ok(ctx);
        }

        let roots = ctx.to_roots(&run.base_roots());
        let next = match next_node(run, node, &roots)? {
            Some(next) => next,
            // No edge condition was satisfied: traversal stalls. This is
            // a valid terminal state, not an error (§4.8.5 open question).
            None => return Ok(ctx),
        };

        if ctx.iteration >= cfg.max_iterations {
            return Err(PatternError::MaxIterationsExceeded(cfg.max_iterations).into());
        }
        ctx.iteration += 1;
        current = next;
    }
}

fn next_node(run: &RunContext, node: &GraphNode, roots: &HashMap<String, Value>) -> Result<Option<String>, WorkflowError> {
    for edge in &node.edges {
        let satisfied = match &edge.condition {
            Some(expr) => run.eval_condition(expr, roots)?,
            None => true,
        };
        if satisfied {
            if let Some(target) = edge.targets.first() {
                return Ok(Some(target.clone()));
            }
        }
    }
    Ok(None)
}

fn validate(cfg: &GraphConfig, nodes: &HashMap<&str, &GraphNode>) -> Result<(), WorkflowError> {
    if !nodes.contains_key(cfg.start_node.as_str()) {
        return Err(PatternError::UnknownNode(cfg.start_node.clone()).into());
    }
    for end in &cfg.end_nodes {
        if !nodes.contains_key(end.as_str()) {
            return Err(PatternError::UnknownNode(end.clone()).into());
        }
    }
    for node in nodes.values() {
        for edge in &node.edges {
            for target in &edge.targets {
                if !nodes.contains_key(target.as_str()) {
                    return Err(PatternError::UnknownNode(target.clone()).into());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_pool::ModelPool;
    use crate::provider::ProviderFactory;
    use crate::spec::{PatternConfig, Spec};
    use crate::testing::{MockProvider, MockProviderFactory, MockResponse, MockToolRegistry};
    use std::collections::HashMap as StdHashMap;

    fn spec_with_loop() -> Spec {
        let yaml = r#"
version: 0
workflow_id: graph-test
runtime:
  provider: mock
  model_id: mock-a
agents:
  a:
    prompt: "agent a"
pattern:
  type: graph
  config:
    start_node: start
    end_nodes: [done]
    max_iterations: 5
    nodes:
      - id: start
        agent: a
        input: "go"
        edges:
          - targets: [done]
            condition: "nodes.start.response == \"finish\""
          - targets: [start]
      - id: done
        agent: a
        input: "wrap up"
"#;
        Spec::from_yaml(yaml).unwrap()
    }

    fn pool(responses: Vec<&str>) -> Arc<ModelPool> {
        let factory = MockProviderFactory::default();
        factory.register(
            "mock-a",
            MockProvider::script(responses.into_iter().map(MockResponse::text).collect()),
        );
        let mut map: StdHashMap<String, Arc<dyn ProviderFactory>> = StdHashMap::new();
        map.insert("mock".to_string(), Arc::new(factory));
        Arc::new(ModelPool::new(map))
    }

    #[tokio::test]
    async fn traversal_ends_at_declared_end_node() {
        let spec = Arc::new(spec_with_loop());
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool(vec!["not yet", "finish", "wrapped"]),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));
        let cfg = match &spec.pattern {
            PatternConfig::Graph(cfg) => cfg.clone(),
            _ => unreachable!(),
        };

        let ctx = execute(&run, &cfg).await.unwrap();
        assert_eq!(ctx.execution_path, vec!["start", "start", "done"]);
        assert_eq!(ctx.nodes["done"].response, "wrapped");
        assert_eq!(ctx.iteration, 2, "iteration counts edge traversals, not node visits");
    }

    #[tokio::test]
    async fn unknown_start_node_is_rejected_before_any_invocation() {
        let spec = Arc::new(spec_with_loop());
        let mut cfg = match &spec.pattern {
            PatternConfig::Graph(cfg) => cfg.clone(),
            _ => unreachable!(),
        };
        cfg.start_node = "missing".to_string();
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool(vec![]),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));

        let err = execute(&run, &cfg).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Pattern(PatternError::UnknownNode(_))));
    }
}
