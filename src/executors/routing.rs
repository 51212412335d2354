//! The Routing pattern (§4.8.2): a router agent classifies the input, the
//! first route whose condition matches runs its own inner chain.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RoutingContext;
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::{Route, RoutingConfig};

use super::chain;

pub async fn execute(run: &Arc<RunContext>, cfg: &RoutingConfig) -> Result<RoutingContext, WorkflowError> {
    let mut ctx = RoutingContext::default();

    let base = run.base_roots();
    let rendered_input = run.render(&cfg.input, &base)?;
    let classification = run.invoke(&cfg.router_agent, "router", &rendered_input).await?;
    ctx.classification = Some(classification.response.clone());

    let condition_roots = ctx.condition_roots(&base);
    let route = select_route(&cfg.routes, cfg.default_route.as_deref(), run, &condition_roots)?;

    ctx.selected_route = Some(route.name.clone());
    let step_ref_prefix = format!("routes.{}", route.name);
    let route_output = chain::run_steps(run, &route.steps, &step_ref_prefix, &HashMap::new()).await?;
    ctx.route_output = Some(route_output);

    Ok(ctx)
}

/// Picks the first route (in spec declaration order) whose condition
/// evaluates truthy; falls back to `default_route` by name when none
/// matches, and fails with `NoRouteMatched` when neither applies (§4.8.2).
fn select_route<'a>(
    routes: &'a [Route],
    default_route: Option<&str>,
    run: &RunContext,
    condition_roots: &HashMap<String, serde_json::Value>,
) -> Result<&'a Route, WorkflowError> {
    for route in routes {
        if run.eval_condition(&route.condition, condition_roots)? {
            return Ok(route);
        }
    }
    if let Some(name) = default_route {
        if let Some(route) = routes.iter().find(|r| r.name == name) {
            return Ok(route);
        }
    }
    Err(PatternError::NoRouteMatched.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_pool::ModelPool;
    use crate::provider::ProviderFactory;
    use crate::spec::{PatternConfig, Spec};
    use crate::testing::{MockProvider, MockProviderFactory, MockResponse, MockToolRegistry};
    use std::collections::HashMap as StdHashMap;

    fn spec_with_routes() -> Spec {
        let yaml = r#"
version: 0
workflow_id: routing-test
runtime:
  provider: mock
  model_id: mock-router
agents:
  router:
    prompt: "classify"
  billing_agent:
    prompt: "handle billing"
  fallback_agent:
    prompt: "handle anything"
pattern:
  type: routing
  config:
    router_agent: router
    input: "{{ inputs.question }}"
    routes:
      - name: billing
        condition: "classification == \"billing\""
        steps:
          - agent: billing_agent
            input: "resolve billing"
      - name: other
        condition: "false"
        steps:
          - agent: fallback_agent
            input: "resolve other"
    default_route: other
"#;
        Spec::from_yaml(yaml).unwrap()
    }

    fn pool_with(router_response: &str, billing_response: &str, fallback_response: &str) -> Arc<ModelPool> {
        let factory = MockProviderFactory::default();
        factory.register("mock-router", MockProvider::script(vec![
            MockResponse::text(router_response),
            MockResponse::text(billing_response),
            MockResponse::text(fallback_response),
        ]));
        let mut map: StdHashMap<String, Arc<dyn ProviderFactory>> = StdHashMap::new();
        map.insert("mock".to_string(), Arc::new(factory));
        Arc::new(ModelPool::new(map))
    }

    #[tokio::test]
    async fn matching_route_runs_its_inner_chain() {
        let spec = Arc::new(spec_with_routes());
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool_with("billing", "billing handled", "unused"),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));
        let cfg = match &spec.pattern {
            PatternConfig::Routing(cfg) => cfg.clone(),
            _ => unreachable!(),
        };

        let ctx = execute(&run, &cfg).await.unwrap();
        assert_eq!(ctx.selected_route, Some("billing".to_string()));
        assert_eq!(
            ctx.route_output.unwrap().last_response,
            Some("billing handled".to_string())
        );
    }

    #[tokio::test]
    async fn unmatched_route_falls_back_to_default() {
        let spec = Arc::new(spec_with_routes());
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool_with("something_else", "unused", "fallback handled"),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));
        let cfg = match &spec.pattern {
            PatternConfig::Routing(cfg) => cfg.clone(),
            _ => unreachable!(),
        };

        let ctx = execute(&run, &cfg).await.unwrap();
        assert_eq!(ctx.selected_route, Some("other".to_string()));
        assert_eq!(
            ctx.route_output.unwrap().last_response,
            Some("fallback handled".to_string())
        );
    }
}
