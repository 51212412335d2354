//! The Evaluator-Optimizer pattern (§4.8.6): a producer/evaluator/optimizer
//! loop that terminates on a quality threshold or `max_iterations`,
//! returning the best-scoring output seen either way.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::EvaluatorOptimizerContext;
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::EvaluatorOptimizerConfig;

pub async fn execute(run: &Arc<RunContext>, cfg: &EvaluatorOptimizerConfig) -> Result<EvaluatorOptimizerContext, WorkflowError> {
    let mut ctx = EvaluatorOptimizerContext::default();

    for iteration in 0..cfg.max_iterations.max(1) {
        ctx.iteration = iteration + 1;

        let output = if iteration == 0 {
            let roots = run.base_roots();
            let rendered_input = run.render(&cfg.input, &roots)?;
            run.invoke(&cfg.producer_agent, "producer", &rendered_input).await?.response
        } else {
            let prior_output = ctx.current_output.clone().unwrap_or_default();
            let prior_evaluation = ctx
                .evaluation
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            let revise_prompt = format!(
                "Revise the following output using the evaluator's feedback.\n\nOutput:\n{prior_output}\n\nFeedback:\n{prior_evaluation}"
            );
            run.invoke(&cfg.optimizer_agent, "optimizer", &revise_prompt).await?.response
        };
        ctx.current_output = Some(output.clone());

        let evaluate_prompt =
            format!("Evaluate the following output and respond with a JSON object.\n\nOutput:\n{output}");
        let eval_outcome = run.invoke(&cfg.evaluator_agent, "evaluator", &evaluate_prompt).await?;
        let evaluation: Value =
            serde_json::from_str(&eval_outcome.response).unwrap_or_else(|_| Value::String(eval_outcome.response.clone()));
        ctx.evaluation = Some(evaluation.clone());

        let mut score_roots = HashMap::new();
        score_roots.insert("evaluation".to_string(), evaluation);
        let score_value = run.eval_value(&cfg.score_path, &score_roots)?;
        let score = score_value
            .as_f64()
            .ok_or_else(|| PatternError::NonNumericScore(cfg.score_path.clone()))?;
        ctx.score = Some(score);
        ctx.consider(output, score);

        if score >= cfg.quality_threshold {
            ctx.success = true;
            return Ok(ctx);
        }
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

    fn spec_with_loop() -> Spec {
        let yaml = r#"
version: 0
workflow_id: evaluator-optimizer-test
runtime:
  provider: mock
  model_id: mock-a
agents:
  producer:
    prompt: "produce"
  evaluator:
    prompt: "evaluate"
  optimizer:
    prompt: "optimize"
pattern:
  type: evaluator-optimizer
  config:
    producer_agent: producer
    evaluator_agent: evaluator
    optimizer_agent: optimizer
    input: "write a haiku"
    score_path: "evaluation.score"
    quality_threshold: 8
    max_iterations: 3
"#;
        Spec::from_yaml(yaml).unwrap()
    }

    fn pool(responses: Vec<MockResponse>) -> Arc<ModelPool> {
        let factory = MockProviderFactory::default();
        factory.register("mock-a", MockProvider::script(responses));
        let mut map: StdHashMap<String, Arc<dyn ProviderFactory>> = StdHashMap::new();
        map.insert("mock".to_string(), Arc::new(factory));
        Arc::new(ModelPool::new(map))
    }

    #[tokio::test]
    async fn three_scores_below_threshold_return_earliest_best_on_tie() {
        // S5: scores [5, 6, 7] over three iterations, threshold 8 never met.
        let spec = Arc::new(spec_with_loop());
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool(vec![
                MockResponse::text("draft-1"),
                MockResponse::text(r#"{"score": 5}"#),
                MockResponse::text("draft-2"),
                MockResponse::text(r#"{"score": 6}"#),
                MockResponse::text("draft-3"),
                MockResponse::text(r#"{"score": 7}"#),
            ]),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));
        let cfg = match &spec.pattern {
            PatternConfig::EvaluatorOptimizer(cfg) => cfg.clone(),
            _ => unreachable!(),
        };

        let ctx = execute(&run, &cfg).await.unwrap();
        assert_eq!(ctx.iteration, 3);
        assert!(!ctx.success);
        let (best_output, best_score) = ctx.best.unwrap();
        assert_eq!(best_output, "draft-3");
        assert_eq!(best_score, 7.0);
    }

    #[tokio::test]
    async fn threshold_met_returns_early_with_success() {
        let spec = Arc::new(spec_with_loop());
        let run = Arc::new(RunContext::new(
            spec.clone(),
            pool(vec![
                MockResponse::text("draft-1"),
                MockResponse::text(r#"{"score": 9}"#),
            ]),
            Arc::new(MockToolRegistry::default()),
            None,
            StdHashMap::new(),
        ));
        let cfg = match &spec.pattern {
            PatternConfig::EvaluatorOptimizer(cfg) => cfg.clone(),
            _ => unreachable!(),
        };

        let ctx = execute(&run, &cfg).await.unwrap();
        assert_eq!(ctx.iteration, 1);
        assert!(ctx.success);
        assert_eq!(ctx.best.unwrap().0, "draft-1");
    }
}
