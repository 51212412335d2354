//! The Chain pattern (§4.8.1): a fixed sequence of steps, each one's input
//! template rendered against everything executed so far.
//!
//! `run_steps` is the reusable core: Routing's inner chain (§4.8.2) and
//! Parallel's branches (§4.8.3) are themselves chains, so both call back
//! into this module rather than duplicating the render-then-invoke loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::ChainContext;
use crate::error::{PatternError, WorkflowError};
use crate::runner::RunContext;
use crate::spec::{ChainConfig, ChainStep};

pub async fn execute(run: &Arc<RunContext>, cfg: &ChainConfig) -> Result<ChainContext, WorkflowError> {
    if cfg.steps.is_empty() {
        return Err(PatternError::EmptyChain.into());
    }
    run_steps(run, &cfg.steps, "steps", &HashMap::new()).await
}

/// Runs `steps` in order, threading a growing [`ChainContext`] through each
/// step's input render. `step_ref_prefix` names the steps in events and
/// notes (plain `"steps"` for a top-level chain, `"routes.<name>"` for a
/// routed inner chain, `"branches.<id>"` for a parallel branch);
/// `extra_roots` layers any pattern-specific roots (e.g. a route's
/// `classification`) under the base inputs before the chain's own
/// `steps`/`last_response` roots are added.
pub(crate) async fn run_steps(
    run: &Arc<RunContext>,
    steps: &[ChainStep],
    step_ref_prefix: &str,
    extra_roots: &HashMap<String, Value>,
) -> Result<ChainContext, WorkflowError> {
    let mut ctx = ChainContext::default();
    for (index, step) in steps.iter().enumerate() {
        let mut base = run.base_roots();
        base.extend(extra_roots.clone());
        let roots = ctx.to_roots(&base);

        let rendered_input = run.render(&step.input, &roots)?;
        let step_ref = format!("{step_ref_prefix}[{index}]");
        let outcome = run.invoke(&step.agent, &step_ref, &rendered_input).await?;
        ctx.push(outcome);
    }
    Ok(ctx)
}
