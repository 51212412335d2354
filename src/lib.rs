//! Execution core for declarative multi-agent LLM workflows.
//!
//! A [`Spec`] describes one of seven coordination patterns — chain,
//! routing, parallel, workflow (DAG), graph, evaluator-optimizer,
//! orchestrator-workers — over a set of named agents. [`run_workflow`]
//! loads it through the capability gate, the pattern executors in
//! [`executors`], and the artifact renderer, sharing one substrate
//! (template engine, model pool, agent cache, retry/budget enforcement,
//! compaction, notes) across every pattern.

pub mod agent_cache;
pub mod artifact;
pub mod capability;
pub mod context;
pub mod error;
pub mod events;
pub mod executors;
pub mod model_pool;
pub mod provider;
pub mod runner;
pub mod schemas;
pub mod spec;
pub mod substrate;
pub mod template;
pub mod tools;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ArtifactError, BudgetError, PatternError, SpecError, WorkflowError};
pub use events::{Event, EventSink};
pub use runner::{run_workflow, RunContext, RunOutcome};
pub use spec::Spec;
