//! The Artifact Renderer (§4.10, L5): writes declared output artifacts by
//! rendering their `path` and `from` templates against the final Execution
//! Context, with atomic, traversal-safe file writes.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{ArtifactError, WorkflowError};
use crate::spec::Spec;
use crate::template::Template;

/// Renders and writes every artifact declared in `spec.outputs.artifacts`
/// against `context`, returning the relative paths written (in
/// declaration order). `base_roots` carries the run's resolved inputs;
/// the pattern-specific roots are layered over it per artifact.
pub fn render_all(
    spec: &Spec,
    context: &ExecutionContext,
    base_roots: HashMap<String, Value>,
    output_root: &Path,
    force: bool,
) -> Result<Vec<String>, WorkflowError> {
    let roots = context_roots(context, &base_roots);
    let mut written = Vec::with_capacity(spec.outputs.artifacts.len());

    for artifact in &spec.outputs.artifacts {
        let path_tmpl = Template::parse(&artifact.path).map_err(ArtifactError::from)?;
        let rendered_path = path_tmpl.render(&roots).map_err(ArtifactError::from)?;

        let content_tmpl = Template::parse(&artifact.from).map_err(ArtifactError::from)?;
        let rendered_content = content_tmpl.render(&roots).map_err(ArtifactError::from)?;

        let target = resolve_under_root(output_root, &rendered_path)?;
        write_atomically(&target, &rendered_content, force)?;
        written.push(rendered_path);
    }

    Ok(written)
}

/// Builds the full template root map for whichever pattern produced
/// `context` — each variant knows its own completed shape (§3/§4.8).
fn context_roots(context: &ExecutionContext, base: &HashMap<String, Value>) -> HashMap<String, Value> {
    match context {
        ExecutionContext::Chain(c) => c.to_roots(base),
        ExecutionContext::Routing(c) => c.to_roots(base),
        ExecutionContext::Parallel(c) => c.to_roots(base),
        ExecutionContext::Workflow(c) => c.to_roots(base),
        ExecutionContext::Graph(c) => c.to_roots(base),
        ExecutionContext::EvaluatorOptimizer(c) => c.to_roots(base),
        ExecutionContext::OrchestratorWorkers(c) => c.to_roots(base),
    }
}

/// Normalizes `rendered_path` against `root`, rejecting anything absolute
/// or that escapes `root` via `..` (§4.10 invariant: artifacts never write
/// outside the declared output directory).
fn resolve_under_root(root: &Path, rendered_path: &str) -> Result<PathBuf, ArtifactError> {
    let candidate = Path::new(rendered_path);
    if candidate.is_absolute() {
        return Err(ArtifactError::AbsolutePath(rendered_path.to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ArtifactError::PathEscape(rendered_path.to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArtifactError::AbsolutePath(rendered_path.to_string()));
            }
        }
    }

    Ok(root.join(normalized))
}

/// Writes `content` to `target` via a temp-file-then-rename, so a reader
/// never observes a partially written artifact. Refuses to clobber an
/// existing file unless `force` is set (§4.10).
fn write_atomically(target: &Path, content: &str, force: bool) -> Result<(), ArtifactError> {
    if target.exists() && !force {
        return Err(ArtifactError::AlreadyExists(target.display().to_string()));
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
            path: target.display().to_string(),
            source,
        })?;
    }

    let mut tmp_name = target.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, content).map_err(|source| ArtifactError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, target).map_err(|source| ArtifactError::Io {
        path: target.display().to_string(),
        source,
    })?;

    Ok(())
}
