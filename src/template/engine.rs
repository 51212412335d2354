use std::collections::HashMap;

use serde_json::Value;

use super::ast::Template as ParsedTemplate;
use super::error::TemplateError;
use super::eval::Evaluator;
use super::parser;

/// A compiled template, ready to be rendered against any number of
/// contexts without re-parsing.
///
/// Used for both the agent-prompt templates (rendered once per step) and
/// the artifact path/content templates (rendered once per run), so parsing
/// is kept separate from rendering.
#[derive(Debug, Clone)]
pub struct Template {
    parsed: ParsedTemplate,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            parsed: parser::parse(source)?,
        })
    }

    /// Renders against `roots`, a map of top-level variable names to their
    /// JSON value. Unknown roots and unknown field accesses return an
    /// error — use [`Template::render_lenient`] for best-effort rendering.
    pub fn render(&self, roots: &HashMap<String, Value>) -> Result<String, TemplateError> {
        Evaluator::new(roots, true).render(&self.parsed)
    }

    /// Like [`Template::render`], but unknown roots and missing fields
    /// evaluate to `null` instead of erroring.
    pub fn render_lenient(&self, roots: &HashMap<String, Value>) -> Result<String, TemplateError> {
        Evaluator::new(roots, false).render(&self.parsed)
    }

    /// Renders in the mode selected by `strict`, plus the list of root
    /// names that turned out undefined (always empty when `strict` is
    /// true, since that path errors instead of collecting).
    pub fn render_reporting(
        &self,
        roots: &HashMap<String, Value>,
        strict: bool,
    ) -> Result<(String, Vec<String>), TemplateError> {
        let evaluator = Evaluator::new(roots, strict);
        let rendered = evaluator.render(&self.parsed)?;
        Ok((rendered, evaluator.take_undefined()))
    }
}

/// Parses and evaluates a bare expression (no `{{ }}`/`{% %}` wrapping) —
/// the dialect routing conditions, graph edge conditions, and evaluator
/// `score_path` expressions all share with template output tags (§4.1,
/// §4.8.2, §4.8.6). Non-strict: an unresolved root evaluates to `null`
/// rather than erroring, matching ordinary template rendering.
pub fn eval_expression(source: &str, roots: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    let expr = super::parser::parse_expr(source)?;
    Evaluator::new(roots, false).eval_standalone(&expr)
}

/// Like [`eval_expression`], coerced to a boolean via the same truthiness
/// rule the engine uses for `{% if %}` conditions.
pub fn eval_condition(source: &str, roots: &HashMap<String, Value>) -> Result<bool, TemplateError> {
    Ok(super::eval::truthy(&eval_expression(source, roots)?))
}

/// Convenience one-shot render for callers that don't need to reuse a
/// compiled template across invocations.
pub fn render(source: &str, roots: &HashMap<String, Value>) -> Result<String, TemplateError> {
    Template::parse(source)?.render(roots)
}
