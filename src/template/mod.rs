//! Sandboxed expression template engine used to render agent prompts and
//! output artifact paths/content.
//!
//! The grammar is fixed and small on purpose: `{{ expr }}` output tags,
//! `{% if %}`/`{% elif %}`/`{% else %}`/`{% endif %}` conditionals, `{% for
//! x in xs %}`/`{% endfor %}` loops, a handful of filters, and comparison /
//! boolean operators over JSON values. There is no way to call into Rust,
//! read a file, or reach outside the context map handed to [`Template::render`] —
//! this is deliberate, since template sources can come from a workflow spec
//! document authored by someone other than the crate's caller.

mod ast;
mod engine;
mod error;
mod eval;
mod filters;
mod parser;

pub use engine::{eval_condition, eval_expression, render, Template};
pub use error::{TemplateError, TemplateSecurityError};
