use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Errors raised while parsing or rendering a template.
///
/// `Security` covers an expression that tried to reach outside the
/// sandboxed variable namespace — an attribute/index chain rooted at
/// something other than a recognized top-level name — which is a
/// distinct failure mode from a plain syntax error.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of template")]
    UnexpectedEof,

    #[error("unclosed tag: expected '{0}'")]
    UnclosedTag(&'static str),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("filter '{0}' expects {1} argument(s)")]
    FilterArity(String, usize),

    #[error("missing input variable: {0}")]
    MissingVariable(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),

    #[error("{0}")]
    Security(#[from] TemplateSecurityError),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum TemplateSecurityError {
    #[error("'{0}' is not a recognized root variable")]
    UnknownRoot(String),

    #[error("index expression did not evaluate to an integer or string")]
    InvalidIndex,
}
