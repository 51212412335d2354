use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value;

use super::ast::{Accessor, BinOp, Expr, Node, Path, Template, UnaryOp};
use super::error::{TemplateError, TemplateSecurityError};
use super::filters;

/// Evaluates a parsed [`Template`] against a JSON root context.
///
/// Only the field/index accessors reachable from `roots` are visible to the
/// template; there is no way to reach into Rust state or the filesystem from
/// inside an expression.
pub(crate) struct Evaluator<'a> {
    roots: &'a HashMap<String, Value>,
    strict: bool,
    /// Root names that were referenced but absent from `roots`, collected
    /// in non-strict mode so callers can surface a `template.undefined`
    /// event (§4.1: "not fatal" but observable) without erroring the render.
    undefined: RefCell<Vec<String>>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(roots: &'a HashMap<String, Value>, strict: bool) -> Self {
        Self {
            roots,
            strict,
            undefined: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn render(&self, template: &Template) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.render_nodes(&template.nodes, &mut out, &[])?;
        Ok(out)
    }

    pub(crate) fn eval_standalone(&self, expr: &Expr) -> Result<Value, TemplateError> {
        self.eval(expr, &[])
    }

    /// Drains the root names this evaluator found undefined during the
    /// render it just performed. Empty unless constructed with
    /// `strict: false` and at least one unresolved root was touched.
    pub(crate) fn take_undefined(&self) -> Vec<String> {
        std::mem::take(&mut self.undefined.borrow_mut())
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        out: &mut String,
        locals: &[(String, Value)],
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr, locals)?;
                    out.push_str(&stringify(&value));
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut matched = false;
                    for (cond, body) in branches {
                        if truthy(&self.eval(cond, locals)?) {
                            self.render_nodes(body, out, locals)?;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        self.render_nodes(otherwise, out, locals)?;
                    }
                }
                Node::For {
                    var,
                    iterable,
                    body,
                } => {
                    let collection = self.eval(iterable, locals)?;
                    let items = match collection {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        other => {
                            return Err(TemplateError::Other(format!(
                                "cannot iterate over non-array value: {other}"
                            )))
                        }
                    };
                    for item in items {
                        let mut scoped = locals.to_vec();
                        scoped.push((var.clone(), item));
                        self.render_nodes(body, out, &scoped)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, locals: &[(String, Value)]) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(path) => self.eval_path(path, locals),
            Expr::Unary(UnaryOp::Not, inner) => {
                Ok(Value::Bool(!truthy(&self.eval(inner, locals)?)))
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, locals),
            Expr::Filter { input, name, arg } => {
                let value = self.eval(input, locals)?;
                let arg = match arg {
                    Some(arg) => Some(self.eval(arg, locals)?),
                    None => None,
                };
                filters::apply(name, value, arg)
            }
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        locals: &[(String, Value)],
    ) -> Result<Value, TemplateError> {
        if matches!(op, BinOp::And) {
            let left = self.eval(lhs, locals)?;
            if !truthy(&left) {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(truthy(&self.eval(rhs, locals)?)));
        }
        if matches!(op, BinOp::Or) {
            let left = self.eval(lhs, locals)?;
            if truthy(&left) {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(truthy(&self.eval(rhs, locals)?)));
        }

        let left = self.eval(lhs, locals)?;
        let right = self.eval(rhs, locals)?;
        let result = match op {
            BinOp::Eq => values_equal(&left, &right),
            BinOp::Ne => !values_equal(&left, &right),
            BinOp::Lt => compare(&left, &right)?.is_lt(),
            BinOp::Le => compare(&left, &right)?.is_le(),
            BinOp::Gt => compare(&left, &right)?.is_gt(),
            BinOp::Ge => compare(&left, &right)?.is_ge(),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        };
        Ok(Value::Bool(result))
    }

    fn eval_path(&self, path: &Path, locals: &[(String, Value)]) -> Result<Value, TemplateError> {
        let mut value = if let Some((_, v)) = locals.iter().rev().find(|(n, _)| n == &path.root) {
            v.clone()
        } else if let Some(v) = self.roots.get(&path.root) {
            v.clone()
        } else if self.strict {
            return Err(TemplateSecurityError::UnknownRoot(path.root.clone()).into());
        } else {
            self.undefined.borrow_mut().push(path.root.clone());
            Value::Null
        };

        for accessor in &path.accessors {
            value = match accessor {
                Accessor::Field(field) => match &value {
                    Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
                    Value::Null => Value::Null,
                    _ => {
                        if self.strict {
                            return Err(TemplateError::MissingVariable(field.clone()));
                        }
                        Value::Null
                    }
                },
                Accessor::Index(index_expr) => {
                    let index_value = self.eval(index_expr, locals)?;
                    index_into(&value, &index_value)?
                }
            };
        }

        Ok(value)
    }
}

fn index_into(value: &Value, index: &Value) -> Result<Value, TemplateError> {
    match (value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or(TemplateSecurityError::InvalidIndex)?;
            if i < 0 {
                return Ok(Value::Null);
            }
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Null, _) => Ok(Value::Null),
        _ => Err(TemplateSecurityError::InvalidIndex.into()),
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, TemplateError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).ok_or_else(|| {
                TemplateError::Other("cannot compare NaN values".to_string())
            })
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(TemplateError::Other(format!(
            "cannot compare {a} and {b}"
        ))),
    }
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
