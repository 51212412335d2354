use serde_json::Value;

use super::error::TemplateError;

/// Applies a named filter to `input`, optionally parameterized by `arg`.
///
/// The filter set is deliberately small and fixed — there is no
/// registration hook for callers to add their own, since that would
/// reopen the arbitrary-code-execution door the sandboxed grammar exists
/// to close.
pub(crate) fn apply(name: &str, input: Value, arg: Option<Value>) -> Result<Value, TemplateError> {
    match name {
        "lower" => {
            require_no_arg(name, &arg)?;
            Ok(Value::String(as_text(&input).to_lowercase()))
        }
        "upper" => {
            require_no_arg(name, &arg)?;
            Ok(Value::String(as_text(&input).to_uppercase()))
        }
        "json" => {
            require_no_arg(name, &arg)?;
            serde_json::to_string(&input)
                .map(Value::String)
                .map_err(TemplateError::from)
        }
        "length" => {
            require_no_arg(name, &arg)?;
            let len = match &input {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                _ => return Err(TemplateError::Other(format!("'length' cannot apply to {input}"))),
            };
            Ok(Value::Number((len as u64).into()))
        }
        "default" => {
            let fallback = arg.ok_or_else(|| TemplateError::FilterArity("default".to_string(), 1))?;
            if matches!(input, Value::Null) {
                Ok(fallback)
            } else {
                Ok(input)
            }
        }
        "truncate" => {
            let limit = match arg {
                Some(Value::Number(n)) => n
                    .as_u64()
                    .ok_or_else(|| TemplateError::FilterArity("truncate".to_string(), 1))?
                    as usize,
                _ => return Err(TemplateError::FilterArity("truncate".to_string(), 1)),
            };
            let text = as_text(&input);
            let truncated: String = text.chars().take(limit).collect();
            Ok(Value::String(truncated))
        }
        other => Err(TemplateError::UnknownFilter(other.to_string())),
    }
}

fn require_no_arg(name: &str, arg: &Option<Value>) -> Result<(), TemplateError> {
    if arg.is_some() {
        return Err(TemplateError::FilterArity(name.to_string(), 0));
    }
    Ok(())
}

fn as_text(value: &Value) -> String {
    super::eval::stringify(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lower_and_upper() {
        assert_eq!(
            apply("lower", json!("HeLLo"), None).unwrap(),
            json!("hello")
        );
        assert_eq!(
            apply("upper", json!("HeLLo"), None).unwrap(),
            json!("HELLO")
        );
    }

    #[test]
    fn default_replaces_null_only() {
        assert_eq!(apply("default", Value::Null, Some(json!("x"))).unwrap(), json!("x"));
        assert_eq!(apply("default", json!("y"), Some(json!("x"))).unwrap(), json!("y"));
    }

    #[test]
    fn truncate_by_char_count() {
        assert_eq!(
            apply("truncate", json!("hello world"), Some(json!(5))).unwrap(),
            json!("hello")
        );
    }

    #[test]
    fn length_of_array() {
        assert_eq!(apply("length", json!([1, 2, 3]), None).unwrap(), json!(3));
    }

    #[test]
    fn unknown_filter_errors() {
        assert!(apply("frobnicate", json!("x"), None).is_err());
    }
}
