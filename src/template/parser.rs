use serde_json::Value;

use super::ast::{Accessor, BinOp, Expr, Node, Path, Template, UnaryOp};
use super::error::TemplateError;

/// Parses template source into a tree of [`Node`]s.
///
/// Parsing happens in two passes: `split_tags` breaks the source into a
/// flat stream of text/output/statement tags, then `nest_until` folds the
/// `if`/`elif`/`else`/`endif` and `for`/`endfor` statement tags into
/// `Node::If`/`Node::For`.
pub(crate) fn parse(source: &str) -> Result<Template, TemplateError> {
    let tags = split_tags(source);
    let mut stmts = Vec::with_capacity(tags.len());
    for tag in tags {
        stmts.push(match tag {
            RawTag::Text(text) => Tag::Node(Node::Text(text)),
            RawTag::Output(expr_src) => Tag::Node(Node::Output(parse_expr(&expr_src)?)),
            RawTag::Stmt(stmt) => Tag::Stmt(parse_stmt(&stmt)?),
        });
    }

    let mut iter = stmts.into_iter().peekable();
    let nodes = nest_until(&mut iter, None)?;
    if iter.peek().is_some() {
        return Err(TemplateError::Other(
            "unexpected block terminator without matching opener".into(),
        ));
    }
    Ok(Template { nodes })
}

enum RawTag {
    Text(String),
    Output(String),
    Stmt(String),
}

enum TagKind {
    Output,
    Stmt,
}

/// One parsed unit of the flat tag stream: either ordinary content (which
/// passes straight through to the output tree) or a control-flow marker
/// consumed by `nest_until`/`parse_if_body`.
enum Tag {
    Node(Node),
    Stmt(Stmt),
}

enum Stmt {
    If(Expr),
    Elif(Expr),
    Else,
    EndIf,
    For(String, Expr),
    EndFor,
}

fn split_tags(source: &str) -> Vec<RawTag> {
    let mut tags = Vec::new();
    let mut rest = source;

    loop {
        let output_pos = rest.find("{{");
        let stmt_pos = rest.find("{%");

        let next = match (output_pos, stmt_pos) {
            (None, None) => None,
            (Some(o), None) => Some((o, TagKind::Output)),
            (None, Some(s)) => Some((s, TagKind::Stmt)),
            (Some(o), Some(s)) => {
                if o < s {
                    Some((o, TagKind::Output))
                } else {
                    Some((s, TagKind::Stmt))
                }
            }
        };

        let Some((pos, kind)) = next else {
            if !rest.is_empty() {
                tags.push(RawTag::Text(rest.to_string()));
            }
            break;
        };

        if pos > 0 {
            tags.push(RawTag::Text(rest[..pos].to_string()));
        }

        let (open, close) = match kind {
            TagKind::Output => ("{{", "}}"),
            TagKind::Stmt => ("{%", "%}"),
        };

        let after_open = &rest[pos + open.len()..];
        let Some(end) = after_open.find(close) else {
            tags.push(RawTag::Text(format!("{}{}", open, after_open)));
            break;
        };

        let inner = after_open[..end].trim().to_string();
        tags.push(match kind {
            TagKind::Output => RawTag::Output(inner),
            TagKind::Stmt => RawTag::Stmt(inner),
        });

        rest = &after_open[end + close.len()..];
    }

    tags
}

fn parse_stmt(stmt: &str) -> Result<Stmt, TemplateError> {
    let mut parts = stmt.splitn(2, char::is_whitespace);
    let keyword = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    match keyword {
        "if" => Ok(Stmt::If(parse_expr(rest)?)),
        "elif" => Ok(Stmt::Elif(parse_expr(rest)?)),
        "else" => Ok(Stmt::Else),
        "endif" => Ok(Stmt::EndIf),
        "endfor" => Ok(Stmt::EndFor),
        "for" => {
            let mut split = rest.splitn(2, " in ");
            let var = split
                .next()
                .ok_or(TemplateError::UnexpectedEof)?
                .trim()
                .to_string();
            let iter_src = split.next().ok_or(TemplateError::UnexpectedEof)?;
            Ok(Stmt::For(var, parse_expr(iter_src)?))
        }
        other => Err(TemplateError::Other(format!(
            "unknown template tag '{{% {other} %}}'"
        ))),
    }
}

type TagIter = std::iter::Peekable<std::vec::IntoIter<Tag>>;

fn nest_until(iter: &mut TagIter, terminator: Option<&'static str>) -> Result<Vec<Node>, TemplateError> {
    let mut out = Vec::new();

    loop {
        let Some(next) = iter.next() else {
            return match terminator {
                Some(t) => Err(TemplateError::UnclosedTag(t)),
                None => Ok(out),
            };
        };

        match next {
            Tag::Node(node) => out.push(node),
            Tag::Stmt(Stmt::EndIf) if terminator == Some("endif") => return Ok(out),
            Tag::Stmt(Stmt::EndFor) if terminator == Some("endfor") => return Ok(out),
            Tag::Stmt(Stmt::If(cond)) => {
                let (branches, otherwise) = parse_if_body(iter, cond)?;
                out.push(Node::If {
                    branches,
                    otherwise,
                });
            }
            Tag::Stmt(Stmt::For(var, iterable)) => {
                let body = nest_until(iter, Some("endfor"))?;
                out.push(Node::For {
                    var,
                    iterable,
                    body,
                });
            }
            Tag::Stmt(Stmt::EndIf) | Tag::Stmt(Stmt::EndFor) | Tag::Stmt(Stmt::Elif(_))
            | Tag::Stmt(Stmt::Else) => {
                return Err(TemplateError::Other(
                    "unexpected block terminator without matching opener".into(),
                ));
            }
        }
    }
}

fn parse_if_body(
    iter: &mut TagIter,
    first_cond: Expr,
) -> Result<(Vec<(Expr, Vec<Node>)>, Vec<Node>), TemplateError> {
    let mut branches = Vec::new();
    let mut cond = first_cond;

    loop {
        let mut body = Vec::new();
        loop {
            let Some(next) = iter.next() else {
                return Err(TemplateError::UnclosedTag("endif"));
            };
            match next {
                Tag::Node(node) => body.push(node),
                Tag::Stmt(Stmt::If(inner_cond)) => {
                    let (inner_branches, inner_otherwise) = parse_if_body(iter, inner_cond)?;
                    body.push(Node::If {
                        branches: inner_branches,
                        otherwise: inner_otherwise,
                    });
                }
                Tag::Stmt(Stmt::For(var, iterable)) => {
                    let inner_body = nest_until(iter, Some("endfor"))?;
                    body.push(Node::For {
                        var,
                        iterable,
                        body: inner_body,
                    });
                }
                Tag::Stmt(Stmt::Elif(next_cond)) => {
                    branches.push((cond, body));
                    cond = next_cond;
                    break;
                }
                Tag::Stmt(Stmt::Else) => {
                    branches.push((cond, body));
                    let otherwise = nest_until(iter, Some("endif"))?;
                    return Ok((branches, otherwise));
                }
                Tag::Stmt(Stmt::EndIf) => {
                    branches.push((cond, body));
                    return Ok((branches, Vec::new()));
                }
                Tag::Stmt(Stmt::EndFor) => {
                    return Err(TemplateError::Other("unexpected 'endfor' inside if".into()))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Expression parsing
// ---------------------------------------------------------------------

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

pub(crate) fn parse_expr(src: &str) -> Result<Expr, TemplateError> {
    let mut parser = ExprParser {
        chars: src.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    let expr = parser.parse_or()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(TemplateError::UnexpectedChar(parser.chars[parser.pos], parser.pos));
    }
    Ok(expr)
}

impl ExprParser {
    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, s: &str) -> bool {
        self.skip_ws();
        let rest: String = self.chars[self.pos..].iter().collect();
        if rest.starts_with(s) {
            self.pos += s.chars().count();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.eat("||") {
                let right = self.parse_and()?;
                left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_not()?;
        loop {
            self.skip_ws();
            if self.eat("&&") {
                let right = self.parse_not()?;
                left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        if self.eat("!") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, TemplateError> {
        let left = self.parse_filter_expr()?;
        self.skip_ws();
        let op = if self.eat("==") {
            Some(BinOp::Eq)
        } else if self.eat("!=") {
            Some(BinOp::Ne)
        } else if self.eat("<=") {
            Some(BinOp::Le)
        } else if self.eat(">=") {
            Some(BinOp::Ge)
        } else if self.eat("<") {
            Some(BinOp::Lt)
        } else if self.eat(">") {
            Some(BinOp::Gt)
        } else {
            None
        };

        match op {
            Some(op) => {
                let right = self.parse_filter_expr()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_filter_expr(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.eat("|") {
                self.skip_ws();
                let name = self.parse_ident()?;
                let arg = if self.eat(":") {
                    Some(Box::new(self.parse_primary()?))
                } else {
                    None
                };
                expr = Expr::Filter {
                    input: Box::new(expr),
                    name,
                    arg,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.skip_ws();
                if !self.eat(")") {
                    return Err(TemplateError::UnexpectedEof);
                }
                Ok(inner)
            }
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_ident_expr(),
            Some(c) => Err(TemplateError::UnexpectedChar(c, self.pos)),
            None => Err(TemplateError::UnexpectedEof),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, TemplateError> {
        let quote = self.peek().unwrap();
        self.pos += 1;
        let mut s = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
                None => return Err(TemplateError::UnexpectedEof),
            }
        }
        Ok(Expr::Literal(Value::String(s)))
    }

    fn parse_number(&mut self) -> Result<Expr, TemplateError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let num: f64 = text
            .parse()
            .map_err(|_| TemplateError::UnexpectedChar('?', start))?;
        Ok(Expr::Literal(
            serde_json::Number::from_f64(num)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        ))
    }

    fn parse_ident(&mut self) -> Result<String, TemplateError> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self
                .peek()
                .map(|c| TemplateError::UnexpectedChar(c, self.pos))
                .unwrap_or(TemplateError::UnexpectedEof));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_ident_expr(&mut self) -> Result<Expr, TemplateError> {
        let ident = self.parse_ident()?;
        match ident.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }

        let mut accessors = Vec::new();
        loop {
            if self.eat(".") {
                let field = self.parse_ident()?;
                accessors.push(Accessor::Field(field));
            } else if self.peek() == Some('[') {
                self.pos += 1;
                let index_expr = self.parse_or()?;
                self.skip_ws();
                if self.peek() != Some(']') {
                    return Err(TemplateError::UnexpectedEof);
                }
                self.pos += 1;
                accessors.push(Accessor::Index(Box::new(index_expr)));
            } else {
                break;
            }
        }

        Ok(Expr::Path(Path {
            root: ident,
            accessors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text() {
        let tmpl = parse("hello world").unwrap();
        assert_eq!(tmpl.nodes.len(), 1);
    }

    #[test]
    fn parses_output_path() {
        let tmpl = parse("Hi {{ agent.name }}!").unwrap();
        assert_eq!(tmpl.nodes.len(), 3);
    }

    #[test]
    fn parses_if_else() {
        let tmpl = parse("{% if flag %}yes{% else %}no{% endif %}").unwrap();
        assert_eq!(tmpl.nodes.len(), 1);
    }

    #[test]
    fn parses_for_loop() {
        let tmpl = parse("{% for item in items %}{{ item }}{% endfor %}").unwrap();
        assert_eq!(tmpl.nodes.len(), 1);
    }

    #[test]
    fn rejects_unclosed_if() {
        let err = parse("{% if flag %}yes").unwrap_err();
        assert!(matches!(err, TemplateError::UnclosedTag("endif")));
    }

    #[test]
    fn parses_filter_chain() {
        let expr = parse_expr("name | lower | truncate: 10").unwrap();
        assert!(matches!(expr, Expr::Filter { .. }));
    }

    #[test]
    fn parses_comparison() {
        let expr = parse_expr("score >= 0.5").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Ge, _, _)));
    }
}
