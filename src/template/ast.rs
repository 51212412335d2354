use serde_json::Value;

/// A parsed template: a flat sequence of literal text and control nodes.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Path(Path),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Filter {
        input: Box<Expr>,
        name: String,
        arg: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Path {
    pub root: String,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone)]
pub(crate) enum Accessor {
    Field(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}
