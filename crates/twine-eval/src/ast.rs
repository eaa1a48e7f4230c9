/// Template node tree
///
/// Templates reach the evaluator already parsed. The tree deserializes from
/// JSON using serde's externally tagged form, e.g.
/// `[{"text": "Hi "}, {"output": {"var": "name"}}]`.

use std::rc::Rc;

use serde::Deserialize;

/// A shared, immutable list of nodes.
pub type Body = Rc<[Node]>;

/// A template statement
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Literal text copied to the output
    Text(String),
    /// `{{ expr }}`
    Output(Expr),
    /// `{% if %}` / `{% elseif %}` chain with an optional `{% else %}`
    If {
        branches: Rc<[Branch]>,
        #[serde(default = "empty_body")]
        otherwise: Body,
    },
    /// `{% for key, value in iterable %}` with an optional `{% else %}`
    For {
        #[serde(default)]
        key: Option<String>,
        value: String,
        iterable: Expr,
        body: Body,
        #[serde(default = "empty_body")]
        otherwise: Body,
    },
    /// `{% set name = value %}`
    Set { name: String, value: Expr },
    /// `{% include template with map only %}`
    Include {
        template: Expr,
        #[serde(default)]
        with: Option<Expr>,
        #[serde(default)]
        only: bool,
    },
}

/// One condition of an `if` chain
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Branch {
    pub condition: Expr,
    pub body: Body,
}

/// An expression
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(serde_json::Value),
    Var(String),
    /// `object.key` or `object[key]`
    Attr { object: Box<Expr>, key: Box<Expr> },
    Array(Vec<Expr>),
    /// `{ key: value, ... }`; keys keep their source order
    Map(Vec<(String, Expr)>),
    /// `input|name(args)`
    Filter {
        name: String,
        input: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// `name(args)`
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// `input is [not] name(args)`
    Test {
        name: String,
        input: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        negated: bool,
    },
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `~`
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    In,
}

fn empty_body() -> Body {
    Rc::from(Vec::new())
}

/// Parse a JSON node list.
pub fn from_json(source: &str) -> serde_json::Result<Vec<Node>> {
    serde_json::from_str(source)
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub fn output(expr: Expr) -> Self {
        Node::Output(expr)
    }

    pub fn set(name: impl Into<String>, value: Expr) -> Self {
        Node::Set {
            name: name.into(),
            value,
        }
    }

    pub fn for_each(value: impl Into<String>, iterable: Expr, body: Vec<Node>) -> Self {
        Node::For {
            key: None,
            value: value.into(),
            iterable,
            body: body.into(),
            otherwise: empty_body(),
        }
    }

    pub fn if_else(condition: Expr, then: Vec<Node>, otherwise: Vec<Node>) -> Self {
        Node::If {
            branches: Rc::from(vec![Branch {
                condition,
                body: then.into(),
            }]),
            otherwise: otherwise.into(),
        }
    }

    pub fn include(template: Expr) -> Self {
        Node::Include {
            template,
            with: None,
            only: false,
        }
    }
}

impl Expr {
    pub fn lit(value: impl Into<serde_json::Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn attr(object: Expr, key: impl Into<serde_json::Value>) -> Self {
        Expr::Attr {
            object: Box::new(object),
            key: Box::new(Expr::lit(key)),
        }
    }

    pub fn filter(input: Expr, name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Filter {
            name: name.into(),
            input: Box::new(input),
            args,
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn test(input: Expr, name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Test {
            name: name.into(),
            input: Box::new(input),
            args,
            negated: false,
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_and_output() {
        let nodes = from_json(r#"[{"text": "Hi "}, {"output": {"var": "name"}}]"#).unwrap();
        assert_eq!(nodes, vec![Node::text("Hi "), Node::output(Expr::var("name"))]);
    }

    #[test]
    fn test_parse_for_defaults() {
        let nodes = from_json(
            r#"[{"for": {"value": "x", "iterable": {"var": "xs"}, "body": [{"text": "."}]}}]"#,
        )
        .unwrap();
        assert_eq!(
            nodes,
            vec![Node::for_each("x", Expr::var("xs"), vec![Node::text(".")])]
        );
    }

    #[test]
    fn test_parse_filter_and_binary() {
        let nodes = from_json(
            r#"[{"output": {"binary": {"op": "concat",
                "left": {"filter": {"name": "upper", "input": {"literal": "a"}}},
                "right": {"literal": 1}}}}]"#,
        )
        .unwrap();
        assert_eq!(
            nodes,
            vec![Node::output(Expr::binary(
                BinOp::Concat,
                Expr::filter(Expr::lit("a"), "upper", vec![]),
                Expr::lit(1),
            ))]
        );
    }

    #[test]
    fn test_unknown_node_is_rejected() {
        assert!(from_json(r#"[{"block": "x"}]"#).is_err());
    }
}
