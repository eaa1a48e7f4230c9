//! Template environment and the evaluator behind both rendering APIs.

use std::cell::RefCell;
use std::fmt;
use std::iter;
use std::rc::Rc;

use crate::ast::{self, BinOp, Body, Branch, Expr, Node};
use crate::builtins;
use crate::collect::all;
use crate::error::{Error, ExtensionKind};
use crate::loader::Loader;
use crate::mode::{and_then, EvalMode};
use crate::registry::{FilterFn, FunctionFn, Registry, TestFn};
use crate::sequence::run;
use crate::thenable::ThenableValue;
use crate::value::{Value, ValueMap};
use crate::Result;

/// Options controlling how templates render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOptions {
    /// Fail on missing variables and attributes instead of rendering null.
    pub strict_variables: bool,
    /// How deeply includes may nest before rendering fails.
    pub max_include_depth: usize,
}

impl EnvironmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            strict_variables: false,
            max_include_depth: 16,
        }
    }
}

struct Shared {
    options: EnvironmentOptions,
    filters: Registry<FilterFn>,
    functions: Registry<FunctionFn>,
    tests: Registry<TestFn>,
    loader: Option<Box<dyn Loader>>,
}

/// Everything a template needs to render: options, extensions and a loader.
///
/// Environments are independent of each other; registering a filter on one
/// never affects another. Cloning is cheap and shares the configuration.
#[derive(Clone)]
pub struct Environment {
    shared: Rc<Shared>,
}

impl Environment {
    /// An environment with default options and the built-in extensions.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.shared.options
    }

    pub fn filters(&self) -> &Registry<FilterFn> {
        &self.shared.filters
    }

    pub fn functions(&self) -> &Registry<FunctionFn> {
        &self.shared.functions
    }

    pub fn tests(&self) -> &Registry<TestFn> {
        &self.shared.tests
    }

    /// Wrap an already-built node list as a template of this environment.
    pub fn template(&self, name: impl Into<String>, nodes: impl Into<Body>) -> Template {
        Template {
            name: name.into(),
            nodes: nodes.into(),
            env: self.clone(),
        }
    }

    /// Build a template from JSON node-list source.
    pub fn compile(&self, name: &str, source: &str) -> Result<Template> {
        let nodes = ast::from_json(source).map_err(|e| Error::Template(format!("{name}: {e}")))?;
        Ok(self.template(name, nodes))
    }

    /// Ask the loader for `name`'s source, as a plain or deferred string.
    fn load_source(&self, name: &str, mode: EvalMode) -> Result<Value> {
        let loader = self
            .shared
            .loader
            .as_ref()
            .ok_or_else(|| Error::not_found(ExtensionKind::Template, name))?;
        let source = loader.load(name)?;
        mode.accept(source, &format!("loader for template `{name}`"))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Environment`]. Starts out with the built-in extensions.
pub struct EnvironmentBuilder {
    options: EnvironmentOptions,
    filters: Registry<FilterFn>,
    functions: Registry<FunctionFn>,
    tests: Registry<TestFn>,
    loader: Option<Box<dyn Loader>>,
}

impl EnvironmentBuilder {
    fn new() -> Self {
        let mut filters = Registry::new(ExtensionKind::Filter);
        let mut functions = Registry::new(ExtensionKind::Function);
        let mut tests = Registry::new(ExtensionKind::Test);
        builtins::register_filters(&mut filters);
        builtins::register_functions(&mut functions);
        builtins::register_tests(&mut tests);
        Self {
            options: EnvironmentOptions::default(),
            filters,
            functions,
            tests,
            loader: None,
        }
    }

    pub fn options(mut self, options: EnvironmentOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a filter, replacing any existing one with the same name.
    pub fn filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Result<Value> + 'static,
    {
        self.filters.insert(name, Rc::new(filter));
        self
    }

    pub fn function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + 'static,
    {
        self.functions.insert(name, Rc::new(function));
        self
    }

    pub fn test<F>(mut self, name: impl Into<String>, test: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Result<Value> + 'static,
    {
        self.tests.insert(name, Rc::new(test));
        self
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn build(self) -> Environment {
        Environment {
            shared: Rc::new(Shared {
                options: self.options,
                filters: self.filters,
                functions: self.functions,
                tests: self.tests,
                loader: self.loader,
            }),
        }
    }
}

/// A renderable template bound to its environment.
#[derive(Clone)]
pub struct Template {
    name: String,
    nodes: Body,
    env: Environment,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Render synchronously.
    ///
    /// Fails with [`Error::Unsettled`] if a filter, function, test or loader
    /// hands back a value that has not settled yet.
    pub fn render(&self, context: impl Into<Value>) -> Result<String> {
        tracing::debug!(template = %self.name, "rendering synchronously");
        let output = self.render_with(context.into(), EvalMode::Sync)?.to_string_value();
        tracing::debug!(template = %self.name, bytes = output.len(), "rendered");
        Ok(output)
    }

    /// Render asynchronously. The result fulfills with the output string.
    pub fn render_async(&self, context: impl Into<Value>) -> ThenableValue {
        tracing::debug!(template = %self.name, "rendering asynchronously");
        let name = self.name.clone();
        ThenableValue::from_result(self.render_with(context.into(), EvalMode::Async)).then(
            move |output| {
                tracing::debug!(template = %name, bytes = output.to_string_value().len(), "rendered");
                Ok(output)
            },
        )
    }

    fn render_with(&self, context: Value, mode: EvalMode) -> Result<Value> {
        let vars = match context {
            Value::Map(vars) => vars,
            Value::Null => ValueMap::new(),
            other => {
                return Err(Error::Type(format!(
                    "render context must be a map, got {}",
                    other.type_name()
                )));
            }
        };
        let evaluator = Evaluator {
            env: self.env.clone(),
            scope: Scope::new(vars),
            depth: 0,
        };
        evaluator.render_nodes(Rc::clone(&self.nodes), mode)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// Variables visible to a render. Loop bodies and includes get copies.
#[derive(Clone)]
struct Scope(Rc<RefCell<ValueMap>>);

impl Scope {
    fn new(vars: ValueMap) -> Self {
        Scope(Rc::new(RefCell::new(vars)))
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    fn child(&self) -> Scope {
        Scope::new(self.0.borrow().clone())
    }
}

/// Walks the node tree. Every entry point takes the mode and returns through
/// [`EvalMode::finish`].
#[derive(Clone)]
struct Evaluator {
    env: Environment,
    scope: Scope,
    depth: usize,
}

impl Evaluator {
    fn strict(&self) -> bool {
        self.env.options().strict_variables
    }

    fn render_nodes(&self, nodes: Body, mode: EvalMode) -> Result<Value> {
        let this = self.clone();
        let output = concat(0..nodes.len(), move |index, _| this.render_node(&nodes[index], mode));
        mode.finish(Ok(output.into()), "template output")
    }

    fn render_node(&self, node: &Node, mode: EvalMode) -> Result<Value> {
        mode.finish(self.render_node_inner(node, mode), "template node")
    }

    fn render_node_inner(&self, node: &Node, mode: EvalMode) -> Result<Value> {
        match node {
            Node::Text(text) => Ok(Value::String(text.clone())),
            Node::Output(expr) => self.eval(expr, mode),
            Node::If { branches, otherwise } => {
                self.render_branches(Rc::clone(branches), 0, Rc::clone(otherwise), mode)
            }
            Node::For {
                key,
                value,
                iterable,
                body,
                otherwise,
            } => {
                let items = self.eval(iterable, mode)?;
                let this = self.clone();
                let (key, value) = (key.clone(), value.clone());
                let (body, otherwise) = (Rc::clone(body), Rc::clone(otherwise));
                and_then(items, move |items| {
                    this.render_loop(key, value, items, body, otherwise, mode)
                })
            }
            Node::Set { name, value } => {
                let value = self.eval(value, mode)?;
                let scope = self.scope.clone();
                let name = name.clone();
                and_then(value, move |value| {
                    scope.set(name, value);
                    Ok(Value::String(String::new()))
                })
            }
            Node::Include {
                template,
                with,
                only,
            } => self.render_include(template, with.as_ref(), *only, mode),
        }
    }

    /// Evaluates conditions one at a time and renders the first true branch.
    fn render_branches(
        &self,
        branches: Rc<[Branch]>,
        index: usize,
        otherwise: Body,
        mode: EvalMode,
    ) -> Result<Value> {
        let Some(branch) = branches.get(index) else {
            return self.render_nodes(otherwise, mode);
        };
        let condition = self.eval(&branch.condition, mode)?;
        let this = self.clone();
        and_then(condition, move |condition| {
            if condition.to_bool() {
                this.render_nodes(Rc::clone(&branches[index].body), mode)
            } else {
                this.render_branches(branches, index + 1, otherwise, mode)
            }
        })
    }

    fn render_loop(
        &self,
        key: Option<String>,
        value: String,
        items: Value,
        body: Body,
        otherwise: Body,
        mode: EvalMode,
    ) -> Result<Value> {
        let entries = loop_entries(items);
        if entries.is_empty() {
            return self.render_nodes(otherwise, mode);
        }

        let length = entries.len();
        let inner = Evaluator {
            scope: self.scope.child(),
            ..self.clone()
        };
        let output = concat(entries, move |(entry_key, entry_value), index| {
            if let Some(key) = &key {
                inner.scope.set(key.as_str(), entry_key);
            }
            inner.scope.set(value.as_str(), entry_value);
            inner.scope.set("loop", loop_meta(index, length));
            inner.render_nodes(Rc::clone(&body), mode)
        });
        Ok(output.into())
    }

    fn render_include(
        &self,
        template: &Expr,
        with: Option<&Expr>,
        only: bool,
        mode: EvalMode,
    ) -> Result<Value> {
        let max_depth = self.env.options().max_include_depth;
        if self.depth >= max_depth {
            return Err(Error::IncludeDepth(max_depth));
        }

        let name = self.eval(template, mode)?;
        let with = match with {
            Some(expr) => self.eval(expr, mode)?,
            None => Value::Null,
        };
        let this = self.clone();
        let resolved = all([name, with]).then(move |operands| {
            let mut operands = into_items(operands).into_iter();
            let name = operands.next().unwrap_or_default().to_string_value();
            let with = operands.next().unwrap_or_default();
            tracing::trace!(template = %name, depth = this.depth + 1, "resolving include");

            let scope = this.include_scope(with, only)?;
            let source = this.env.load_source(&name, mode)?;
            and_then(source, move |source| {
                let source = match source {
                    Value::String(source) => source,
                    other => {
                        return Err(Error::Template(format!(
                            "loader returned a {} for `{name}`, expected source text",
                            other.type_name()
                        )));
                    }
                };
                let template = this.env.compile(&name, &source)?;
                let nested = Evaluator {
                    env: this.env.clone(),
                    scope,
                    depth: this.depth + 1,
                };
                nested.render_nodes(template.nodes, mode)
            })
        });
        Ok(resolved.into())
    }

    fn include_scope(&self, with: Value, only: bool) -> Result<Scope> {
        let scope = if only {
            Scope::new(ValueMap::new())
        } else {
            self.scope.child()
        };
        match with {
            Value::Null => {}
            Value::Map(vars) => {
                for (name, value) in vars {
                    scope.set(name, value);
                }
            }
            other => {
                return Err(Error::Type(format!(
                    "include `with` expects a map, got {}",
                    other.type_name()
                )));
            }
        }
        Ok(scope)
    }

    fn eval(&self, expr: &Expr, mode: EvalMode) -> Result<Value> {
        mode.finish(self.eval_inner(expr, mode), "expression")
    }

    fn eval_inner(&self, expr: &Expr, mode: EvalMode) -> Result<Value> {
        match expr {
            Expr::Literal(json) => Ok(Value::from(json.clone())),
            Expr::Var(name) => self.lookup(name),
            Expr::Attr { object, key } => {
                let strict = self.strict();
                let operands = self.eval_list([&**object, &**key], mode)?;
                Ok(operands
                    .then(move |operands| {
                        let (object, key) = split_pair(operands);
                        attribute(object, key, strict)
                    })
                    .into())
            }
            Expr::Array(items) => Ok(self.eval_list(items, mode)?.into()),
            Expr::Map(entries) => {
                let keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
                let values = self.eval_list(entries.iter().map(|(_, value)| value), mode)?;
                Ok(values
                    .then(move |values| {
                        Ok(Value::Map(keys.into_iter().zip(into_items(values)).collect()))
                    })
                    .into())
            }
            Expr::Filter { name, input, args } => {
                let filter = Rc::clone(self.env.filters().get(name)?);
                let label = format!("filter `{name}`");
                let operands = self.eval_list(iter::once(&**input).chain(args), mode)?;
                Ok(operands
                    .then(move |operands| {
                        let (input, args) = split_first(operands);
                        mode.accept(filter(input, args)?, &label)
                    })
                    .into())
            }
            Expr::Call { name, args } => {
                let function = Rc::clone(self.env.functions().get(name)?);
                let label = format!("function `{name}`");
                let args = self.eval_list(args, mode)?;
                Ok(args
                    .then(move |args| mode.accept(function(into_items(args))?, &label))
                    .into())
            }
            Expr::Test {
                name,
                input,
                args,
                negated,
            } => {
                let negated = *negated;
                if let Some(defined) = self.is_defined(name, input) {
                    return Ok(Value::Bool(defined != negated));
                }
                let test = Rc::clone(self.env.tests().get(name)?);
                let label = format!("test `{name}`");
                let operands = self.eval_list(iter::once(&**input).chain(args), mode)?;
                Ok(operands
                    .then(move |operands| {
                        let (input, args) = split_first(operands);
                        let verdict = mode.accept(test(input, args)?, &label)?;
                        and_then(verdict, move |verdict| Ok(Value::Bool(verdict.to_bool() != negated)))
                    })
                    .into())
            }
            Expr::Not(inner) => {
                let value = self.eval(inner, mode)?;
                and_then(value, |value| Ok(Value::Bool(!value.to_bool())))
            }
            Expr::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                left,
                right,
            } => {
                let op = *op;
                let left = self.eval(left, mode)?;
                let this = self.clone();
                let right = (**right).clone();
                and_then(left, move |left| {
                    let decided = match op {
                        BinOp::And => !left.to_bool(),
                        _ => left.to_bool(),
                    };
                    if decided {
                        return Ok(Value::Bool(left.to_bool()));
                    }
                    let right = this.eval(&right, mode)?;
                    and_then(right, |right| Ok(Value::Bool(right.to_bool())))
                })
            }
            Expr::Binary { op, left, right } => {
                let op = *op;
                let operands = self.eval_list([&**left, &**right], mode)?;
                Ok(operands
                    .then(move |operands| {
                        let (left, right) = split_pair(operands);
                        binary(op, left, right)
                    })
                    .into())
            }
        }
    }

    /// Evaluates `exprs` left to right and collects their values in order.
    fn eval_list<'a>(
        &self,
        exprs: impl IntoIterator<Item = &'a Expr>,
        mode: EvalMode,
    ) -> Result<ThenableValue> {
        let values = exprs
            .into_iter()
            .map(|expr| self.eval(expr, mode))
            .collect::<Result<Vec<_>>>()?;
        Ok(all(values))
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        match self.scope.get(name) {
            Some(value) => Ok(value),
            None if self.strict() => Err(Error::Undefined(name.to_string())),
            None => Ok(Value::Null),
        }
    }

    /// `x is defined` on a bare variable checks the scope directly, so it
    /// works under strict variables.
    fn is_defined(&self, test: &str, input: &Expr) -> Option<bool> {
        match (test, input) {
            ("defined", Expr::Var(name)) => Some(self.scope.contains(name)),
            _ => None,
        }
    }
}

/// Renders each item in order and joins the chunks into one string.
fn concat<I, F>(items: I, mut render: F) -> ThenableValue
where
    I: IntoIterator,
    I::IntoIter: 'static,
    F: FnMut(I::Item, usize) -> Result<Value> + 'static,
{
    let output = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&output);
    run(items, move |item, index| {
        let chunk = render(item, index)?;
        let sink = Rc::clone(&sink);
        and_then(chunk, move |chunk| {
            sink.borrow_mut().push_str(&chunk.to_string_value());
            Ok(Value::Null)
        })
    })
    .then(move |_| Ok(Value::String(output.take())))
}

fn loop_entries(items: Value) -> Vec<(Value, Value)> {
    match items {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (Value::from(index), item))
            .collect(),
        Value::Map(map) => map
            .into_iter()
            .map(|(key, item)| (Value::String(key), item))
            .collect(),
        _ => Vec::new(),
    }
}

fn loop_meta(index: usize, length: usize) -> Value {
    let mut meta = ValueMap::new();
    meta.insert("index".into(), Value::from(index + 1));
    meta.insert("index0".into(), Value::from(index));
    meta.insert("revindex".into(), Value::from(length - index));
    meta.insert("revindex0".into(), Value::from(length - index - 1));
    meta.insert("first".into(), Value::Bool(index == 0));
    meta.insert("last".into(), Value::Bool(index + 1 == length));
    meta.insert("length".into(), Value::from(length));
    Value::Map(meta)
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn split_first(value: Value) -> (Value, Vec<Value>) {
    let mut items = into_items(value).into_iter();
    let first = items.next().unwrap_or_default();
    (first, items.collect())
}

fn split_pair(value: Value) -> (Value, Value) {
    let mut items = into_items(value).into_iter();
    let first = items.next().unwrap_or_default();
    let second = items.next().unwrap_or_default();
    (first, second)
}

fn attribute(object: Value, key: Value, strict: bool) -> Result<Value> {
    let found = match (&object, &key) {
        (Value::Map(map), key) => map.get(&key.to_string_value()).cloned(),
        (Value::Array(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
            items.get(*n as usize).cloned()
        }
        _ => None,
    };
    match found {
        Some(value) => Ok(value),
        None if strict => Err(Error::Undefined(key.to_string_value())),
        None => Ok(Value::Null),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value> {
    let value = match op {
        BinOp::Add => Value::from(left.to_number() + right.to_number()),
        BinOp::Sub => Value::from(left.to_number() - right.to_number()),
        BinOp::Mul => Value::from(left.to_number() * right.to_number()),
        BinOp::Div => Value::from(left.to_number() / right.to_number()),
        BinOp::Mod => Value::from(left.to_number() % right.to_number()),
        BinOp::Concat => Value::String(left.to_string_value() + &right.to_string_value()),
        BinOp::Eq => Value::Bool(loose_eq(&left, &right)),
        BinOp::Ne => Value::Bool(!loose_eq(&left, &right)),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => Value::Bool(compare(op, &left, &right)),
        BinOp::And => Value::Bool(left.to_bool() && right.to_bool()),
        BinOp::Or => Value::Bool(left.to_bool() || right.to_bool()),
        BinOp::In => Value::Bool(contains(&right, &left)),
    };
    Ok(value)
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            left.to_number() == right.to_number()
        }
        (Value::Bool(b), other) | (other, Value::Bool(b)) => *b == other.to_bool(),
        _ => left == right,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Le => ordering.is_le(),
        _ => ordering.is_ge(),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Map(map) => map.contains_key(&needle.to_string_value()),
        Value::String(s) => s.contains(&needle.to_string_value()),
        _ => false,
    }
}
