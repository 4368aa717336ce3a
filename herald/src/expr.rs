//! Host-side expression trees and their heap form.
//!
//! A parser hands the VM [`Expr`] trees through an [`ExpressionSource`];
//! [`VMProxy::compile`] turns them into expression nodes, which are plain
//! objects the evaluator sends `interpret` to.

use crate::{Tag, VMProxy, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `target selector args…`
    Send {
        target: Box<Expr>,
        selector: String,
        args: Vec<Expr>,
    },
    Integer(i64),
    Str(String),
    /// The current lexical scope; receiver of implicit sends.
    Scope,
    /// `[:params | body]`, a method closed over the scope it is evaluated in.
    Block { params: Vec<String>, body: Vec<Expr> },
    /// Evaluates the inner expression on a new thread, answering a promise.
    Async(Box<Expr>),
    /// An existing heap value, spliced in as a literal.
    Value(Value),
}

impl Expr {
    pub fn send(target: Expr, selector: &str, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Send {
            target: Box::new(target),
            selector: selector.to_owned(),
            args: args.into_iter().collect(),
        }
    }

    /// A send to the current scope.
    pub fn implicit(selector: &str, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::send(Expr::Scope, selector, args)
    }

    /// A variable read, which is a unary implicit send.
    pub fn var(name: &str) -> Self {
        Expr::implicit(name, [])
    }

    pub fn block(params: &[&str], body: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Block {
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            body: body.into_iter().collect(),
        }
    }

    pub fn spawn(expr: Expr) -> Self {
        Expr::Async(Box::new(expr))
    }
}

/// One item pulled from a parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Expression(Expr),
    EndOfStream,
    SyntaxError(String),
}

impl From<Expr> for ParseOutcome {
    fn from(expr: Expr) -> Self {
        ParseOutcome::Expression(expr)
    }
}

pub trait ExpressionSource {
    fn next_expression(&mut self) -> ParseOutcome;
}

impl<I> ExpressionSource for I
where
    I: Iterator<Item = ParseOutcome>,
{
    fn next_expression(&mut self) -> ParseOutcome {
        self.next().unwrap_or(ParseOutcome::EndOfStream)
    }
}

impl VMProxy {
    /// Builds the heap form of `expr`.
    pub fn compile(&self, expr: &Expr) -> Value {
        let heap = &self.heap;
        let specials = self.specials();
        match expr {
            Expr::Send {
                target,
                selector,
                args,
            } => {
                let target = self.compile(target);
                let selector = self.intern(selector);
                let args: Vec<_> = args.iter().map(|arg| self.compile(arg)).collect();
                let args = heap.allocate_vector(&args);
                let hidden = heap.allocate_vector(&[target, selector, args]);
                heap.allocate_object(Tag::Object, specials.code, hidden)
            }
            Expr::Integer(value) => self.integer(*value),
            Expr::Str(text) => self.string(text),
            Expr::Scope => specials.scope_node,
            Expr::Block { params, body } => {
                let (params, body) = self.params_and_body(params, body);
                let hidden = heap.allocate_vector(&[params, body]);
                heap.allocate_object(Tag::Object, specials.block_code, hidden)
            }
            Expr::Async(inner) => {
                let inner = self.compile(inner);
                heap.allocate_object(Tag::Object, specials.async_code, inner)
            }
            Expr::Value(value) => *value,
        }
    }

    fn params_and_body<S: AsRef<str>>(&self, params: &[S], body: &[Expr]) -> (Value, Value) {
        let params: Vec<_> = params.iter().map(|p| self.intern(p.as_ref())).collect();
        let params = self.heap.allocate_vector(&params);
        let body: Vec<_> = body.iter().map(|e| self.compile(e)).collect();
        let body = self.heap.allocate_vector(&body);
        (params, body)
    }

    /// A method object with the given parameters and body, closed over `env`.
    pub fn method(&self, params: &[&str], body: &[Expr], env: Value) -> Value {
        let (params, body) = self.params_and_body(params, body);
        let hidden = self.heap.allocate_vector(&[params, body, env]);
        self.heap
            .allocate_object(Tag::Method, self.specials().method, hidden)
    }

    /// Evaluates `expr` to completion on a fresh thread.
    ///
    /// An exception nobody handles comes back as the result.
    pub fn evaluate(&self, expr: &Expr, env: Value, dynamic_env: Value) -> Value {
        self.scoped(|| {
            let node = self.compile(expr);
            let promise = self.new_promise();
            self.spawn_thread(
                promise,
                self.selectors().interpret,
                &[node],
                env,
                dynamic_env,
            );
            self.wait(promise)
        })
    }

    /// `evaluate` in the lobby under the root dynamic environment.
    pub fn evaluate_top(&self, expr: &Expr) -> Value {
        let specials = self.specials();
        self.evaluate(expr, specials.lobby, specials.root_environment)
    }

    /// Evaluates every expression of `source` in turn and answers the last
    /// value, `null` for an empty source, or the syntax-error sentinel.
    pub fn load(
        &self,
        source: &mut impl ExpressionSource,
        env: Value,
        dynamic_env: Value,
    ) -> Value {
        let mark = self.heap.shelter_mark();
        let mut last = self.specials().null;
        loop {
            match source.next_expression() {
                ParseOutcome::Expression(expr) => {
                    last = self.evaluate(&expr, env, dynamic_env);
                    self.heap.release_shelter(mark, last);
                }
                ParseOutcome::EndOfStream => return last,
                ParseOutcome::SyntaxError(message) => {
                    log::warn!("syntax error: {message}");
                    return self.specials().syntax_error;
                }
            }
        }
    }
}
