//! Lazy evaluator
//!
//! Terms evaluate to weak head normal form ([`Value`]); children stay
//! suspended in [`Thunk`]s until something forces them. Deep evaluation
//! forces everything reachable.

use std::collections::HashSet;
use std::io::Write;
use std::mem;
use std::sync::Arc;

use indexmap::IndexMap;
use num_traits::{Signed, Zero};

use crate::error::{EvalError, Result, Source, Span};
use crate::lexer::is_integer;
use crate::parser;
use crate::stdlib;
use crate::term::{Annotation, BinOp, Contract, FieldDef, Node, Term, UnOp};
use crate::value::{
    Applied, Closure, Code, Env, Field, Label, Partial, Pending, Record, Thunk, ThunkState, Value,
};

/// Evaluation limits.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum number of nested evaluations before giving up
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

/// Receives messages emitted by `std.trace`.
pub trait Tracer {
    /// Deliver one message, including its trailing newline.
    fn emit(&self, message: &str);
}

/// Writes trace messages to standard error.
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn emit(&self, message: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(message.as_bytes());
        let _ = stderr.flush();
    }
}

/// A parsed program.
pub struct Program {
    source: Arc<Source>,
    root: Arc<Node>,
}

impl Program {
    /// Parse `text`, labelling it `name` in diagnostics.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let source = Source::new(name, text);
        let root = parser::parse(&source)?;
        Ok(Self { source, root })
    }

    /// The program's source.
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }
}

/// Evaluates programs and forces thunks.
pub struct Evaluator<'a> {
    config: &'a EvalConfig,
    tracer: &'a dyn Tracer,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator.
    pub fn new(config: &'a EvalConfig, tracer: &'a dyn Tracer) -> Self {
        Self {
            config,
            tracer,
            depth: 0,
        }
    }

    /// Evaluate a program to weak head normal form.
    pub fn eval_shallow(&mut self, program: &Program) -> Result<Value> {
        let value = self.whnf(&program.root, &root_env())?;
        if value.is_function() {
            return Err(EvalError::FunctionResult {
                span: Some(program.root.span.clone()),
            });
        }
        Ok(value)
    }

    /// Evaluate a program completely.
    ///
    /// With `for_export`, fields marked `not_exported` are dropped instead
    /// of evaluated.
    pub fn eval_deep(&mut self, program: &Program, for_export: bool) -> Result<Value> {
        let value = self.whnf(&program.root, &root_env())?;
        self.deep(value, for_export, Some(&program.root.span))
    }

    /// Force a thunk to weak head normal form, memoizing the result.
    pub fn force(&mut self, thunk: &Thunk) -> Result<Value> {
        let pending = {
            let mut state = thunk.lock();
            match mem::replace(&mut *state, ThunkState::Forcing(None)) {
                ThunkState::Evaluated(value) => {
                    *state = ThunkState::Evaluated(value.clone());
                    return Ok(value);
                }
                ThunkState::Forcing(span) => {
                    *state = ThunkState::Forcing(span.clone());
                    return Err(EvalError::InfiniteRecursion { span });
                }
                ThunkState::Suspended(pending) => {
                    *state = ThunkState::Forcing(pending.span());
                    pending
                }
            }
        };

        let result = self.run(&pending);
        let mut state = thunk.lock();
        match result {
            Ok(value) => {
                *state = ThunkState::Evaluated(value.clone());
                Ok(value)
            }
            Err(err) => {
                *state = ThunkState::Suspended(pending);
                Err(err)
            }
        }
    }

    /// Force a value and everything reachable from it.
    ///
    /// Each level of nesting counts against [`EvalConfig::max_depth`], the
    /// same budget as nested evaluation.
    pub fn deep(&mut self, value: Value, for_export: bool, span: Option<&Span>) -> Result<Value> {
        if self.depth >= self.config.max_depth {
            return Err(EvalError::DepthExceeded {
                max: self.config.max_depth,
                span: span.cloned(),
            });
        }
        self.depth += 1;
        let result = self.deep_inner(value, for_export, span);
        self.depth -= 1;
        result
    }

    fn deep_inner(&mut self, value: Value, for_export: bool, span: Option<&Span>) -> Result<Value> {
        match value {
            Value::Closure(_) | Value::Builtin(_) => Err(EvalError::FunctionResult {
                span: span.cloned(),
            }),
            Value::EnumVariant(tag, payload) => {
                let inner = self.deep_thunk(&payload, for_export)?;
                Ok(Value::EnumVariant(tag, inner))
            }
            Value::Array(elements) => {
                let mut out = Vec::with_capacity(elements.len());
                for element in elements.iter() {
                    out.push(self.deep_thunk(element, for_export)?);
                }
                Ok(Value::Array(Arc::new(out)))
            }
            Value::Record(record) => {
                let mut fields = IndexMap::with_capacity(record.fields.len());
                for (name, field) in &record.fields {
                    if for_export && field.not_exported {
                        continue;
                    }
                    let Some(thunk) = &field.value else {
                        return Err(EvalError::MissingDefinition {
                            field: name.clone(),
                            span: field.span.clone(),
                        });
                    };
                    let value = self.deep_thunk(thunk, for_export)?;
                    fields.insert(
                        name.clone(),
                        Field {
                            value: Some(value),
                            not_exported: field.not_exported,
                            span: field.span.clone(),
                        },
                    );
                }
                Ok(Value::Record(Arc::new(Record { fields })))
            }
            scalar => Ok(scalar),
        }
    }

    fn deep_thunk(&mut self, thunk: &Thunk, for_export: bool) -> Result<Thunk> {
        let span = pending_span(thunk);
        let value = self.force(thunk)?;
        let value = self.deep(value, for_export, span.as_ref())?;
        Ok(Thunk::evaluated(value))
    }

    /// Emit a trace message.
    pub(crate) fn trace(&self, message: &str) {
        self.tracer.emit(message);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Weak Head Normal Form
    // ═══════════════════════════════════════════════════════════════════

    fn run(&mut self, pending: &Pending) -> Result<Value> {
        let (mut value, span) = match &pending.code {
            Code::Term { node, env } => (self.whnf(node, env)?, Some(node.span.clone())),
            Code::Delegate(inner) => (self.force(inner)?, None),
            Code::Apply { func, arg, span } => {
                let func = self.force(func)?;
                (self.apply(func, arg.clone(), span.as_ref())?, span.clone())
            }
            Code::Missing { field, span } => {
                return Err(EvalError::MissingDefinition {
                    field: field.clone(),
                    span: span.clone(),
                })
            }
        };
        for applied in &pending.contracts {
            value = self.check_contract(value, applied, span.as_ref())?;
        }
        Ok(value)
    }

    fn whnf(&mut self, node: &Arc<Node>, env: &Env) -> Result<Value> {
        if self.depth >= self.config.max_depth {
            return Err(EvalError::DepthExceeded {
                max: self.config.max_depth,
                span: Some(node.span.clone()),
            });
        }
        self.depth += 1;
        let result = self.whnf_inner(node, env);
        self.depth -= 1;
        result
    }

    fn whnf_inner(&mut self, node: &Arc<Node>, env: &Env) -> Result<Value> {
        let span = &node.span;
        match &node.term {
            Term::Null
            | Term::Bool(_)
            | Term::Num(_)
            | Term::Str(_)
            | Term::EnumTag(_) => Ok(crate::value::literal(node).unwrap_or(Value::Null)),
            Term::EnumVariant(tag, payload) => Ok(Value::EnumVariant(
                Arc::from(tag.as_str()),
                Thunk::for_node(payload, env),
            )),
            Term::Record(fields) => Ok(Value::Record(Arc::new(build_record(fields, env)))),
            Term::Array(elements) => Ok(Value::Array(Arc::new(
                elements.iter().map(|e| Thunk::for_node(e, env)).collect(),
            ))),
            Term::Var(name) => match env.lookup(name) {
                Some(thunk) => {
                    let thunk = thunk.clone();
                    self.force(&thunk)
                }
                None => Err(EvalError::UnboundIdentifier {
                    name: name.clone(),
                    span: span.clone(),
                }),
            },
            Term::Let {
                name,
                rec,
                annotations,
                bound,
                body,
            } => {
                let contracts = applied(annotations, None);
                let thunk = if contracts.is_empty() {
                    Thunk::for_node(bound, env)
                } else {
                    Thunk::suspended(
                        Code::Term {
                            node: Arc::clone(bound),
                            env: env.clone(),
                        },
                        contracts,
                    )
                };
                let body_env = env.bind(name.clone(), thunk.clone());
                if *rec && bound.mentions(&|n: &str| n == name.as_str()) {
                    // Ties a reference cycle through the environment.
                    thunk.patch_env(&body_env);
                }
                self.whnf(body, &body_env)
            }
            Term::Fun { param, body } => Ok(Value::Closure(Arc::new(Closure {
                param: param.clone(),
                body: Arc::clone(body),
                env: env.clone(),
            }))),
            Term::App(func, arg) => {
                let func = self.whnf(func, env)?;
                self.apply(func, Thunk::for_node(arg, env), Some(span))
            }
            Term::Access(target, field) => {
                let value = self.whnf(target, env)?;
                let Value::Record(record) = value else {
                    return Err(EvalError::type_mismatch(
                        "a record",
                        value.describe(),
                        &target.span,
                    ));
                };
                match record.fields.get(field) {
                    None => Err(EvalError::MissingField {
                        field: field.clone(),
                        span: Some(span.clone()),
                    }),
                    Some(Field { value: None, span: decl, .. }) => {
                        Err(EvalError::MissingDefinition {
                            field: field.clone(),
                            span: decl.clone().or_else(|| Some(span.clone())),
                        })
                    }
                    Some(Field {
                        value: Some(thunk), ..
                    }) => {
                        let thunk = thunk.clone();
                        self.force(&thunk)
                    }
                }
            }
            Term::Op1(op, operand) => {
                let value = self.whnf(operand, env)?;
                match (op, value) {
                    (UnOp::Neg, Value::Num(n)) => Ok(Value::Num(-n)),
                    (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnOp::Neg, other) => Err(EvalError::type_mismatch(
                        "a number",
                        other.describe(),
                        &operand.span,
                    )),
                    (UnOp::Not, other) => Err(EvalError::type_mismatch(
                        "a bool",
                        other.describe(),
                        &operand.span,
                    )),
                }
            }
            Term::Op2(op, lhs, rhs) => self.binary(*op, lhs, rhs, env, span),
            Term::If(cond, then_branch, else_branch) => match self.whnf(cond, env)? {
                Value::Bool(true) => self.whnf(then_branch, env),
                Value::Bool(false) => self.whnf(else_branch, env),
                other => Err(EvalError::type_mismatch(
                    "a bool",
                    other.describe(),
                    &cond.span,
                )),
            },
            Term::Annotated(inner, annotations) => {
                let mut value = self.whnf(inner, env)?;
                for applied in applied(annotations, None) {
                    value = self.check_contract(value, &applied, Some(&inner.span))?;
                }
                Ok(value)
            }
        }
    }

    /// Apply a function value to an argument.
    pub(crate) fn apply(&mut self, func: Value, arg: Thunk, span: Option<&Span>) -> Result<Value> {
        match func {
            Value::Closure(closure) => {
                let env = closure.env.bind(closure.param.clone(), arg);
                self.whnf(&closure.body, &env)
            }
            Value::Builtin(partial) => {
                let mut args = partial.args.clone();
                args.push(arg);
                if args.len() < partial.builtin.arity() {
                    Ok(Value::Builtin(Arc::new(Partial {
                        builtin: partial.builtin,
                        args,
                    })))
                } else {
                    stdlib::call(self, partial.builtin, &args, span)
                }
            }
            other => Err(EvalError::NotAFunction {
                found: other.describe().to_string(),
                span: span.cloned(),
            }),
        }
    }

    fn binary(
        &mut self,
        op: BinOp,
        lhs: &Arc<Node>,
        rhs: &Arc<Node>,
        env: &Env,
        span: &Span,
    ) -> Result<Value> {
        match op {
            BinOp::And | BinOp::Or => {
                let left = self.expect_bool(lhs, env)?;
                if (op == BinOp::And) != left {
                    return Ok(Value::Bool(left));
                }
                Ok(Value::Bool(self.expect_bool(rhs, env)?))
            }
            BinOp::Eq | BinOp::Ne => {
                let left = self.whnf(lhs, env)?;
                let right = self.whnf(rhs, env)?;
                let equal = self.equal(&left, &right, span)?;
                Ok(Value::Bool(equal == (op == BinOp::Eq)))
            }
            BinOp::StrConcat => {
                let left = self.whnf(lhs, env)?;
                let right = self.whnf(rhs, env)?;
                match (left, right) {
                    (Value::Str(a), Value::Str(b)) => Ok(Value::string(format!("{}{}", a, b))),
                    (Value::Str(_), other) => Err(EvalError::type_mismatch(
                        "a string",
                        other.describe(),
                        &rhs.span,
                    )),
                    (other, _) => Err(EvalError::type_mismatch(
                        "a string",
                        other.describe(),
                        &lhs.span,
                    )),
                }
            }
            BinOp::ArrayConcat => {
                let left = self.whnf(lhs, env)?;
                let right = self.whnf(rhs, env)?;
                match (left, right) {
                    (Value::Array(a), Value::Array(b)) => {
                        Ok(Value::Array(Arc::new(a.iter().chain(b.iter()).cloned().collect())))
                    }
                    (Value::Array(_), other) => Err(EvalError::type_mismatch(
                        "an array",
                        other.describe(),
                        &rhs.span,
                    )),
                    (other, _) => Err(EvalError::type_mismatch(
                        "an array",
                        other.describe(),
                        &lhs.span,
                    )),
                }
            }
            _ => {
                let left = self.expect_number(lhs, env)?;
                let right = self.expect_number(rhs, env)?;
                let value = match op {
                    BinOp::Add => Value::Num(left + right),
                    BinOp::Sub => Value::Num(left - right),
                    BinOp::Mul => Value::Num(left * right),
                    BinOp::Div | BinOp::Rem if right.is_zero() => {
                        return Err(EvalError::DivisionByZero {
                            span: Some(span.clone()),
                        })
                    }
                    BinOp::Div => Value::Num(left / right),
                    BinOp::Rem => Value::Num(left % right),
                    BinOp::Lt => Value::Bool(left < right),
                    BinOp::Le => Value::Bool(left <= right),
                    BinOp::Gt => Value::Bool(left > right),
                    BinOp::Ge => Value::Bool(left >= right),
                    _ => unreachable!("non-arithmetic operator {}", op.symbol()),
                };
                Ok(value)
            }
        }
    }

    fn expect_bool(&mut self, node: &Arc<Node>, env: &Env) -> Result<bool> {
        match self.whnf(node, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::type_mismatch("a bool", other.describe(), &node.span)),
        }
    }

    fn expect_number(
        &mut self,
        node: &Arc<Node>,
        env: &Env,
    ) -> Result<num_rational::BigRational> {
        match self.whnf(node, env)? {
            Value::Num(n) => Ok(n),
            other => Err(EvalError::type_mismatch(
                "a number",
                other.describe(),
                &node.span,
            )),
        }
    }

    /// Structural equality, forcing children as needed.
    pub(crate) fn equal(&mut self, left: &Value, right: &Value, span: &Span) -> Result<bool> {
        match (left, right) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::Num(a), Value::Num(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::EnumTag(a), Value::EnumTag(b)) => Ok(a == b),
            (Value::EnumVariant(tag_a, a), Value::EnumVariant(tag_b, b)) => {
                if tag_a != tag_b {
                    return Ok(false);
                }
                self.equal_thunks(a, b, span)
            }
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !self.equal_thunks(x, y, span)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Record(a), Value::Record(b)) => {
                if a.fields.len() != b.fields.len() {
                    return Ok(false);
                }
                for (name, field) in &a.fields {
                    let Some(other) = b.fields.get(name) else {
                        return Ok(false);
                    };
                    match (&field.value, &other.value) {
                        (Some(x), Some(y)) => {
                            if !self.equal_thunks(x, y, span)? {
                                return Ok(false);
                            }
                        }
                        (None, None) => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (a, b) if a.is_function() || b.is_function() => Err(EvalError::type_mismatch(
                "comparable values",
                "a function",
                span,
            )),
            _ => Ok(false),
        }
    }

    fn equal_thunks(&mut self, a: &Thunk, b: &Thunk, span: &Span) -> Result<bool> {
        let a = self.force(a)?;
        let b = self.force(b)?;
        self.equal(&a, &b, span)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Contracts
    // ═══════════════════════════════════════════════════════════════════

    fn check_contract(
        &mut self,
        value: Value,
        applied: &Applied,
        value_span: Option<&Span>,
    ) -> Result<Value> {
        let ok = match (&applied.contract, &value) {
            (Contract::Dyn, _) => true,
            (Contract::Number, Value::Num(_)) => true,
            (Contract::String, Value::Str(_)) => true,
            (Contract::Bool, Value::Bool(_)) => true,
            (Contract::Integer, Value::Num(n)) => is_integer(n),
            (Contract::Nat, Value::Num(n)) => is_integer(n) && !n.is_negative(),
            (Contract::NonEmpty, Value::Str(s)) => !s.is_empty(),
            (Contract::Array(element), Value::Array(elements)) => {
                let element = Applied {
                    contract: (**element).clone(),
                    label: applied.label.clone(),
                };
                let wrapped = elements
                    .iter()
                    .map(|thunk| {
                        Thunk::suspended(Code::Delegate(thunk.clone()), vec![element.clone()])
                    })
                    .collect();
                return Ok(Value::Array(Arc::new(wrapped)));
            }
            _ => false,
        };

        if ok {
            Ok(value)
        } else {
            Err(EvalError::ContractBroken {
                contract: applied.contract.to_string(),
                found: describe_for_contract(&applied.contract, &value),
                field: applied.label.field.clone(),
                contract_span: applied.label.span.clone(),
                value_span: value_span.cloned(),
            })
        }
    }
}

fn describe_for_contract(contract: &Contract, value: &Value) -> String {
    match (contract, value) {
        (Contract::Integer | Contract::Nat, Value::Num(n)) => format!("the number {}", n),
        (Contract::NonEmpty, Value::Str(_)) => "an empty string".to_string(),
        _ => value.describe().to_string(),
    }
}

fn pending_span(thunk: &Thunk) -> Option<Span> {
    match &*thunk.lock() {
        ThunkState::Suspended(pending) => pending.span(),
        ThunkState::Forcing(span) => span.clone(),
        ThunkState::Evaluated(_) => None,
    }
}

fn applied(annotations: &[Annotation], field: Option<&str>) -> Vec<Applied> {
    annotations
        .iter()
        .map(|annotation| Applied {
            contract: annotation.contract.clone(),
            label: Label {
                field: field.map(str::to_string),
                span: Some(annotation.span.clone()),
            },
        })
        .collect()
}

fn root_env() -> Env {
    Env::default().bind("std", Thunk::evaluated(stdlib::std_record()))
}

fn build_record(defs: &[FieldDef], env: &Env) -> Record {
    let names: HashSet<&str> = defs.iter().map(|def| def.name.as_str()).collect();
    let recursive = defs
        .iter()
        .filter_map(|def| def.value.as_ref())
        .any(|value| value.mentions(&|name: &str| names.contains(name)));

    let mut fields = IndexMap::with_capacity(defs.len());
    let mut suspended = Vec::new();
    for def in defs {
        let contracts = applied(&def.annotations, Some(&def.name));
        let value = def.value.as_ref().map(|node| {
            if contracts.is_empty() && node.is_constant() {
                Thunk::for_node(node, env)
            } else {
                let thunk = Thunk::suspended(
                    Code::Term {
                        node: Arc::clone(node),
                        env: env.clone(),
                    },
                    contracts,
                );
                suspended.push(thunk.clone());
                thunk
            }
        });
        fields.insert(
            def.name.clone(),
            Field {
                value,
                not_exported: def.not_exported,
                span: Some(def.name_span.clone()),
            },
        );
    }

    if recursive {
        let mut rec_env = env.clone();
        for (name, field) in &fields {
            let thunk = field.value.clone().unwrap_or_else(|| {
                Thunk::suspended(
                    Code::Missing {
                        field: name.clone(),
                        span: field.span.clone(),
                    },
                    Vec::new(),
                )
            });
            rec_env = rec_env.bind(name.clone(), thunk);
        }
        // Ties a reference cycle between the fields and rec_env.
        for thunk in &suspended {
            thunk.patch_env(&rec_env);
        }
    }

    Record { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl Tracer for Collect {
        fn emit(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn deep(text: &str) -> Result<Value> {
        let config = EvalConfig::default();
        let program = Program::parse("test.ncl", text)?;
        Evaluator::new(&config, &StderrTracer).eval_deep(&program, false)
    }

    fn render(text: &str) -> String {
        format!("{:?}", deep(text).unwrap())
    }

    fn error(text: &str) -> String {
        deep(text).unwrap_err().to_string()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(render("1 + 2 * 3"), "7");
        assert_eq!(render("7 / 2"), "7/2");
        assert_eq!(render("-(2 - 5)"), "3");
        assert_eq!(render("7 % 3"), "1");
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(error("1 / 0"), "division by zero");
    }

    #[test]
    fn test_strings_and_comparisons() {
        assert_eq!(render(r#""a" ++ "b""#), r#""ab""#);
        assert_eq!(render("1 < 2 && 2 <= 2 && !(3 > 4)"), "true");
        assert_eq!(render("[1, 2] == [1, 2]"), "true");
        assert_eq!(render("{ a = 1 } != { a = 2 }"), "true");
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        assert_eq!(render("false && (1 / 0 == 1)"), "false");
        assert_eq!(render("true || missing"), "true");
    }

    #[test]
    fn test_let_and_functions() {
        assert_eq!(render("let add x y = x + y in add 2 3"), "5");
        assert_eq!(render("let f = fun x => x * 2 in f (f 3)"), "12");
    }

    #[test]
    fn test_let_rec() {
        assert_eq!(
            render("let rec fact = fun n => if n == 0 then 1 else n * fact (n - 1) in fact 10"),
            "3628800"
        );
    }

    #[test]
    fn test_recursive_record() {
        assert_eq!(
            render("{ a = b + 1, b = 2 }"),
            r#"{"a": Some(3), "b": Some(2)}"#
        );
    }

    #[test]
    fn test_infinite_recursion() {
        assert_eq!(error("{ a = b, b = a }"), "infinite recursion");
    }

    #[test]
    fn test_depth_limit() {
        let err = std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(|| error("let rec f = fun n => 1 + f n in f 0"))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(err, "maximum evaluation depth of 256 exceeded");
    }

    #[test]
    fn test_deep_forcing_counts_nesting() {
        assert_eq!(
            error("let rec f = fun n => if n == 0 then 1 else [f (n - 1)] in f 3000"),
            "maximum evaluation depth of 256 exceeded"
        );
        assert_eq!(
            render("let rec f = fun n => if n == 0 then 1 else [f (n - 1)] in f 3"),
            "[[[1]]]"
        );
    }

    #[test]
    fn test_contract_blames_field() {
        assert_eq!(
            error(r#"{ foo | String = 1, bar = 2 }"#),
            "contract broken by the value of `foo`"
        );
    }

    #[test]
    fn test_array_contract_is_lazy() {
        let config = EvalConfig::default();
        let program = Program::parse("t", r#"[1, "x"] | Array Number"#).unwrap();
        let mut evaluator = Evaluator::new(&config, &StderrTracer);
        let value = evaluator.eval_shallow(&program).unwrap();
        let Value::Array(elements) = value else {
            panic!("expected an array");
        };
        assert!(evaluator.force(&elements[0]).is_ok());
        let err = evaluator.force(&elements[1]).unwrap_err();
        assert_eq!(err.to_string(), "contract broken by a value");
    }

    #[test]
    fn test_integer_contracts() {
        assert_eq!(render("3 | std.number.Nat"), "3");
        assert_eq!(error("-3 | std.number.Nat"), "contract broken by a value");
        assert_eq!(error("1.5 | std.number.Integer"), "contract broken by a value");
    }

    #[test]
    fn test_missing_definition() {
        assert_eq!(
            error("{ foo | Number }"),
            "missing definition for `foo`"
        );
        assert_eq!(
            error("{ foo | Number, bar = foo }.bar"),
            "missing definition for `foo`"
        );
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(error("{ a = 1 }.b"), "missing field `b`");
    }

    #[test]
    fn test_unbound_identifier() {
        assert_eq!(error("x + 1"), "unbound identifier `x`");
    }

    #[test]
    fn test_function_result_is_rejected() {
        assert_eq!(
            error("fun x => x"),
            "evaluation produced a function, which has no representation outside the evaluator"
        );
    }

    #[test]
    fn test_export_drops_not_exported_fields() {
        let config = EvalConfig::default();
        let program = Program::parse("t", "{ a = 1, b | not_exported = 2 }").unwrap();
        let value = Evaluator::new(&config, &StderrTracer)
            .eval_deep(&program, true)
            .unwrap();
        assert_eq!(format!("{:?}", value), r#"{"a": Some(1)}"#);
    }

    #[test]
    fn test_shallow_leaves_children_suspended() {
        let config = EvalConfig::default();
        let program = Program::parse("t", r#"{ foo = [1, 2 + 3], bar = "hi" }"#).unwrap();
        let mut evaluator = Evaluator::new(&config, &StderrTracer);
        let Value::Record(record) = evaluator.eval_shallow(&program).unwrap() else {
            panic!("expected a record");
        };
        let foo = record.fields["foo"].value.clone().unwrap();
        assert!(!foo.is_evaluated());
        assert!(record.fields["bar"].value.as_ref().unwrap().is_evaluated());

        let Value::Array(elements) = evaluator.force(&foo).unwrap() else {
            panic!("expected an array");
        };
        assert!(elements[0].is_evaluated());
        assert!(!elements[1].is_evaluated());
        assert_eq!(format!("{:?}", evaluator.force(&elements[1]).unwrap()), "5");
    }

    #[test]
    fn test_trace_order() {
        let config = EvalConfig::default();
        let tracer = Collect::default();
        let program =
            Program::parse("t", r#"std.trace "hi" { bye = std.trace "bye" 1 }"#).unwrap();
        Evaluator::new(&config, &tracer)
            .eval_deep(&program, false)
            .unwrap();
        assert_eq!(
            *tracer.0.lock().unwrap(),
            vec!["std.trace: hi\n".to_string(), "std.trace: bye\n".to_string()]
        );
    }

    #[test]
    fn test_failed_force_can_be_retried() {
        let config = EvalConfig::default();
        let program = Program::parse("t", "{ a = 1 / 0 }").unwrap();
        let mut evaluator = Evaluator::new(&config, &StderrTracer);
        let Value::Record(record) = evaluator.eval_shallow(&program).unwrap() else {
            panic!("expected a record");
        };
        let a = record.fields["a"].value.clone().unwrap();
        assert_eq!(evaluator.force(&a).unwrap_err().to_string(), "division by zero");
        assert_eq!(evaluator.force(&a).unwrap_err().to_string(), "division by zero");
    }
}
