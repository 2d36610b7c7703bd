//! Runtime values, thunks and environments

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use num_rational::BigRational;

use crate::error::Span;
use crate::stdlib::Builtin;
use crate::term::{Contract, Node};

/// A value in weak head normal form.
///
/// Children of records, arrays and enum variants are [`Thunk`]s and may
/// still be unevaluated.
#[derive(Clone)]
pub enum Value {
    /// `null`
    Null,
    /// A boolean
    Bool(bool),
    /// An exact rational number
    Num(BigRational),
    /// A string
    Str(Arc<str>),
    /// A bare enum tag
    EnumTag(Arc<str>),
    /// An enum tag with a payload
    EnumVariant(Arc<str>, Thunk),
    /// A record
    Record(Arc<Record>),
    /// An array
    Array(Arc<Vec<Thunk>>),
    /// A user-defined function
    Closure(Arc<Closure>),
    /// A partially applied builtin
    Builtin(Arc<Partial>),
}

impl Value {
    /// Article-prefixed description used in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "a bool",
            Value::Num(_) => "a number",
            Value::Str(_) => "a string",
            Value::EnumTag(_) => "an enum tag",
            Value::EnumVariant(..) => "an enum variant",
            Value::Record(_) => "a record",
            Value::Array(_) => "an array",
            Value::Closure(_) | Value::Builtin(_) => "a function",
        }
    }

    /// Whether the value is callable.
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Builtin(_))
    }

    /// Build a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Build a number value from an integer.
    pub fn int(n: i64) -> Self {
        Value::Num(BigRational::from_integer(n.into()))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::EnumTag(tag) => write!(f, "'{}", tag),
            Value::EnumVariant(tag, payload) => write!(f, "'{} {:?}", tag, payload),
            Value::Record(record) => {
                let mut map = f.debug_map();
                for (name, field) in &record.fields {
                    map.entry(name, &field.value);
                }
                map.finish()
            }
            Value::Array(elements) => f.debug_list().entries(elements.iter()).finish(),
            Value::Closure(closure) => write!(f, "<fun {}>", closure.param),
            Value::Builtin(partial) => write!(f, "<builtin {}>", partial.builtin.name()),
        }
    }
}

/// A record field.
#[derive(Clone)]
pub struct Field {
    /// The field's value, or `None` if it was declared without one
    pub value: Option<Thunk>,

    /// Whether the field is omitted from exports
    pub not_exported: bool,

    /// Where the field was declared
    pub span: Option<Span>,
}

/// A record: field names in definition order.
#[derive(Clone, Default)]
pub struct Record {
    /// The fields
    pub fields: IndexMap<String, Field>,
}

/// A function value.
pub struct Closure {
    /// Parameter name
    pub param: String,
    /// Body
    pub body: Arc<Node>,
    /// Captured environment
    pub env: Env,
}

/// A builtin waiting for the rest of its arguments.
pub struct Partial {
    /// Which builtin
    pub builtin: Builtin,
    /// Arguments received so far
    pub args: Vec<Thunk>,
}

// ═══════════════════════════════════════════════════════════════════════
// Thunks
// ═══════════════════════════════════════════════════════════════════════

/// Where a contract came from, for blame.
#[derive(Clone, Debug)]
pub struct Label {
    /// The record field the contract annotates
    pub field: Option<String>,
    /// Where the contract was written
    pub span: Option<Span>,
}

/// A contract waiting to be checked against a thunk's value.
#[derive(Clone, Debug)]
pub struct Applied {
    /// The contract
    pub contract: Contract,
    /// Blame information
    pub label: Label,
}

/// The code a suspended thunk will run.
#[derive(Clone)]
pub enum Code {
    /// Evaluate a term in an environment
    Term {
        /// The term
        node: Arc<Node>,
        /// Its environment
        env: Env,
    },
    /// Take the value of another thunk
    Delegate(Thunk),
    /// Apply a function to an argument
    Apply {
        /// The function
        func: Thunk,
        /// The argument
        arg: Thunk,
        /// The expression responsible for the application
        span: Option<Span>,
    },
    /// A declared field with no definition
    Missing {
        /// Field name
        field: String,
        /// Where it was declared
        span: Option<Span>,
    },
}

/// A suspended computation together with the contracts its result must satisfy.
#[derive(Clone)]
pub struct Pending {
    /// What to run
    pub code: Code,
    /// Checked in order after the code runs
    pub contracts: Vec<Applied>,
}

impl Pending {
    /// Span of the code, if it has one.
    pub fn span(&self) -> Option<Span> {
        match &self.code {
            Code::Term { node, .. } => Some(node.span.clone()),
            Code::Apply { span, .. } | Code::Missing { span, .. } => span.clone(),
            Code::Delegate(_) => None,
        }
    }
}

pub(crate) enum ThunkState {
    Suspended(Pending),
    Forcing(Option<Span>),
    Evaluated(Value),
}

/// A shared, memoizing, possibly unevaluated value.
#[derive(Clone)]
pub struct Thunk(Arc<Mutex<ThunkState>>);

impl Thunk {
    /// A thunk that is already a value.
    pub fn evaluated(value: Value) -> Self {
        Self(Arc::new(Mutex::new(ThunkState::Evaluated(value))))
    }

    /// A thunk that will run `code` when forced.
    pub fn suspended(code: Code, contracts: Vec<Applied>) -> Self {
        Self(Arc::new(Mutex::new(ThunkState::Suspended(Pending {
            code,
            contracts,
        }))))
    }

    /// A thunk for `node` in `env`, evaluated eagerly when the node is a literal.
    pub fn for_node(node: &Arc<Node>, env: &Env) -> Self {
        match literal(node) {
            Some(value) => Self::evaluated(value),
            None => Self::suspended(
                Code::Term {
                    node: Arc::clone(node),
                    env: env.clone(),
                },
                Vec::new(),
            ),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ThunkState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The value, if the thunk has been evaluated.
    pub fn value(&self) -> Option<Value> {
        match &*self.lock() {
            ThunkState::Evaluated(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether the thunk has been evaluated.
    pub fn is_evaluated(&self) -> bool {
        matches!(&*self.lock(), ThunkState::Evaluated(_))
    }

    /// Replace the environment of a suspended term.
    ///
    /// Used to tie the knot for recursive bindings.
    pub fn patch_env(&self, new_env: &Env) {
        if let ThunkState::Suspended(Pending {
            code: Code::Term { env, .. },
            ..
        }) = &mut *self.lock()
        {
            *env = new_env.clone();
        }
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.lock() {
            ThunkState::Evaluated(value) => value.fmt(f),
            ThunkState::Forcing(_) => write!(f, "<forcing>"),
            ThunkState::Suspended(_) => write!(f, "<thunk>"),
        }
    }
}

/// The value of a literal node.
pub fn literal(node: &Node) -> Option<Value> {
    use crate::term::Term;
    let value = match &node.term {
        Term::Null => Value::Null,
        Term::Bool(b) => Value::Bool(*b),
        Term::Num(n) => Value::Num(n.clone()),
        Term::Str(s) => Value::string(s),
        Term::EnumTag(tag) => Value::EnumTag(Arc::from(tag.as_str())),
        _ => return None,
    };
    Some(value)
}

// ═══════════════════════════════════════════════════════════════════════
// Environments
// ═══════════════════════════════════════════════════════════════════════

struct Frame {
    name: String,
    thunk: Thunk,
    parent: Env,
}

/// A persistent chain of variable bindings.
#[derive(Clone, Default)]
pub struct Env(Option<Arc<Frame>>);

impl Env {
    /// A new environment with `name` bound in front of `self`.
    pub fn bind(&self, name: impl Into<String>, thunk: Thunk) -> Env {
        Env(Some(Arc::new(Frame {
            name: name.into(),
            thunk,
            parent: self.clone(),
        })))
    }

    /// The innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<&Thunk> {
        let mut current = self.0.as_ref();
        while let Some(frame) = current {
            if frame.name == name {
                return Some(&frame.thunk);
            }
            current = frame.parent.0.as_ref();
        }
        None
    }
}
