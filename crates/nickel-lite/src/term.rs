//! Abstract syntax

use std::fmt;
use std::sync::Arc;

use num_rational::BigRational;

use crate::error::Span;

/// A term together with its location.
#[derive(Debug)]
pub struct Node {
    /// The term
    pub term: Term,

    /// Where it was written
    pub span: Span,
}

impl Node {
    /// Wrap a term.
    pub fn new(term: Term, span: Span) -> Arc<Self> {
        Arc::new(Self { term, span })
    }

    /// Whether the term is a literal that needs no evaluation.
    pub fn is_constant(&self) -> bool {
        matches!(
            self.term,
            Term::Null | Term::Bool(_) | Term::Num(_) | Term::Str(_) | Term::EnumTag(_)
        )
    }

    /// Whether any variable in this term is named by `is_name`.
    ///
    /// Shadowing is ignored, so the answer may be a false positive but is
    /// never a false negative.
    pub fn mentions(&self, is_name: &dyn Fn(&str) -> bool) -> bool {
        match &self.term {
            Term::Null | Term::Bool(_) | Term::Num(_) | Term::Str(_) | Term::EnumTag(_) => false,
            Term::Var(name) => is_name(name),
            Term::EnumVariant(_, inner)
            | Term::Access(inner, _)
            | Term::Op1(_, inner)
            | Term::Annotated(inner, _)
            | Term::Fun { body: inner, .. } => inner.mentions(is_name),
            Term::Record(fields) => fields
                .iter()
                .filter_map(|field| field.value.as_ref())
                .any(|value| value.mentions(is_name)),
            Term::Array(elements) => elements.iter().any(|e| e.mentions(is_name)),
            Term::Let { bound, body, .. } => bound.mentions(is_name) || body.mentions(is_name),
            Term::App(lhs, rhs) | Term::Op2(_, lhs, rhs) => {
                lhs.mentions(is_name) || rhs.mentions(is_name)
            }
            Term::If(cond, then_branch, else_branch) => {
                cond.mentions(is_name)
                    || then_branch.mentions(is_name)
                    || else_branch.mentions(is_name)
            }
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `++`
    StrConcat,
    /// `@`
    ArrayConcat,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinOp {
    /// The operator as written.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::StrConcat => "++",
            BinOp::ArrayConcat => "@",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// A runtime-checked contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contract {
    /// Accepts anything
    Dyn,
    /// Any number
    Number,
    /// Any string
    String,
    /// `true` or `false`
    Bool,
    /// `std.number.Integer`
    Integer,
    /// `std.number.Nat`
    Nat,
    /// `std.string.NonEmpty`
    NonEmpty,
    /// An array whose elements satisfy the inner contract
    Array(Box<Contract>),
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contract::Dyn => write!(f, "Dyn"),
            Contract::Number => write!(f, "Number"),
            Contract::String => write!(f, "String"),
            Contract::Bool => write!(f, "Bool"),
            Contract::Integer => write!(f, "std.number.Integer"),
            Contract::Nat => write!(f, "std.number.Nat"),
            Contract::NonEmpty => write!(f, "std.string.NonEmpty"),
            Contract::Array(inner) => match inner.as_ref() {
                Contract::Array(_) => write!(f, "Array ({})", inner),
                _ => write!(f, "Array {}", inner),
            },
        }
    }
}

/// A contract as written in the source.
#[derive(Debug, Clone)]
pub struct Annotation {
    /// The contract
    pub contract: Contract,

    /// Where it was written
    pub span: Span,
}

/// A record field definition.
#[derive(Debug)]
pub struct FieldDef {
    /// Field name
    pub name: String,

    /// Where the name was written
    pub name_span: Span,

    /// Contracts attached with `|` or `:`
    pub annotations: Vec<Annotation>,

    /// Whether the field is marked `not_exported`
    pub not_exported: bool,

    /// Documentation attached with `| doc`
    pub doc: Option<String>,

    /// The definition, if any
    pub value: Option<Arc<Node>>,
}

/// Terms of the language.
#[derive(Debug)]
pub enum Term {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// A number literal
    Num(BigRational),
    /// A string literal
    Str(String),
    /// `'Tag`
    EnumTag(String),
    /// `'Tag payload`
    EnumVariant(String, Arc<Node>),
    /// `{ ... }`
    Record(Vec<FieldDef>),
    /// `[ ... ]`
    Array(Vec<Arc<Node>>),
    /// A variable
    Var(String),
    /// `let [rec] name = bound in body`
    Let {
        /// Bound name
        name: String,
        /// Whether `bound` may refer to `name`
        rec: bool,
        /// Contracts on the binding
        annotations: Vec<Annotation>,
        /// Bound expression
        bound: Arc<Node>,
        /// Body
        body: Arc<Node>,
    },
    /// `fun param => body`
    Fun {
        /// Parameter name
        param: String,
        /// Body
        body: Arc<Node>,
    },
    /// `f x`
    App(Arc<Node>, Arc<Node>),
    /// `r.field`
    Access(Arc<Node>, String),
    /// Unary operation
    Op1(UnOp, Arc<Node>),
    /// Binary operation
    Op2(BinOp, Arc<Node>, Arc<Node>),
    /// `if cond then a else b`
    If(Arc<Node>, Arc<Node>, Arc<Node>),
    /// `e | C`
    Annotated(Arc<Node>, Vec<Annotation>),
}
