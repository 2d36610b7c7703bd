//! Error types for parsing and evaluation

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A named program text.
#[derive(Debug)]
pub struct Source {
    /// Label used in diagnostics
    pub name: String,

    /// The full program text
    pub text: String,
}

impl Source {
    /// Create a new source.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            text: text.into(),
        })
    }
}

/// A byte range within a [`Source`].
#[derive(Clone)]
pub struct Span {
    /// The source this span points into
    pub source: Arc<Source>,

    /// Byte offset of the first character
    pub start: usize,

    /// Byte offset one past the last character
    pub end: usize,
}

impl Span {
    /// Create a span.
    pub fn new(source: Arc<Source>, start: usize, end: usize) -> Self {
        Self { source, start, end }
    }

    /// A span covering both `self` and `other`.
    pub fn to(&self, other: &Span) -> Span {
        Span {
            source: Arc::clone(&self.source),
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// 1-indexed line and column of the start of the span.
    pub fn line_col(&self) -> (usize, usize) {
        let text = &self.source.text;
        let start = self.start.min(text.len());
        let before = &text[..start];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = text[line_start..start].chars().count() + 1;
        (line, column)
    }

    /// The full text of the line the span starts on.
    pub fn line_text(&self) -> &str {
        let text = &self.source.text;
        let start = self.start.min(text.len());
        let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = text[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(text.len());
        &text[line_start..line_end]
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.source.name, self.start, self.end)
    }
}

/// Main error type for parsing, evaluation and export.
#[derive(Error, Debug, Clone)]
pub enum EvalError {
    /// The program text is malformed
    #[error("{message}")]
    Parse {
        /// What went wrong
        message: String,
        /// Where it went wrong
        span: Option<Span>,
    },

    /// A variable is not in scope
    #[error("unbound identifier `{name}`")]
    UnboundIdentifier {
        /// The identifier
        name: String,
        /// Where it was used
        span: Span,
    },

    /// A primitive operation got the wrong kind of value
    #[error("type error: expected {expected}, got {found}")]
    TypeMismatch {
        /// What the operation needed
        expected: String,
        /// What it got
        found: String,
        /// The offending expression
        span: Option<Span>,
    },

    /// A contract rejected a value
    #[error("contract broken by {}", blame_target(.field))]
    ContractBroken {
        /// The contract, as written
        contract: String,
        /// Description of the rejected value
        found: String,
        /// The record field or binding the contract was attached to
        field: Option<String>,
        /// Where the contract was written
        contract_span: Option<Span>,
        /// The expression that produced the rejected value
        value_span: Option<Span>,
    },

    /// Field access on a record without that field
    #[error("missing field `{field}`")]
    MissingField {
        /// The requested field
        field: String,
        /// The access expression
        span: Option<Span>,
    },

    /// A field was declared but never given a value
    #[error("missing definition for `{field}`")]
    MissingDefinition {
        /// The field without a value
        field: String,
        /// Where the field was declared
        span: Option<Span>,
    },

    /// A value depends on itself
    #[error("infinite recursion")]
    InfiniteRecursion {
        /// The expression being evaluated when the cycle was found
        span: Option<Span>,
    },

    /// Evaluation nested deeper than the configured limit
    #[error("maximum evaluation depth of {max} exceeded")]
    DepthExceeded {
        /// The configured limit
        max: usize,
        /// The expression that crossed the limit
        span: Option<Span>,
    },

    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero {
        /// The division expression
        span: Option<Span>,
    },

    /// Application of something that is not a function
    #[error("not a function: cannot apply {found}")]
    NotAFunction {
        /// Description of the applied value
        found: String,
        /// The application expression
        span: Option<Span>,
    },

    /// A function reached the evaluation boundary
    #[error("evaluation produced a function, which has no representation outside the evaluator")]
    FunctionResult {
        /// The expression that produced the function
        span: Option<Span>,
    },

    /// A value has no representation in the requested format
    #[error("{message}")]
    Export {
        /// What went wrong
        message: String,
        /// Path to the offending node, e.g. `foo[1]`
        path: String,
    },

    /// Misuse of the C interface
    #[error("{0}")]
    Interface(String),
}

fn blame_target(field: &Option<String>) -> String {
    match field {
        Some(field) => format!("the value of `{}`", field),
        None => "a value".to_string(),
    }
}

impl EvalError {
    /// Create a parse error.
    pub fn parse(message: impl Into<String>, span: Option<Span>) -> Self {
        EvalError::Parse {
            message: message.into(),
            span,
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>, span: &Span) -> Self {
        EvalError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
            span: Some(span.clone()),
        }
    }

    /// The primary location of the error, if it has one.
    pub fn span(&self) -> Option<&Span> {
        match self {
            EvalError::Parse { span, .. }
            | EvalError::TypeMismatch { span, .. }
            | EvalError::MissingField { span, .. }
            | EvalError::MissingDefinition { span, .. }
            | EvalError::InfiniteRecursion { span }
            | EvalError::DepthExceeded { span, .. }
            | EvalError::DivisionByZero { span }
            | EvalError::NotAFunction { span, .. }
            | EvalError::FunctionResult { span } => span.as_ref(),
            EvalError::UnboundIdentifier { span, .. } => Some(span),
            EvalError::ContractBroken {
                value_span,
                contract_span,
                ..
            } => value_span.as_ref().or(contract_span.as_ref()),
            EvalError::Export { .. } | EvalError::Interface(_) => None,
        }
    }

    /// Additional notes shown below the main message.
    pub fn notes(&self) -> Vec<String> {
        match self {
            EvalError::ContractBroken {
                contract, found, ..
            } => vec![format!("expected `{}`, got {}", contract, found)],
            EvalError::MissingDefinition { field, .. } => vec![format!(
                "`{}` was declared without a value and was required here",
                field
            )],
            EvalError::Export { path, .. } if !path.is_empty() => {
                vec![format!("at path `{}`", path)]
            }
            EvalError::DepthExceeded { .. } => {
                vec!["this is usually caused by unbounded recursion".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EvalError>;
