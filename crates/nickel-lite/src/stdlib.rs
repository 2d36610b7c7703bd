//! The `std` record

use std::sync::Arc;

use indexmap::IndexMap;
use num_traits::ToPrimitive;

use crate::error::{EvalError, Result, Span};
use crate::eval::Evaluator;
use crate::lexer::is_integer;
use crate::value::{Code, Field, Partial, Record, Thunk, Value};

/// Builtin functions reachable through `std`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `std.trace msg value`
    Trace,
    /// `std.seq a b`
    Seq,
    /// `std.deep_seq a b`
    DeepSeq,
    /// `std.typeof value`
    TypeOf,
    /// `std.array.length arr`
    ArrayLength,
    /// `std.array.at index arr`
    ArrayAt,
    /// `std.array.map f arr`
    ArrayMap,
    /// `std.string.length s`
    StringLength,
    /// `std.string.uppercase s`
    StringUppercase,
    /// `std.string.lowercase s`
    StringLowercase,
}

impl Builtin {
    /// Full path of the builtin.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Trace => "std.trace",
            Builtin::Seq => "std.seq",
            Builtin::DeepSeq => "std.deep_seq",
            Builtin::TypeOf => "std.typeof",
            Builtin::ArrayLength => "std.array.length",
            Builtin::ArrayAt => "std.array.at",
            Builtin::ArrayMap => "std.array.map",
            Builtin::StringLength => "std.string.length",
            Builtin::StringUppercase => "std.string.uppercase",
            Builtin::StringLowercase => "std.string.lowercase",
        }
    }

    /// Number of arguments the builtin takes.
    pub fn arity(self) -> usize {
        match self {
            Builtin::TypeOf
            | Builtin::ArrayLength
            | Builtin::StringLength
            | Builtin::StringUppercase
            | Builtin::StringLowercase => 1,
            Builtin::Trace
            | Builtin::Seq
            | Builtin::DeepSeq
            | Builtin::ArrayAt
            | Builtin::ArrayMap => 2,
        }
    }

    fn value(self) -> Value {
        Value::Builtin(Arc::new(Partial {
            builtin: self,
            args: Vec::new(),
        }))
    }
}

/// Build the `std` record.
pub fn std_record() -> Value {
    let array = record(&[
        ("length", Builtin::ArrayLength.value()),
        ("at", Builtin::ArrayAt.value()),
        ("map", Builtin::ArrayMap.value()),
    ]);
    let string = record(&[
        ("length", Builtin::StringLength.value()),
        ("uppercase", Builtin::StringUppercase.value()),
        ("lowercase", Builtin::StringLowercase.value()),
    ]);
    record(&[
        ("trace", Builtin::Trace.value()),
        ("seq", Builtin::Seq.value()),
        ("deep_seq", Builtin::DeepSeq.value()),
        ("typeof", Builtin::TypeOf.value()),
        ("array", array),
        ("string", string),
    ])
}

fn record(entries: &[(&str, Value)]) -> Value {
    let fields: IndexMap<String, Field> = entries
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                Field {
                    value: Some(Thunk::evaluated(value.clone())),
                    not_exported: false,
                    span: None,
                },
            )
        })
        .collect();
    Value::Record(Arc::new(Record { fields }))
}

/// Run a fully applied builtin.
pub(crate) fn call(
    ev: &mut Evaluator<'_>,
    builtin: Builtin,
    args: &[Thunk],
    span: Option<&Span>,
) -> Result<Value> {
    match (builtin, args) {
        (Builtin::Trace, [message, value]) => {
            let message = string_arg(ev, builtin, message, span)?;
            ev.trace(&format!("std.trace: {}\n", message));
            ev.force(value)
        }
        (Builtin::Seq, [first, second]) => {
            ev.force(first)?;
            ev.force(second)
        }
        (Builtin::DeepSeq, [first, second]) => {
            let value = ev.force(first)?;
            ev.deep(value, false, span)?;
            ev.force(second)
        }
        (Builtin::TypeOf, [value]) => {
            let tag = match ev.force(value)? {
                Value::Num(_) => "Number",
                Value::Bool(_) => "Bool",
                Value::Str(_) => "String",
                Value::EnumTag(_) | Value::EnumVariant(..) => "Enum",
                Value::Closure(_) | Value::Builtin(_) => "Function",
                Value::Array(_) => "Array",
                Value::Record(_) => "Record",
                Value::Null => "Other",
            };
            Ok(Value::EnumTag(Arc::from(tag)))
        }
        (Builtin::ArrayLength, [array]) => {
            let elements = array_arg(ev, builtin, array, span)?;
            Ok(Value::int(len_i64(elements.len())))
        }
        (Builtin::ArrayAt, [index, array]) => {
            let index = match ev.force(index)? {
                Value::Num(n) if is_integer(&n) => n.to_integer().to_usize(),
                other => {
                    return Err(mismatch(builtin, "an integer index", other.describe(), span))
                }
            };
            let elements = array_arg(ev, builtin, array, span)?;
            match index.and_then(|i| elements.get(i)) {
                Some(element) => ev.force(element),
                None => Err(EvalError::TypeMismatch {
                    expected: format!("an index below {}", elements.len()),
                    found: "an index out of bounds".to_string(),
                    span: span.cloned(),
                }),
            }
        }
        (Builtin::ArrayMap, [func, array]) => {
            let elements = array_arg(ev, builtin, array, span)?;
            let mapped = elements
                .iter()
                .map(|element| {
                    Thunk::suspended(
                        Code::Apply {
                            func: func.clone(),
                            arg: element.clone(),
                            span: span.cloned(),
                        },
                        Vec::new(),
                    )
                })
                .collect();
            Ok(Value::Array(Arc::new(mapped)))
        }
        (Builtin::StringLength, [s]) => {
            let s = string_arg(ev, builtin, s, span)?;
            Ok(Value::int(len_i64(s.chars().count())))
        }
        (Builtin::StringUppercase, [s]) => {
            Ok(Value::string(string_arg(ev, builtin, s, span)?.to_uppercase()))
        }
        (Builtin::StringLowercase, [s]) => {
            Ok(Value::string(string_arg(ev, builtin, s, span)?.to_lowercase()))
        }
        _ => Err(EvalError::Interface(format!(
            "{} called with {} arguments",
            builtin.name(),
            args.len()
        ))),
    }
}

fn string_arg(
    ev: &mut Evaluator<'_>,
    builtin: Builtin,
    thunk: &Thunk,
    span: Option<&Span>,
) -> Result<Arc<str>> {
    match ev.force(thunk)? {
        Value::Str(s) => Ok(s),
        other => Err(mismatch(builtin, "a string", other.describe(), span)),
    }
}

fn array_arg(
    ev: &mut Evaluator<'_>,
    builtin: Builtin,
    thunk: &Thunk,
    span: Option<&Span>,
) -> Result<Arc<Vec<Thunk>>> {
    match ev.force(thunk)? {
        Value::Array(elements) => Ok(elements),
        other => Err(mismatch(builtin, "an array", other.describe(), span)),
    }
}

fn mismatch(builtin: Builtin, expected: &str, found: &str, span: Option<&Span>) -> EvalError {
    EvalError::TypeMismatch {
        expected: format!("{} as argument of {}", expected, builtin.name()),
        found: found.to_string(),
        span: span.cloned(),
    }
}

fn len_i64(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
