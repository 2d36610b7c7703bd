//! Serialization of evaluated values
//!
//! Values are first converted to a [`serde_json::Value`] tree, which every
//! output format is produced from. Only fully evaluated data can be
//! exported: enum variants and unevaluated thunks are rejected with the
//! path of the offending node.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::ToPrimitive;
use serde_json::{Map, Number};

use crate::error::{EvalError, Result};
use crate::lexer::is_integer;
use crate::value::{Thunk, Value};

/// Output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON, pretty-printed
    Json,
    /// YAML
    Yaml,
    /// TOML
    Toml,
}

/// Serialize a fully evaluated value.
pub fn export(value: &Value, format: ExportFormat) -> Result<String> {
    let tree = to_json_value(value)?;
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(&tree).map_err(|e| EvalError::Export {
            message: format!("failed to write JSON: {}", e),
            path: String::new(),
        }),
        ExportFormat::Yaml => serde_yaml::to_string(&tree).map_err(|e| EvalError::Export {
            message: format!("failed to write YAML: {}", e),
            path: String::new(),
        }),
        ExportFormat::Toml => {
            if !tree.is_object() {
                return Err(EvalError::Export {
                    message: "TOML documents must be records".to_string(),
                    path: String::new(),
                });
            }
            toml::to_string_pretty(&tree).map_err(|e| EvalError::Export {
                message: format!("failed to write TOML: {}", e),
                path: String::new(),
            })
        }
    }
}

/// Convert a fully evaluated value into a JSON tree.
pub fn to_json_value(value: &Value) -> Result<serde_json::Value> {
    let mut path = Vec::new();
    convert(value, &mut path)
}

/// Deepest value tree that can be exported. Matches the default
/// [`EvalConfig::max_depth`](crate::eval::EvalConfig::max_depth).
pub const MAX_DEPTH: usize = 256;

enum Segment {
    Field(String),
    Index(usize),
}

fn render_path(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            Segment::Field(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            Segment::Index(i) => out.push_str(&format!("[{}]", i)),
        }
    }
    out
}

fn export_error(message: &str, path: &[Segment]) -> EvalError {
    let rendered = render_path(path);
    let message = if rendered.is_empty() {
        message.to_string()
    } else {
        format!("{} at `{}`", message, rendered)
    };
    EvalError::Export {
        message,
        path: rendered,
    }
}

fn convert(value: &Value, path: &mut Vec<Segment>) -> Result<serde_json::Value> {
    if path.len() > MAX_DEPTH {
        return Err(export_error(
            &format!("cannot serialize a value nested more than {} levels deep", MAX_DEPTH),
            &path[..MAX_DEPTH],
        ));
    }
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Num(n) => number(n, path).map(serde_json::Value::Number),
        Value::Str(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::EnumTag(tag) => Ok(serde_json::Value::String(tag.to_string())),
        Value::EnumVariant(tag, _) => Err(export_error(
            &format!(
                "cannot serialize the enum variant `'{}`, which has no representation outside the evaluator",
                tag
            ),
            path,
        )),
        Value::Closure(_) | Value::Builtin(_) => {
            Err(export_error("cannot serialize a function", path))
        }
        Value::Array(elements) => {
            let mut out = Vec::with_capacity(elements.len());
            for (i, element) in elements.iter().enumerate() {
                path.push(Segment::Index(i));
                out.push(convert_thunk(element, path)?);
                path.pop();
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Record(record) => {
            let mut out = Map::new();
            for (name, field) in &record.fields {
                path.push(Segment::Field(name.clone()));
                let Some(thunk) = &field.value else {
                    return Err(export_error("cannot serialize a field without a value", path));
                };
                out.insert(name.clone(), convert_thunk(thunk, path)?);
                path.pop();
            }
            Ok(serde_json::Value::Object(out))
        }
    }
}

fn convert_thunk(thunk: &Thunk, path: &mut Vec<Segment>) -> Result<serde_json::Value> {
    match thunk.value() {
        Some(value) => convert(&value, path),
        None => Err(export_error(
            "cannot serialize an unevaluated expression; evaluate it first",
            path,
        )),
    }
}

fn number(n: &BigRational, path: &[Segment]) -> Result<Number> {
    if is_integer(n) {
        let int: &BigInt = n.numer();
        if let Some(i) = int.to_i64() {
            return Ok(Number::from(i));
        }
        if let Some(u) = int.to_u64() {
            return Ok(Number::from(u));
        }
    }
    n.to_f64()
        .and_then(Number::from_f64)
        .ok_or_else(|| export_error(&format!("the number {} is out of range", n), path))
}
