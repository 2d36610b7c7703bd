//! The `nickel_lang` C interface
//!
//! Every pointer argument must be either null (where documented as
//! optional) or a live object allocated by the matching `*_alloc`
//! function. Borrowed `nickel_record`, `nickel_array` and `nickel_number`
//! pointers stay valid until the expression they came from is overwritten
//! or freed. Panics never unwind out of these functions.

#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

use std::collections::HashSet;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use num_rational::BigRational;
use num_traits::ToPrimitive;

use crate::diagnostic::{self, ReportFormat};
use crate::error::{EvalError, Result};
use crate::eval::{EvalConfig, Evaluator, Program, StderrTracer, Tracer};
use crate::export::{self, ExportFormat};
use crate::lexer::is_integer;
use crate::value::{Record, Thunk, Value};

/// Result of fallible functions.
pub type nickel_result = c_uint;
/// Success.
pub const NICKEL_RESULT_OK: nickel_result = 0;
/// Failure; the error slot was filled.
pub const NICKEL_RESULT_ERR: nickel_result = 1;

/// Error rendering selector.
pub type nickel_error_format = c_uint;

/// Write callback.
pub type nickel_write_callback =
    Option<unsafe extern "C" fn(context: *mut c_void, buf: *const u8, len: usize) -> usize>;
/// Flush callback.
pub type nickel_flush_callback = Option<unsafe extern "C" fn(context: *const c_void)>;

// ═══════════════════════════════════════════════════════════════════════
// Objects
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
struct TraceCallback {
    write: unsafe extern "C" fn(*mut c_void, *const u8, usize) -> usize,
    flush: nickel_flush_callback,
    user_data: *mut c_void,
}

#[derive(Clone, Copy)]
enum Sink {
    Callback(TraceCallback),
    Stderr,
}

impl Tracer for Sink {
    fn emit(&self, message: &str) {
        match self {
            Sink::Stderr => StderrTracer.emit(message),
            Sink::Callback(cb) => {
                // SAFETY: the host promised `write`/`flush` accept `user_data`
                // for as long as the callback is installed.
                unsafe {
                    write_all(cb.write, cb.user_data, message.as_bytes());
                    if let Some(flush) = cb.flush {
                        flush(cb.user_data);
                    }
                }
            }
        }
    }
}

unsafe fn write_all(
    write: unsafe extern "C" fn(*mut c_void, *const u8, usize) -> usize,
    user_data: *mut c_void,
    mut bytes: &[u8],
) -> bool {
    while !bytes.is_empty() {
        let written = write(user_data, bytes.as_ptr(), bytes.len());
        if written == 0 || written > bytes.len() {
            return false;
        }
        bytes = &bytes[written..];
    }
    true
}

/// The trace callback of a context, shared with the sessions it starts.
#[derive(Clone, Default)]
struct TraceSetting(Arc<Mutex<Option<TraceCallback>>>);

impl TraceSetting {
    fn set(&self, callback: Option<TraceCallback>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// The sink for an evaluation starting now.
    fn current(&self) -> Sink {
        let callback = *self.0.lock().unwrap_or_else(PoisonError::into_inner);
        callback.map_or(Sink::Stderr, Sink::Callback)
    }
}

/// Interpreter-wide settings.
pub struct nickel_context {
    source_name: String,
    trace: TraceSetting,
    config: EvalConfig,
}

impl nickel_context {
    fn session(&self) -> Session {
        Session {
            trace: self.trace.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
enum Slot {
    Value(Value),
    Thunk(Thunk),
}

impl Slot {
    fn of(thunk: &Thunk) -> Self {
        match thunk.value() {
            Some(value) => Slot::Value(value),
            None => Slot::Thunk(thunk.clone()),
        }
    }
}

/// An expression slot.
pub struct nickel_expr {
    slot: Option<Slot>,
}

impl nickel_expr {
    fn value(&self) -> Option<&Value> {
        match &self.slot {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }
}

/// An error slot.
pub struct nickel_error {
    error: Option<EvalError>,
}

/// A string slot.
pub struct nickel_string {
    data: String,
}

/// A record borrowed from an expression.
#[repr(transparent)]
pub struct nickel_record(Record);

/// An array borrowed from an expression.
#[repr(transparent)]
pub struct nickel_array(Vec<Thunk>);

/// A number borrowed from an expression.
#[repr(transparent)]
pub struct nickel_number(BigRational);

/// Evaluation settings for resuming a shallow result. The trace callback is
/// read when each resumption starts, so it follows the context's latest
/// `nickel_context_set_trace_callback`.
#[derive(Clone)]
struct Session {
    trace: TraceSetting,
    config: EvalConfig,
}

/// The session of a shallow evaluation.
pub struct nickel_virtual_machine {
    session: Option<Session>,
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(fallback)
}

fn alloc<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}

unsafe fn free<T>(ptr: *mut T) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
}

fn intern(tag: &str) -> &'static str {
    static TAGS: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
    let mut tags = TAGS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = tags.get(tag) {
        return existing;
    }
    let leaked: &'static str = Box::leak(tag.to_owned().into_boxed_str());
    tags.insert(leaked);
    leaked
}

unsafe fn write_str(s: &str, out: *mut *const c_char) -> usize {
    if !out.is_null() {
        *out = s.as_ptr().cast();
    }
    s.len()
}

unsafe fn store_slot(out: *mut nickel_expr, slot: Option<Slot>) {
    if let Some(out) = out.as_mut() {
        out.slot = slot;
    }
}

unsafe fn finish(
    result: Result<Value>,
    out_expr: *mut nickel_expr,
    out_error: *mut nickel_error,
) -> nickel_result {
    match result {
        Ok(value) => {
            store_slot(out_expr, Some(Slot::Value(value)));
            NICKEL_RESULT_OK
        }
        Err(err) => {
            tracing::debug!(error = %err, "evaluation failed");
            if let Some(out) = out_error.as_mut() {
                out.error = Some(err);
            }
            NICKEL_RESULT_ERR
        }
    }
}

fn panicked() -> EvalError {
    EvalError::Interface("internal error: the evaluator panicked".to_string())
}

#[derive(Clone, Copy, Debug)]
enum Mode {
    Deep,
    Export,
    Shallow,
}

unsafe fn eval_source(
    ctx: *mut nickel_context,
    src: *const c_char,
    mode: Mode,
) -> Result<(Value, Session)> {
    let ctx = ctx
        .as_ref()
        .ok_or_else(|| EvalError::Interface("null context".to_string()))?;
    if src.is_null() {
        return Err(EvalError::Interface("null source".to_string()));
    }
    let text = CStr::from_ptr(src)
        .to_str()
        .map_err(|_| EvalError::parse("source is not valid UTF-8", None))?;

    tracing::debug!(source = %ctx.source_name, ?mode, "evaluating");
    let program = Program::parse(&ctx.source_name, text)?;
    let session = ctx.session();
    let sink = session.trace.current();
    let mut evaluator = Evaluator::new(&session.config, &sink);
    let value = match mode {
        Mode::Deep => evaluator.eval_deep(&program, false)?,
        Mode::Export => evaluator.eval_deep(&program, true)?,
        Mode::Shallow => evaluator.eval_shallow(&program)?,
    };
    Ok((value, session))
}

fn resume(session: &Session, slot: Option<Slot>) -> Result<Value> {
    match slot {
        None => Err(EvalError::Interface("expression slot is empty".to_string())),
        Some(Slot::Value(value)) => Ok(value),
        Some(Slot::Thunk(thunk)) => {
            let sink = session.trace.current();
            let mut evaluator = Evaluator::new(&session.config, &sink);
            let value = evaluator.force(&thunk)?;
            if value.is_function() {
                return Err(EvalError::FunctionResult { span: None });
            }
            Ok(value)
        }
    }
}

unsafe fn serialize(
    expr: *const nickel_expr,
    out_string: *mut nickel_string,
    out_err: *mut nickel_error,
    format: ExportFormat,
) -> nickel_result {
    let result = guarded(Err(panicked()), || {
        let expr = expr
            .as_ref()
            .ok_or_else(|| EvalError::Interface("null expression".to_string()))?;
        match &expr.slot {
            Some(Slot::Value(value)) => export::export(value, format),
            Some(Slot::Thunk(_)) => Err(EvalError::Export {
                message: "cannot serialize an unevaluated expression; evaluate it first"
                    .to_string(),
                path: String::new(),
            }),
            None => Err(EvalError::Interface("expression slot is empty".to_string())),
        }
    });
    match result {
        Ok(text) => {
            if let Some(out) = out_string.as_mut() {
                out.data = text;
            }
            NICKEL_RESULT_OK
        }
        Err(err) => {
            if let Some(out) = out_err.as_mut() {
                out.error = Some(err);
            }
            NICKEL_RESULT_ERR
        }
    }
}

fn report_format(format: nickel_error_format) -> Option<ReportFormat> {
    Some(match format {
        0 => ReportFormat::Text,
        1 => ReportFormat::AnsiText,
        2 => ReportFormat::Json,
        3 => ReportFormat::Yaml,
        4 => ReportFormat::Toml,
        _ => return None,
    })
}

unsafe fn render_error(err: *const nickel_error, format: nickel_error_format) -> Option<String> {
    let error = err.as_ref()?.error.as_ref()?;
    let format = report_format(format)?;
    guarded(None, || diagnostic::render(error, format).ok())
}

// ═══════════════════════════════════════════════════════════════════════
// Context
// ═══════════════════════════════════════════════════════════════════════

/// Allocate a context.
#[no_mangle]
pub extern "C" fn nickel_context_alloc() -> *mut nickel_context {
    alloc(nickel_context {
        source_name: "<main>".to_string(),
        trace: TraceSetting::default(),
        config: EvalConfig::default(),
    })
}

/// Free a context.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_free(ctx: *mut nickel_context) {
    free(ctx);
}

/// Install the callback invoked by `std.trace`. A null `write` restores
/// the default of writing to standard error.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_set_trace_callback(
    ctx: *mut nickel_context,
    write: nickel_write_callback,
    flush: nickel_flush_callback,
    user_data: *mut c_void,
) {
    if let Some(ctx) = ctx.as_ref() {
        ctx.trace.set(write.map(|write| TraceCallback {
            write,
            flush,
            user_data,
        }));
    }
}

/// Name the main program in diagnostics.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_set_source_name(
    ctx: *mut nickel_context,
    name: *const c_char,
) {
    if let Some(ctx) = ctx.as_mut() {
        if !name.is_null() {
            ctx.source_name = CStr::from_ptr(name).to_string_lossy().into_owned();
        }
    }
}

/// Evaluate a program deeply.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_eval_deep(
    ctx: *mut nickel_context,
    src: *const c_char,
    out_expr: *mut nickel_expr,
    out_error: *mut nickel_error,
) -> nickel_result {
    let result = guarded(Err(panicked()), || eval_source(ctx, src, Mode::Deep));
    finish(result.map(|(value, _)| value), out_expr, out_error)
}

/// Evaluate a program deeply, leaving out `not_exported` fields.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_eval_deep_for_export(
    ctx: *mut nickel_context,
    src: *const c_char,
    out_expr: *mut nickel_expr,
    out_error: *mut nickel_error,
) -> nickel_result {
    let result = guarded(Err(panicked()), || eval_source(ctx, src, Mode::Export));
    finish(result.map(|(value, _)| value), out_expr, out_error)
}

/// Evaluate a program to weak head normal form.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_eval_shallow(
    ctx: *mut nickel_context,
    src: *const c_char,
    out_expr: *mut nickel_expr,
    out_vm: *mut nickel_virtual_machine,
    out_error: *mut nickel_error,
) -> nickel_result {
    let result = guarded(Err(panicked()), || eval_source(ctx, src, Mode::Shallow));
    let result = result.map(|(value, session)| {
        if let Some(vm) = out_vm.as_mut() {
            vm.session = Some(session);
        }
        value
    });
    finish(result, out_expr, out_error)
}

/// Evaluate an expression to weak head normal form.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_eval_expr_shallow(
    ctx: *mut nickel_context,
    expr: *const nickel_expr,
    out_expr: *mut nickel_expr,
    out_error: *mut nickel_error,
) -> nickel_result {
    let result = guarded(Err(panicked()), || {
        let ctx = ctx
            .as_ref()
            .ok_or_else(|| EvalError::Interface("null context".to_string()))?;
        let slot = expr.as_ref().and_then(|expr| expr.slot.clone());
        resume(&ctx.session(), slot)
    });
    finish(result, out_expr, out_error)
}

/// Serialize an evaluated expression as JSON.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_expr_to_json(
    _ctx: *mut nickel_context,
    expr: *const nickel_expr,
    out_string: *mut nickel_string,
    out_err: *mut nickel_error,
) -> nickel_result {
    serialize(expr, out_string, out_err, ExportFormat::Json)
}

/// Serialize an evaluated expression as YAML.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_expr_to_yaml(
    _ctx: *mut nickel_context,
    expr: *const nickel_expr,
    out_string: *mut nickel_string,
    out_err: *mut nickel_error,
) -> nickel_result {
    serialize(expr, out_string, out_err, ExportFormat::Yaml)
}

/// Serialize an evaluated expression as TOML.
#[no_mangle]
pub unsafe extern "C" fn nickel_context_expr_to_toml(
    _ctx: *mut nickel_context,
    expr: *const nickel_expr,
    out_string: *mut nickel_string,
    out_err: *mut nickel_error,
) -> nickel_result {
    serialize(expr, out_string, out_err, ExportFormat::Toml)
}

// ═══════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════

/// Allocate an empty expression slot.
#[no_mangle]
pub extern "C" fn nickel_expr_alloc() -> *mut nickel_expr {
    alloc(nickel_expr { slot: None })
}

/// Free an expression slot.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_free(expr: *mut nickel_expr) {
    free(expr);
}

unsafe fn expr_matches(expr: *const nickel_expr, pred: impl Fn(&Value) -> bool) -> c_int {
    c_int::from(expr.as_ref().and_then(nickel_expr::value).is_some_and(pred))
}

/// Is this expression a boolean?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_bool(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Bool(_)))
}

/// Is this expression a number?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_number(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Num(_)))
}

/// Is this expression a string?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_str(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Str(_)))
}

/// Is this expression an enum tag?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_enum_tag(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::EnumTag(_)))
}

/// Is this expression an enum variant?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_enum_variant(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::EnumVariant(..)))
}

/// Is this expression a record?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_record(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Record(_)))
}

/// Is this expression an array?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_array(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Array(_)))
}

/// Is this expression evaluated to weak head normal form?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_value(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |_| true)
}

/// Is this expression null?
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_is_null(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Null))
}

/// The boolean value, or 0 if the expression is not a boolean.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_bool(expr: *const nickel_expr) -> c_int {
    expr_matches(expr, |v| matches!(v, Value::Bool(true)))
}

/// The string contents, owned by `expr`.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_str(
    expr: *const nickel_expr,
    out_str: *mut *const c_char,
) -> usize {
    match expr.as_ref().and_then(nickel_expr::value) {
        Some(Value::Str(s)) => write_str(s, out_str),
        _ => write_str("", out_str),
    }
}

/// The number, borrowed from `expr`, or null.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_number(expr: *const nickel_expr) -> *const nickel_number {
    match expr.as_ref().and_then(nickel_expr::value) {
        Some(Value::Num(n)) => (n as *const BigRational).cast(),
        _ => ptr::null(),
    }
}

/// The enum tag. Tags are interned and never freed.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_enum_tag(
    expr: *const nickel_expr,
    out_str: *mut *const c_char,
) -> usize {
    match expr.as_ref().and_then(nickel_expr::value) {
        Some(Value::EnumTag(tag)) => write_str(intern(tag), out_str),
        _ => write_str("", out_str),
    }
}

/// The enum variant's tag, with its payload written to `out_expr`.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_enum_variant(
    expr: *const nickel_expr,
    out_str: *mut *const c_char,
    out_expr: *mut nickel_expr,
) -> usize {
    let variant = match expr.as_ref().and_then(nickel_expr::value) {
        Some(Value::EnumVariant(tag, payload)) => Some((intern(tag), Slot::of(payload))),
        _ => None,
    };
    match variant {
        Some((tag, payload)) => {
            store_slot(out_expr, Some(payload));
            write_str(tag, out_str)
        }
        None => write_str("", out_str),
    }
}

/// The record, borrowed from `expr`, or null.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_record(expr: *const nickel_expr) -> *const nickel_record {
    match expr.as_ref().and_then(nickel_expr::value) {
        Some(Value::Record(record)) => Arc::as_ptr(record).cast(),
        _ => ptr::null(),
    }
}

/// The array, borrowed from `expr`, or null.
#[no_mangle]
pub unsafe extern "C" fn nickel_expr_as_array(expr: *const nickel_expr) -> *const nickel_array {
    match expr.as_ref().and_then(nickel_expr::value) {
        Some(Value::Array(elements)) => Arc::as_ptr(elements).cast(),
        _ => ptr::null(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Numbers, arrays, records, strings
// ═══════════════════════════════════════════════════════════════════════

/// Is this number an integer within `int64_t` range?
#[no_mangle]
pub unsafe extern "C" fn nickel_number_is_i64(num: *const nickel_number) -> c_int {
    c_int::from(
        num.as_ref()
            .is_some_and(|n| is_integer(&n.0) && n.0.to_integer().to_i64().is_some()),
    )
}

/// The number as `int64_t`, or 0 if it is not one.
#[no_mangle]
pub unsafe extern "C" fn nickel_number_as_i64(num: *const nickel_number) -> i64 {
    num.as_ref()
        .filter(|n| is_integer(&n.0))
        .and_then(|n| n.0.to_integer().to_i64())
        .unwrap_or(0)
}

/// The number rounded to the nearest double.
#[no_mangle]
pub unsafe extern "C" fn nickel_number_as_f64(num: *const nickel_number) -> f64 {
    num.as_ref()
        .and_then(|n| n.0.to_f64())
        .unwrap_or(f64::NAN)
}

/// The exact numerator and denominator as decimal strings.
#[no_mangle]
pub unsafe extern "C" fn nickel_number_as_rational(
    num: *const nickel_number,
    out_numerator: *mut nickel_string,
    out_denominator: *mut nickel_string,
) {
    let Some(num) = num.as_ref() else {
        return;
    };
    if let Some(out) = out_numerator.as_mut() {
        out.data = num.0.numer().to_string();
    }
    if let Some(out) = out_denominator.as_mut() {
        out.data = num.0.denom().to_string();
    }
}

/// Number of array elements.
#[no_mangle]
pub unsafe extern "C" fn nickel_array_len(arr: *const nickel_array) -> usize {
    arr.as_ref().map_or(0, |arr| arr.0.len())
}

/// Write the element at `idx` to `out_expr`, or empty it if out of bounds.
#[no_mangle]
pub unsafe extern "C" fn nickel_array_get(
    arr: *const nickel_array,
    idx: usize,
    out_expr: *mut nickel_expr,
) {
    let slot = arr
        .as_ref()
        .and_then(|arr| arr.0.get(idx))
        .map(Slot::of);
    store_slot(out_expr, slot);
}

/// Number of record fields.
#[no_mangle]
pub unsafe extern "C" fn nickel_record_len(rec: *const nickel_record) -> usize {
    rec.as_ref().map_or(0, |rec| rec.0.fields.len())
}

/// The key at `idx`, and its value in `out_expr` if it has one (returns 1).
#[no_mangle]
pub unsafe extern "C" fn nickel_record_key_value_by_index(
    rec: *const nickel_record,
    idx: usize,
    out_key: *mut *const c_char,
    out_key_len: *mut usize,
    out_expr: *mut nickel_expr,
) -> c_int {
    let Some((key, field)) = rec.as_ref().and_then(|rec| rec.0.fields.get_index(idx)) else {
        if !out_key_len.is_null() {
            *out_key_len = 0;
        }
        write_str("", out_key);
        return 0;
    };
    let len = write_str(key, out_key);
    if !out_key_len.is_null() {
        *out_key_len = len;
    }
    match &field.value {
        Some(thunk) => {
            store_slot(out_expr, Some(Slot::of(thunk)));
            1
        }
        None => 0,
    }
}

/// Look up the value of a field (returns 1 if it has one).
#[no_mangle]
pub unsafe extern "C" fn nickel_record_value_by_name(
    rec: *const nickel_record,
    key: *const c_char,
    out_expr: *mut nickel_expr,
) -> c_int {
    if key.is_null() {
        return 0;
    }
    let key = CStr::from_ptr(key).to_string_lossy();
    let thunk = rec
        .as_ref()
        .and_then(|rec| rec.0.fields.get(key.as_ref()))
        .and_then(|field| field.value.as_ref());
    match thunk {
        Some(thunk) => {
            store_slot(out_expr, Some(Slot::of(thunk)));
            1
        }
        None => 0,
    }
}

/// Allocate an empty string slot.
#[no_mangle]
pub extern "C" fn nickel_string_alloc() -> *mut nickel_string {
    alloc(nickel_string {
        data: String::new(),
    })
}

/// Free a string slot.
#[no_mangle]
pub unsafe extern "C" fn nickel_string_free(s: *mut nickel_string) {
    free(s);
}

/// The string contents, valid until `s` is overwritten or freed.
#[no_mangle]
pub unsafe extern "C" fn nickel_string_data(
    s: *const nickel_string,
    data: *mut *const c_char,
    len: *mut usize,
) {
    let text = s.as_ref().map_or("", |s| s.data.as_str());
    let n = write_str(text, data);
    if !len.is_null() {
        *len = n;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Virtual machines
// ═══════════════════════════════════════════════════════════════════════

/// Allocate an empty virtual machine slot.
#[no_mangle]
pub extern "C" fn nickel_virtual_machine_alloc() -> *mut nickel_virtual_machine {
    alloc(nickel_virtual_machine { session: None })
}

/// Free a virtual machine slot.
#[no_mangle]
pub unsafe extern "C" fn nickel_virtual_machine_free(vm: *mut nickel_virtual_machine) {
    free(vm);
}

/// Resume evaluation of a descendant of this session's result.
#[no_mangle]
pub unsafe extern "C" fn nickel_virtual_machine_eval_shallow(
    vm: *mut nickel_virtual_machine,
    expr: *const nickel_expr,
    out_expr: *mut nickel_expr,
    out_error: *mut nickel_error,
) -> nickel_result {
    let result = guarded(Err(panicked()), || {
        let session = vm
            .as_ref()
            .and_then(|vm| vm.session.clone())
            .ok_or_else(|| EvalError::Interface("virtual machine has no session".to_string()))?;
        let slot = expr.as_ref().and_then(|expr| expr.slot.clone());
        resume(&session, slot)
    });
    finish(result, out_expr, out_error)
}

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

/// Allocate an empty error slot.
#[no_mangle]
pub extern "C" fn nickel_error_alloc() -> *mut nickel_error {
    alloc(nickel_error { error: None })
}

/// Free an error slot.
#[no_mangle]
pub unsafe extern "C" fn nickel_error_free(err: *mut nickel_error) {
    free(err);
}

/// Render an error through a write callback.
#[no_mangle]
pub unsafe extern "C" fn nickel_error_display(
    err: *const nickel_error,
    write: nickel_write_callback,
    write_payload: *mut c_void,
    format: nickel_error_format,
) -> nickel_result {
    let (Some(write), Some(text)) = (write, render_error(err, format)) else {
        return NICKEL_RESULT_ERR;
    };
    if write_all(write, write_payload, text.as_bytes()) {
        NICKEL_RESULT_OK
    } else {
        NICKEL_RESULT_ERR
    }
}

/// Render an error into a string slot.
#[no_mangle]
pub unsafe extern "C" fn nickel_error_format_as_string(
    err: *const nickel_error,
    out_string: *mut nickel_string,
    format: nickel_error_format,
) -> nickel_result {
    match (render_error(err, format), out_string.as_mut()) {
        (Some(text), Some(out)) => {
            out.data = text;
            NICKEL_RESULT_OK
        }
        _ => NICKEL_RESULT_ERR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::ffi::CString;
    use std::slice;

    unsafe fn text(data: *const c_char, len: usize) -> String {
        String::from_utf8(slice::from_raw_parts(data.cast::<u8>(), len).to_vec()).unwrap()
    }

    unsafe fn record_keys(expr: *const nickel_expr) -> Vec<(String, bool)> {
        let rec = nickel_expr_as_record(expr);
        let out = nickel_expr_alloc();
        let mut keys = Vec::new();
        for i in 0..nickel_record_len(rec) {
            let mut key = ptr::null();
            let mut len = 0;
            let has_value = nickel_record_key_value_by_index(rec, i, &mut key, &mut len, out);
            keys.push((text(key, len), has_value == 1));
        }
        nickel_expr_free(out);
        keys
    }

    #[test]
    fn test_shallow_session_resumes_children() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();
            let vm = nickel_virtual_machine_alloc();
            let src = CString::new("{ foo = [1, 2 + 3], bar = \"hi\" }").unwrap();

            let status =
                nickel_context_eval_shallow(ctx, src.as_ptr(), expr, vm, ptr::null_mut());
            assert_eq!(status, NICKEL_RESULT_OK);
            assert_eq!(
                record_keys(expr),
                vec![("foo".to_string(), true), ("bar".to_string(), true)]
            );

            let foo = nickel_expr_alloc();
            let key = CString::new("foo").unwrap();
            assert_eq!(
                nickel_record_value_by_name(nickel_expr_as_record(expr), key.as_ptr(), foo),
                1
            );
            assert_eq!(nickel_expr_is_value(foo), 0);

            let resolved = nickel_expr_alloc();
            assert_eq!(
                nickel_virtual_machine_eval_shallow(vm, foo, resolved, ptr::null_mut()),
                NICKEL_RESULT_OK
            );
            assert_eq!(nickel_array_len(nickel_expr_as_array(resolved)), 2);

            for p in [foo, resolved, expr] {
                nickel_expr_free(p);
            }
            nickel_virtual_machine_free(vm);
            nickel_context_free(ctx);
        }
    }

    #[test]
    fn test_field_without_value_reports_zero() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();
            let src = CString::new("{ a | Number, b = 1 }").unwrap();
            nickel_context_eval_shallow(ctx, src.as_ptr(), expr, ptr::null_mut(), ptr::null_mut());
            assert_eq!(
                record_keys(expr),
                vec![("a".to_string(), false), ("b".to_string(), true)]
            );
            nickel_expr_free(expr);
            nickel_context_free(ctx);
        }
    }

    #[test]
    fn test_numbers() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();
            let src = CString::new("7 / 2").unwrap();
            nickel_context_eval_deep(ctx, src.as_ptr(), expr, ptr::null_mut());
            let num = nickel_expr_as_number(expr);
            assert_eq!(nickel_number_is_i64(num), 0);
            assert_eq!(nickel_number_as_f64(num), 3.5);

            let (numer, denom) = (nickel_string_alloc(), nickel_string_alloc());
            nickel_number_as_rational(num, numer, denom);
            assert_eq!((*numer).data, "7");
            assert_eq!((*denom).data, "2");

            nickel_string_free(numer);
            nickel_string_free(denom);
            nickel_expr_free(expr);
            nickel_context_free(ctx);
        }
    }

    #[test]
    fn test_enum_tags_are_interned() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();
            let src = CString::new("'Foo").unwrap();
            nickel_context_eval_deep(ctx, src.as_ptr(), expr, ptr::null_mut());
            let mut tag = ptr::null();
            let len = nickel_expr_as_enum_tag(expr, &mut tag);
            nickel_expr_free(expr);
            // Still readable after the expression is gone.
            assert_eq!(text(tag, len), "Foo");
            nickel_context_free(ctx);
        }
    }

    unsafe extern "C" fn collect(context: *mut c_void, buf: *const u8, len: usize) -> usize {
        let out = &mut *context.cast::<Vec<u8>>();
        out.extend_from_slice(slice::from_raw_parts(buf, len));
        len
    }

    #[test]
    fn test_trace_callback_receives_messages() {
        unsafe {
            let ctx = nickel_context_alloc();
            let mut sink: Vec<u8> = Vec::new();
            nickel_context_set_trace_callback(
                ctx,
                Some(collect),
                None,
                (&mut sink as *mut Vec<u8>).cast(),
            );
            let src = CString::new("std.trace \"hi\" 1").unwrap();
            let status =
                nickel_context_eval_deep(ctx, src.as_ptr(), ptr::null_mut(), ptr::null_mut());
            assert_eq!(status, NICKEL_RESULT_OK);
            nickel_context_free(ctx);
            assert_eq!(String::from_utf8(sink).unwrap(), "std.trace: hi\n");
        }
    }

    #[test]
    fn test_resumption_uses_latest_trace_callback() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();
            let vm = nickel_virtual_machine_alloc();
            let src = CString::new("{ a = std.trace \"late\" 1 }").unwrap();
            assert_eq!(
                nickel_context_eval_shallow(ctx, src.as_ptr(), expr, vm, ptr::null_mut()),
                NICKEL_RESULT_OK
            );

            let mut sink: Vec<u8> = Vec::new();
            nickel_context_set_trace_callback(
                ctx,
                Some(collect),
                None,
                (&mut sink as *mut Vec<u8>).cast(),
            );

            let a = nickel_expr_alloc();
            let key = CString::new("a").unwrap();
            nickel_record_value_by_name(nickel_expr_as_record(expr), key.as_ptr(), a);
            let resolved = nickel_expr_alloc();
            assert_eq!(
                nickel_virtual_machine_eval_shallow(vm, a, resolved, ptr::null_mut()),
                NICKEL_RESULT_OK
            );

            for p in [a, resolved, expr] {
                nickel_expr_free(p);
            }
            nickel_virtual_machine_free(vm);
            nickel_context_free(ctx);
            assert_eq!(String::from_utf8(sink).unwrap(), "std.trace: late\n");
        }
    }

    #[test]
    fn test_error_display_streams_text() {
        unsafe {
            let ctx = nickel_context_alloc();
            let err = nickel_error_alloc();
            let src = CString::new("{ a = 1 }.b").unwrap();
            nickel_context_eval_deep(ctx, src.as_ptr(), ptr::null_mut(), err);

            let mut out: Vec<u8> = Vec::new();
            let status =
                nickel_error_display(err, Some(collect), (&mut out as *mut Vec<u8>).cast(), 0);
            assert_eq!(status, NICKEL_RESULT_OK);
            assert!(String::from_utf8(out)
                .unwrap()
                .starts_with("error: missing field `b`"));

            let rendered = nickel_string_alloc();
            assert_eq!(
                nickel_error_format_as_string(err, rendered, 9),
                NICKEL_RESULT_ERR
            );
            nickel_string_free(rendered);
            nickel_error_free(err);
            nickel_context_free(ctx);
        }
    }

    #[test]
    fn test_serialization_rejects_unevaluated_slot() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();
            let child = nickel_expr_alloc();
            let err = nickel_error_alloc();
            let out = nickel_string_alloc();
            let src = CString::new("[1 + 1]").unwrap();
            nickel_context_eval_shallow(ctx, src.as_ptr(), expr, ptr::null_mut(), ptr::null_mut());
            nickel_array_get(nickel_expr_as_array(expr), 0, child);

            assert_eq!(
                nickel_context_expr_to_json(ctx, child, out, err),
                NICKEL_RESULT_ERR
            );
            for p in [expr, child] {
                nickel_expr_free(p);
            }
            nickel_string_free(out);
            nickel_error_free(err);
            nickel_context_free(ctx);
        }
    }
}
