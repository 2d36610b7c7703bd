//! # nickel-lang-sys
//!
//! Raw declarations of the `nickel_lang` C ABI.
//!
//! Every type here is opaque and every function is `unsafe` to call. The
//! contracts are those of `nickel_lang.h`:
//!
//! - Fallible entry points return [`nickel_result`] and write their outputs
//!   into caller-allocated slots (`nickel_expr`, `nickel_error`,
//!   `nickel_string`, `nickel_virtual_machine`).
//! - Each slot type has a paired `*_alloc` / `*_free`. Writing into a slot
//!   overwrites its contents without changing that pairing.
//! - `nickel_record`, `nickel_array` and `nickel_number` pointers borrow from
//!   the expression they were obtained from, and are invalidated when that
//!   expression is overwritten or freed.
//!
//! Use `nickel-embed` for a safe API.

#![allow(non_camel_case_types)]
#![warn(missing_docs)]

use std::marker::{PhantomData, PhantomPinned};
use std::os::raw::{c_char, c_int, c_uint, c_void};

#[cfg(feature = "bundled")]
extern crate nickel_lite as _;

macro_rules! opaque {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            pub struct $name {
                _data: [u8; 0],
                _marker: PhantomData<(*mut u8, PhantomPinned)>,
            }
        )*
    };
}

opaque! {
    /// The main entry point: interpreter-wide settings.
    nickel_context;
    /// A possibly unevaluated Nickel expression.
    nickel_expr;
    /// A Nickel error.
    nickel_error;
    /// A record borrowed from a `nickel_expr`.
    nickel_record;
    /// An array borrowed from a `nickel_expr`.
    nickel_array;
    /// An exact rational number borrowed from a `nickel_expr`.
    nickel_number;
    /// An engine-owned UTF-8 string.
    nickel_string;
    /// The evaluation session returned by a shallow evaluation.
    nickel_virtual_machine;
}

/// Return value of fallible functions.
pub type nickel_result = c_uint;
/// A successful result.
pub const NICKEL_RESULT_OK: nickel_result = 0;
/// A bad result.
pub const NICKEL_RESULT_ERR: nickel_result = 1;

/// Rendering selector for [`nickel_error_display`] and [`nickel_error_format_as_string`].
pub type nickel_error_format = c_uint;
/// Human-readable text.
pub const NICKEL_ERROR_FORMAT_TEXT: nickel_error_format = 0;
/// Human-readable text with ANSI color codes.
pub const NICKEL_ERROR_FORMAT_ANSI_TEXT: nickel_error_format = 1;
/// JSON.
pub const NICKEL_ERROR_FORMAT_JSON: nickel_error_format = 2;
/// YAML.
pub const NICKEL_ERROR_FORMAT_YAML: nickel_error_format = 3;
/// TOML.
pub const NICKEL_ERROR_FORMAT_TOML: nickel_error_format = 4;

/// Write callback: consumes up to `len` bytes of `buf` and returns how many it took.
pub type nickel_write_callback =
    Option<unsafe extern "C" fn(context: *mut c_void, buf: *const u8, len: usize) -> usize>;

/// Flush callback for data previously handed to a write callback.
pub type nickel_flush_callback = Option<unsafe extern "C" fn(context: *const c_void)>;

extern "C" {
    // ═══════════════════════════════════════════════════════════════════
    // Context
    // ═══════════════════════════════════════════════════════════════════

    /// Allocate a context; free with [`nickel_context_free`].
    pub fn nickel_context_alloc() -> *mut nickel_context;
    /// Free a context.
    pub fn nickel_context_free(ctx: *mut nickel_context);
    /// Install the callback invoked by `std.trace`. A null `write` removes it.
    pub fn nickel_context_set_trace_callback(
        ctx: *mut nickel_context,
        write: nickel_write_callback,
        flush: nickel_flush_callback,
        user_data: *mut c_void,
    );
    /// Name the main input program in diagnostics. `name` is borrowed.
    pub fn nickel_context_set_source_name(ctx: *mut nickel_context, name: *const c_char);
    /// Evaluate a null-terminated program deeply.
    pub fn nickel_context_eval_deep(
        ctx: *mut nickel_context,
        src: *const c_char,
        out_expr: *mut nickel_expr,
        out_error: *mut nickel_error,
    ) -> nickel_result;
    /// Evaluate deeply, skipping fields marked `not_exported`.
    pub fn nickel_context_eval_deep_for_export(
        ctx: *mut nickel_context,
        src: *const c_char,
        out_expr: *mut nickel_expr,
        out_error: *mut nickel_error,
    ) -> nickel_result;
    /// Evaluate to weak head normal form, returning the session in `out_vm`.
    pub fn nickel_context_eval_shallow(
        ctx: *mut nickel_context,
        src: *const c_char,
        out_expr: *mut nickel_expr,
        out_vm: *mut nickel_virtual_machine,
        out_error: *mut nickel_error,
    ) -> nickel_result;
    /// Evaluate an expression to weak head normal form.
    pub fn nickel_context_eval_expr_shallow(
        ctx: *mut nickel_context,
        expr: *const nickel_expr,
        out_expr: *mut nickel_expr,
        out_error: *mut nickel_error,
    ) -> nickel_result;
    /// Serialize a fully evaluated expression as JSON.
    pub fn nickel_context_expr_to_json(
        ctx: *mut nickel_context,
        expr: *const nickel_expr,
        out_string: *mut nickel_string,
        out_err: *mut nickel_error,
    ) -> nickel_result;
    /// Serialize a fully evaluated expression as YAML.
    pub fn nickel_context_expr_to_yaml(
        ctx: *mut nickel_context,
        expr: *const nickel_expr,
        out_string: *mut nickel_string,
        out_err: *mut nickel_error,
    ) -> nickel_result;
    /// Serialize a fully evaluated expression as TOML.
    pub fn nickel_context_expr_to_toml(
        ctx: *mut nickel_context,
        expr: *const nickel_expr,
        out_string: *mut nickel_string,
        out_err: *mut nickel_error,
    ) -> nickel_result;

    // ═══════════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════════

    /// Allocate an empty expression slot.
    pub fn nickel_expr_alloc() -> *mut nickel_expr;
    /// Free an expression slot.
    pub fn nickel_expr_free(expr: *mut nickel_expr);
    /// Is this expression a boolean?
    pub fn nickel_expr_is_bool(expr: *const nickel_expr) -> c_int;
    /// Is this expression a number?
    pub fn nickel_expr_is_number(expr: *const nickel_expr) -> c_int;
    /// Is this expression a string?
    pub fn nickel_expr_is_str(expr: *const nickel_expr) -> c_int;
    /// Is this expression an enum tag?
    pub fn nickel_expr_is_enum_tag(expr: *const nickel_expr) -> c_int;
    /// Is this expression an enum variant?
    pub fn nickel_expr_is_enum_variant(expr: *const nickel_expr) -> c_int;
    /// Is this expression a record?
    pub fn nickel_expr_is_record(expr: *const nickel_expr) -> c_int;
    /// Is this expression an array?
    pub fn nickel_expr_is_array(expr: *const nickel_expr) -> c_int;
    /// Has this expression been evaluated to weak head normal form?
    pub fn nickel_expr_is_value(expr: *const nickel_expr) -> c_int;
    /// Is this expression null?
    pub fn nickel_expr_is_null(expr: *const nickel_expr) -> c_int;
    /// The boolean value. Panics if not a boolean.
    pub fn nickel_expr_as_bool(expr: *const nickel_expr) -> c_int;
    /// The string contents (not null-terminated), owned by `expr`.
    pub fn nickel_expr_as_str(expr: *const nickel_expr, out_str: *mut *const c_char) -> usize;
    /// The number, borrowed from `expr`.
    pub fn nickel_expr_as_number(expr: *const nickel_expr) -> *const nickel_number;
    /// The enum tag (interned, never invalidated).
    pub fn nickel_expr_as_enum_tag(expr: *const nickel_expr, out_str: *mut *const c_char)
        -> usize;
    /// The enum variant's tag, with its payload written to `out_expr`.
    pub fn nickel_expr_as_enum_variant(
        expr: *const nickel_expr,
        out_str: *mut *const c_char,
        out_expr: *mut nickel_expr,
    ) -> usize;
    /// The record, borrowed from `expr`.
    pub fn nickel_expr_as_record(expr: *const nickel_expr) -> *const nickel_record;
    /// The array, borrowed from `expr`.
    pub fn nickel_expr_as_array(expr: *const nickel_expr) -> *const nickel_array;

    // ═══════════════════════════════════════════════════════════════════
    // Numbers, arrays, records, strings
    // ═══════════════════════════════════════════════════════════════════

    /// Is this number an integer within `int64_t` range?
    pub fn nickel_number_is_i64(num: *const nickel_number) -> c_int;
    /// The number as `int64_t`. Panics unless [`nickel_number_is_i64`].
    pub fn nickel_number_as_i64(num: *const nickel_number) -> i64;
    /// The number rounded to the nearest double.
    pub fn nickel_number_as_f64(num: *const nickel_number) -> f64;
    /// The exact numerator and denominator as decimal strings.
    pub fn nickel_number_as_rational(
        num: *const nickel_number,
        out_numerator: *mut nickel_string,
        out_denominator: *mut nickel_string,
    );
    /// Number of array elements.
    pub fn nickel_array_len(arr: *const nickel_array) -> usize;
    /// Write the element at `idx` to `out_expr`. Panics if out of bounds.
    pub fn nickel_array_get(arr: *const nickel_array, idx: usize, out_expr: *mut nickel_expr);
    /// Number of record fields.
    pub fn nickel_record_len(rec: *const nickel_record) -> usize;
    /// The key at `idx`, and its value in `out_expr` if it has one (returns 1).
    pub fn nickel_record_key_value_by_index(
        rec: *const nickel_record,
        idx: usize,
        out_key: *mut *const c_char,
        out_key_len: *mut usize,
        out_expr: *mut nickel_expr,
    ) -> c_int;
    /// Look up the value of a null-terminated key (returns 1 if it has one).
    pub fn nickel_record_value_by_name(
        rec: *const nickel_record,
        key: *const c_char,
        out_expr: *mut nickel_expr,
    ) -> c_int;
    /// Allocate an empty string slot.
    pub fn nickel_string_alloc() -> *mut nickel_string;
    /// Free a string slot.
    pub fn nickel_string_free(s: *mut nickel_string);
    /// The string contents (not null-terminated), valid until `s` is overwritten or freed.
    pub fn nickel_string_data(s: *const nickel_string, data: *mut *const c_char, len: *mut usize);

    // ═══════════════════════════════════════════════════════════════════
    // Virtual machines
    // ═══════════════════════════════════════════════════════════════════

    /// Allocate an empty virtual machine slot.
    pub fn nickel_virtual_machine_alloc() -> *mut nickel_virtual_machine;
    /// Free a virtual machine slot.
    pub fn nickel_virtual_machine_free(vm: *mut nickel_virtual_machine);
    /// Resume evaluation of a descendant of this session's result.
    pub fn nickel_virtual_machine_eval_shallow(
        vm: *mut nickel_virtual_machine,
        expr: *const nickel_expr,
        out_expr: *mut nickel_expr,
        out_error: *mut nickel_error,
    ) -> nickel_result;

    // ═══════════════════════════════════════════════════════════════════
    // Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Allocate an empty error slot.
    pub fn nickel_error_alloc() -> *mut nickel_error;
    /// Free an error slot.
    pub fn nickel_error_free(err: *mut nickel_error);
    /// Render an error through a write callback.
    pub fn nickel_error_display(
        err: *const nickel_error,
        write: nickel_write_callback,
        write_payload: *mut c_void,
        format: nickel_error_format,
    ) -> nickel_result;
    /// Render an error into a string slot.
    pub fn nickel_error_format_as_string(
        err: *const nickel_error,
        out_string: *mut nickel_string,
        format: nickel_error_format,
    ) -> nickel_result;
}

#[cfg(all(test, feature = "bundled"))]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    #[test]
    fn test_slot_pairing_survives_overwrite() {
        unsafe {
            let ctx = nickel_context_alloc();
            let expr = nickel_expr_alloc();

            let src = CString::new("{ foo = 1 }").unwrap();
            assert_eq!(
                nickel_context_eval_deep(ctx, src.as_ptr(), expr, ptr::null_mut()),
                NICKEL_RESULT_OK
            );
            assert_eq!(nickel_expr_is_record(expr), 1);

            let src = CString::new("[1, 2, 3]").unwrap();
            assert_eq!(
                nickel_context_eval_deep(ctx, src.as_ptr(), expr, ptr::null_mut()),
                NICKEL_RESULT_OK
            );
            assert_eq!(nickel_expr_is_array(expr), 1);
            assert_eq!(nickel_array_len(nickel_expr_as_array(expr)), 3);

            nickel_expr_free(expr);
            nickel_context_free(ctx);
        }
    }

    #[test]
    fn test_failed_eval_fills_error_slot() {
        unsafe {
            let ctx = nickel_context_alloc();
            let err = nickel_error_alloc();
            let out = nickel_string_alloc();

            let src = CString::new("1 +").unwrap();
            assert_eq!(
                nickel_context_eval_deep(ctx, src.as_ptr(), ptr::null_mut(), err),
                NICKEL_RESULT_ERR
            );
            assert_eq!(
                nickel_error_format_as_string(err, out, NICKEL_ERROR_FORMAT_TEXT),
                NICKEL_RESULT_OK
            );
            let mut data = ptr::null();
            let mut len = 0;
            nickel_string_data(out, &mut data, &mut len);
            assert!(len > 0);

            nickel_string_free(out);
            nickel_error_free(err);
            nickel_context_free(ctx);
        }
    }
}
