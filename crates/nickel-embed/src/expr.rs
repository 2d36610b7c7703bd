//! Evaluated expressions
//!
//! An [`Expr`] owns one engine expression slot and keeps its context alive.
//! Accessors copy data out: strings and keys become `String`s, numbers
//! become [`Number`]s, and record fields and array elements become new
//! `Expr`s, each with its own slot.
//!
//! After a shallow evaluation the children of a value may still be
//! unevaluated. Such children report [`ExprKind::Unevaluated`] and are
//! forced with [`Expr::eval_shallow`].

use std::ffi::{c_char, c_int, CString};
use std::fmt;
use std::ptr;
use std::sync::Arc;

use indexmap::IndexMap;
use nickel_lang_sys as sys;
use serde::de::DeserializeOwned;

use crate::context::ContextInner;
use crate::error::{ConversionError, Diagnostic, Error, EvaluationError};
use crate::handle::{copy_str, Borrowed, ErrorRes, ExprRes, Owned, StringRes};
use crate::number::Number;

/// The shape of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// `null`
    Null,
    /// `true` or `false`
    Bool,
    /// An exact rational number
    Number,
    /// A string
    String,
    /// A bare enum tag such as `'Foo`
    EnumTag,
    /// An enum tag with a payload such as `'Some 1`
    EnumVariant,
    /// A record
    Record,
    /// An array
    Array,
    /// Not yet evaluated
    Unevaluated,
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExprKind::Null => "null",
            ExprKind::Bool => "bool",
            ExprKind::Number => "number",
            ExprKind::String => "string",
            ExprKind::EnumTag => "enum tag",
            ExprKind::EnumVariant => "enum variant",
            ExprKind::Record => "record",
            ExprKind::Array => "array",
            ExprKind::Unevaluated => "unevaluated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Json,
    Yaml,
    Toml,
}

/// An expression produced by a [`Context`](crate::Context).
///
/// `Expr` is neither `Send` nor `Sync`: it must be used on the thread that
/// produced it. Convert it to text or a Rust value to move data elsewhere.
pub struct Expr {
    slot: Owned<ExprRes>,
    ctx: Arc<ContextInner>,
}

impl Expr {
    pub(crate) fn empty(ctx: &Arc<ContextInner>) -> Self {
        Self {
            slot: Owned::new(),
            ctx: Arc::clone(ctx),
        }
    }

    pub(crate) fn attach(&mut self, ctx: &Arc<ContextInner>) {
        if !Arc::ptr_eq(&self.ctx, ctx) {
            self.ctx = Arc::clone(ctx);
        }
    }

    pub(crate) fn raw(&self) -> *const sys::nickel_expr {
        self.slot.as_const()
    }

    pub(crate) fn raw_mut(&self) -> *mut sys::nickel_expr {
        self.slot.as_ptr()
    }

    pub(crate) fn context(&self) -> &Arc<ContextInner> {
        &self.ctx
    }

    fn check(&self, predicate: unsafe extern "C" fn(*const sys::nickel_expr) -> c_int) -> bool {
        // SAFETY: the slot is live; predicates only read it.
        unsafe { predicate(self.raw()) != 0 }
    }

    /// The shape of this expression.
    pub fn kind(&self) -> ExprKind {
        if !self.is_value() {
            return ExprKind::Unevaluated;
        }
        let kinds: [(unsafe extern "C" fn(*const sys::nickel_expr) -> c_int, ExprKind); 8] = [
            (sys::nickel_expr_is_null, ExprKind::Null),
            (sys::nickel_expr_is_bool, ExprKind::Bool),
            (sys::nickel_expr_is_number, ExprKind::Number),
            (sys::nickel_expr_is_str, ExprKind::String),
            (sys::nickel_expr_is_enum_tag, ExprKind::EnumTag),
            (sys::nickel_expr_is_enum_variant, ExprKind::EnumVariant),
            (sys::nickel_expr_is_record, ExprKind::Record),
            (sys::nickel_expr_is_array, ExprKind::Array),
        ];
        kinds
            .into_iter()
            .find(|(predicate, _)| self.check(*predicate))
            .map_or(ExprKind::Unevaluated, |(_, kind)| kind)
    }

    /// Is this expression evaluated to a constructor?
    pub fn is_value(&self) -> bool {
        self.check(sys::nickel_expr_is_value)
    }

    /// Is this `null`?
    pub fn is_null(&self) -> bool {
        self.check(sys::nickel_expr_is_null)
    }

    /// Is this a boolean?
    pub fn is_bool(&self) -> bool {
        self.check(sys::nickel_expr_is_bool)
    }

    /// Is this a number?
    pub fn is_number(&self) -> bool {
        self.check(sys::nickel_expr_is_number)
    }

    /// Is this a string?
    pub fn is_str(&self) -> bool {
        self.check(sys::nickel_expr_is_str)
    }

    /// Is this a bare enum tag?
    pub fn is_enum_tag(&self) -> bool {
        self.check(sys::nickel_expr_is_enum_tag)
    }

    /// Is this an enum variant with a payload?
    pub fn is_enum_variant(&self) -> bool {
        self.check(sys::nickel_expr_is_enum_variant)
    }

    /// Is this a record?
    pub fn is_record(&self) -> bool {
        self.check(sys::nickel_expr_is_record)
    }

    /// Is this an array?
    pub fn is_array(&self) -> bool {
        self.check(sys::nickel_expr_is_array)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Projections
    // ═══════════════════════════════════════════════════════════════════

    /// The boolean, if this is one.
    pub fn to_bool(&self) -> Option<bool> {
        // SAFETY: the slot is live and holds a boolean.
        self.is_bool()
            .then(|| unsafe { sys::nickel_expr_as_bool(self.raw()) != 0 })
    }

    /// The number, if this is one.
    pub fn to_number(&self) -> Option<Number> {
        let num = self.number_view()?;
        // SAFETY: `num` is borrowed from this live slot.
        unsafe { Number::from_raw(num.as_ptr()) }
    }

    /// The number as `i64`, if it is an integer that fits.
    pub fn to_i64(&self) -> Option<i64> {
        let num = self.number_view()?;
        // SAFETY: `num` is borrowed from this live slot.
        unsafe {
            (sys::nickel_number_is_i64(num.as_ptr()) != 0)
                .then(|| sys::nickel_number_as_i64(num.as_ptr()))
        }
    }

    /// The number rounded to the nearest `f64`.
    pub fn to_f64(&self) -> Option<f64> {
        let num = self.number_view()?;
        // SAFETY: `num` is borrowed from this live slot.
        Some(unsafe { sys::nickel_number_as_f64(num.as_ptr()) })
    }

    fn number_view(&self) -> Option<Borrowed<'_, sys::nickel_number>> {
        // SAFETY: the number lives as long as the slot, which `&self` pins.
        unsafe { Borrowed::new(sys::nickel_expr_as_number(self.raw())) }
    }

    /// The string, if this is one.
    pub fn to_str(&self) -> Option<String> {
        if !self.is_str() {
            return None;
        }
        let mut data: *const c_char = ptr::null();
        // SAFETY: the data stays valid until the slot changes and is copied
        // immediately.
        unsafe {
            let len = sys::nickel_expr_as_str(self.raw(), &mut data);
            Some(copy_str(data, len))
        }
    }

    /// The tag name, if this is a bare enum tag.
    pub fn to_enum_tag(&self) -> Option<String> {
        if !self.is_enum_tag() {
            return None;
        }
        let mut data: *const c_char = ptr::null();
        // SAFETY: tag names are interned by the engine and never freed.
        unsafe {
            let len = sys::nickel_expr_as_enum_tag(self.raw(), &mut data);
            Some(copy_str(data, len))
        }
    }

    /// The tag name and payload, if this is an enum variant.
    pub fn to_enum_variant(&self) -> Option<(String, Expr)> {
        if !self.is_enum_variant() {
            return None;
        }
        let payload = Expr::empty(&self.ctx);
        let mut data: *const c_char = ptr::null();
        // SAFETY: both slots are live; the tag is interned.
        let tag = unsafe {
            let len = sys::nickel_expr_as_enum_variant(self.raw(), &mut data, payload.raw_mut());
            copy_str(data, len)
        };
        Some((tag, payload))
    }

    /// The fields of a record in definition order.
    ///
    /// A field declared without a value maps to `None`.
    pub fn to_record(&self) -> Option<IndexMap<String, Option<Expr>>> {
        // SAFETY: the record lives as long as the slot, which `&self` pins.
        let record = unsafe { Borrowed::new(sys::nickel_expr_as_record(self.raw())) }?;
        // SAFETY: `record` is live for this whole block.
        let len = unsafe { sys::nickel_record_len(record.as_ptr()) };

        let mut fields = IndexMap::with_capacity(len);
        for idx in 0..len {
            let value = Expr::empty(&self.ctx);
            let mut key: *const c_char = ptr::null();
            let mut key_len = 0;
            // SAFETY: `idx` is in bounds and `value` is a live slot; the key
            // is copied before the next call.
            let (key, has_value) = unsafe {
                let has_value = sys::nickel_record_key_value_by_index(
                    record.as_ptr(),
                    idx,
                    &mut key,
                    &mut key_len,
                    value.raw_mut(),
                ) != 0;
                (copy_str(key, key_len), has_value)
            };
            fields.insert(key, has_value.then_some(value));
        }
        Some(fields)
    }

    /// The value of one record field.
    ///
    /// `None` if this is not a record, the field is absent, or it has no
    /// value.
    pub fn field(&self, name: &str) -> Option<Expr> {
        // SAFETY: as in `to_record`.
        let record = unsafe { Borrowed::new(sys::nickel_expr_as_record(self.raw())) }?;
        let name = CString::new(name).ok()?;
        let value = Expr::empty(&self.ctx);
        // SAFETY: `record` and `value` are live; the name is copied.
        let found = unsafe {
            sys::nickel_record_value_by_name(record.as_ptr(), name.as_ptr(), value.raw_mut()) != 0
        };
        found.then_some(value)
    }

    /// The elements of an array.
    pub fn to_array(&self) -> Option<Vec<Expr>> {
        // SAFETY: the array lives as long as the slot, which `&self` pins.
        let array = unsafe { Borrowed::new(sys::nickel_expr_as_array(self.raw())) }?;
        // SAFETY: `array` is live for this whole block.
        let len = unsafe { sys::nickel_array_len(array.as_ptr()) };
        let elements = (0..len)
            .map(|idx| {
                let element = Expr::empty(&self.ctx);
                // SAFETY: `idx` is in bounds and `element` is a live slot.
                unsafe { sys::nickel_array_get(array.as_ptr(), idx, element.raw_mut()) };
                element
            })
            .collect();
        Some(elements)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Evaluation
    // ═══════════════════════════════════════════════════════════════════

    /// Evaluate this expression to its outermost constructor.
    ///
    /// Evaluated expressions are returned unchanged. Evaluation is memoized,
    /// so `std.trace` calls run at most once however often this is called.
    pub fn eval_shallow(&self) -> Result<Expr, EvaluationError> {
        let out = Expr::empty(&self.ctx);
        let err = Owned::<ErrorRes>::new();
        let raw = self.ctx.lock();
        // SAFETY: the context is locked and every slot is live.
        let status = unsafe {
            sys::nickel_context_eval_expr_shallow(
                raw.as_ptr(),
                self.raw(),
                out.raw_mut(),
                err.as_ptr(),
            )
        };
        drop(raw);
        if status == sys::NICKEL_RESULT_OK {
            Ok(out)
        } else {
            Err(EvaluationError(Diagnostic::native(err)))
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Serialization
    // ═══════════════════════════════════════════════════════════════════

    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConversionError> {
        self.serialize(Format::Json)
    }

    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String, ConversionError> {
        self.serialize(Format::Yaml)
    }

    /// Serialize as TOML. Only records can be TOML documents.
    pub fn to_toml(&self) -> Result<String, ConversionError> {
        self.serialize(Format::Toml)
    }

    /// Decode into a Rust value through its JSON form.
    ///
    /// # Example
    ///
    /// ```
    /// use nickel_embed::Context;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Server {
    ///     host: String,
    ///     port: u16,
    /// }
    ///
    /// let ctx = Context::new();
    /// let value = ctx.eval_deep(r#"{ host = "localhost", port = 8000 + 80 }"#).unwrap();
    /// let server: Server = value.decode().unwrap();
    /// assert_eq!(server.port, 8080);
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let json = self.to_json()?;
        Ok(serde_json::from_str(&json)?)
    }

    fn serialize(&self, format: Format) -> Result<String, ConversionError> {
        let out = Owned::<StringRes>::new();
        let err = Owned::<ErrorRes>::new();
        let raw = self.ctx.lock();
        // SAFETY: the context is locked and every slot is live.
        let status = unsafe {
            let convert = match format {
                Format::Json => sys::nickel_context_expr_to_json,
                Format::Yaml => sys::nickel_context_expr_to_yaml,
                Format::Toml => sys::nickel_context_expr_to_toml,
            };
            convert(raw.as_ptr(), self.raw(), out.as_ptr(), err.as_ptr())
        };
        drop(raw);
        if status == sys::NICKEL_RESULT_OK {
            Ok(out.to_string_lossy())
        } else {
            tracing::debug!(?format, "serialization failed");
            Err(ConversionError(Diagnostic::native(err)))
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match kind {
            ExprKind::Null => f.write_str("null"),
            ExprKind::Bool => write!(f, "{}", self.to_bool().unwrap_or_default()),
            ExprKind::Number => match self.to_number() {
                Some(num) => write!(f, "{}", num),
                None => f.write_str("<number>"),
            },
            ExprKind::String => write!(f, "{:?}", self.to_str().unwrap_or_default()),
            ExprKind::EnumTag => write!(f, "'{}", self.to_enum_tag().unwrap_or_default()),
            ExprKind::EnumVariant => match self.to_enum_variant() {
                Some((tag, payload)) => write!(f, "'{} {:?}", tag, payload),
                None => f.write_str("<variant>"),
            },
            ExprKind::Record => {
                let mut map = f.debug_map();
                for (key, value) in self.to_record().unwrap_or_default() {
                    match value {
                        Some(value) => map.entry(&key, &value),
                        None => map.entry(&key, &format_args!("<no value>")),
                    };
                }
                map.finish()
            }
            ExprKind::Array => f.debug_list().entries(self.to_array().unwrap_or_default()).finish(),
            ExprKind::Unevaluated => f.write_str("<unevaluated>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kinds() {
        let ctx = Context::new();
        let cases = [
            ("null", ExprKind::Null),
            ("true", ExprKind::Bool),
            ("1/3", ExprKind::Number),
            ("\"s\"", ExprKind::String),
            ("'Foo", ExprKind::EnumTag),
            ("'Some 1", ExprKind::EnumVariant),
            ("{}", ExprKind::Record),
            ("[]", ExprKind::Array),
        ];
        for (src, kind) in cases {
            assert_eq!(ctx.eval_deep(src).unwrap().kind(), kind, "{}", src);
        }
    }

    #[test]
    fn test_type_mismatch_projections_are_none() {
        let ctx = Context::new();
        let value = ctx.eval_deep("\"text\"").unwrap();
        assert_eq!(value.to_bool(), None);
        assert_eq!(value.to_i64(), None);
        assert_eq!(value.to_f64(), None);
        assert!(value.to_record().is_none());
        assert!(value.to_array().is_none());
        assert!(value.field("x").is_none());
        assert_eq!(value.to_enum_tag(), None);
        assert_eq!(value.to_str().as_deref(), Some("text"));
    }

    #[test]
    fn test_numbers() {
        let ctx = Context::new();
        let value = ctx.eval_deep("[7, 1/4, 2.5e0, 99999999999999999999]").unwrap();
        let elements = value.to_array().unwrap();
        assert_eq!(elements[0].to_i64(), Some(7));
        assert_eq!(elements[1].to_i64(), None);
        assert_eq!(elements[1].to_f64(), Some(0.25));
        assert_eq!(elements[2].to_f64(), Some(2.5));
        assert_eq!(elements[3].to_i64(), None);
        assert_eq!(
            elements[3].to_number().unwrap().to_string(),
            "99999999999999999999"
        );
    }

    #[test]
    fn test_record_keeps_definition_order() {
        let ctx = Context::new();
        let value = ctx.eval_deep("{ zeta = 1, alpha = 2, mid = 3 }").unwrap();
        let keys: Vec<String> = value.to_record().unwrap().into_keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_field_without_value() {
        let ctx = Context::new();
        let (value, _vm) = ctx.eval_shallow("{ a | Number, b = 2 }").unwrap();
        let record = value.to_record().unwrap();
        assert!(record["a"].is_none());
        assert!(record["b"].is_some());
        assert!(value.field("a").is_none());
        assert!(value.field("missing").is_none());
    }

    #[test]
    fn test_debug_rendering() {
        let ctx = Context::new();
        let value = ctx.eval_deep("{ a = [1, \"x\", 'T], b = null }").unwrap();
        assert_eq!(format!("{:?}", value), r#"{"a": [1, "x", 'T], "b": null}"#);
    }
}
