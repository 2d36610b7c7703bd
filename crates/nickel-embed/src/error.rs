//! Error types for embedding
//!
//! Failures come in two families, each wrapping a [`Diagnostic`]:
//!
//! - [`EvaluationError`]: parsing, evaluation, contract and type failures
//! - [`ConversionError`]: serialization failures
//!
//! A diagnostic owns the engine's error object and renders it on demand in
//! any [`ErrorFormat`]. Both families implement `std::error::Error`, are
//! `Send + Sync`, and display as the plain text rendering.

use std::ffi::c_void;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::slice;

use nickel_lang_sys as sys;
use serde::Serialize;
use thiserror::Error;

use crate::handle::{ErrorRes, Owned, StringRes};

/// Rendered when the engine cannot format an error.
pub const FORMATTING_FAILED: &str = "error formatting error";

/// Diagnostic rendering formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorFormat {
    /// Plain text
    #[default]
    Text,
    /// Text with ANSI colour codes
    AnsiText,
    /// JSON document
    Json,
    /// YAML document
    Yaml,
    /// TOML document
    Toml,
}

impl ErrorFormat {
    pub(crate) fn raw(self) -> sys::nickel_error_format {
        match self {
            ErrorFormat::Text => sys::NICKEL_ERROR_FORMAT_TEXT,
            ErrorFormat::AnsiText => sys::NICKEL_ERROR_FORMAT_ANSI_TEXT,
            ErrorFormat::Json => sys::NICKEL_ERROR_FORMAT_JSON,
            ErrorFormat::Yaml => sys::NICKEL_ERROR_FORMAT_YAML,
            ErrorFormat::Toml => sys::NICKEL_ERROR_FORMAT_TOML,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Diagnostic
// ═══════════════════════════════════════════════════════════════════════

/// A renderable error report.
pub struct Diagnostic {
    repr: Repr,
}

enum Repr {
    /// Produced by the engine
    Native(Owned<ErrorRes>),
    /// Detected before reaching the engine
    Local(String),
}

// SAFETY: an engine error object is immutable once written and the engine
// only reads it when formatting.
unsafe impl Send for Diagnostic {}
unsafe impl Sync for Diagnostic {}

#[derive(Serialize)]
struct LocalReport<'a> {
    severity: &'static str,
    message: &'a str,
    labels: &'a [String],
    notes: &'a [String],
}

impl Diagnostic {
    pub(crate) fn native(slot: Owned<ErrorRes>) -> Self {
        Self {
            repr: Repr::Native(slot),
        }
    }

    pub(crate) fn local(message: impl Into<String>) -> Self {
        Self {
            repr: Repr::Local(message.into()),
        }
    }

    /// Render the diagnostic.
    ///
    /// Returns [`FORMATTING_FAILED`] if the engine cannot render it.
    pub fn format(&self, format: ErrorFormat) -> String {
        match &self.repr {
            Repr::Native(err) => {
                let out = Owned::<StringRes>::new();
                // SAFETY: both slots are live and owned by this call or `self`.
                let status = unsafe {
                    sys::nickel_error_format_as_string(err.as_const(), out.as_ptr(), format.raw())
                };
                if status == sys::NICKEL_RESULT_OK {
                    out.to_string_lossy()
                } else {
                    tracing::debug!(?format, "engine failed to format an error");
                    FORMATTING_FAILED.to_string()
                }
            }
            Repr::Local(message) => render_local(message, format),
        }
    }

    /// Stream the rendered diagnostic into a writer.
    pub fn write_to<W: io::Write>(&self, format: ErrorFormat, writer: &mut W) -> io::Result<()> {
        let err = match &self.repr {
            Repr::Native(err) => err,
            Repr::Local(message) => return writer.write_all(render_local(message, format).as_bytes()),
        };

        let mut state = WriteState {
            writer,
            error: None,
        };
        // SAFETY: `state` outlives the call and is only touched by the
        // callback during it.
        let status = unsafe {
            sys::nickel_error_display(
                err.as_const(),
                Some(write_into::<W>),
                (&mut state as *mut WriteState<W>).cast::<c_void>(),
                format.raw(),
            )
        };
        match (status == sys::NICKEL_RESULT_OK, state.error) {
            (true, _) => Ok(()),
            (false, Some(err)) => Err(err),
            (false, None) => Err(io::Error::other(FORMATTING_FAILED)),
        }
    }

    /// The plain text rendering without its trailing newline.
    pub fn message(&self) -> String {
        let mut text = self.format(ErrorFormat::Text);
        text.truncate(text.trim_end().len());
        text
    }
}

fn render_local(message: &str, format: ErrorFormat) -> String {
    let report = LocalReport {
        severity: "error",
        message,
        labels: &[],
        notes: &[],
    };
    let rendered = match format {
        ErrorFormat::Text => Ok(format!("error: {}\n", message)),
        ErrorFormat::AnsiText => Ok(format!("\u{1b}[1m\u{1b}[31merror\u{1b}[0m: {}\u{1b}[0m\n", message)),
        ErrorFormat::Json => serde_json::to_string_pretty(&report).map_err(|e| e.to_string()),
        ErrorFormat::Yaml => serde_yaml::to_string(&report).map_err(|e| e.to_string()),
        ErrorFormat::Toml => toml::to_string_pretty(&report).map_err(|e| e.to_string()),
    };
    rendered.unwrap_or_else(|_| FORMATTING_FAILED.to_string())
}

struct WriteState<'a, W> {
    writer: &'a mut W,
    error: Option<io::Error>,
}

unsafe extern "C" fn write_into<W: io::Write>(
    payload: *mut c_void,
    buf: *const u8,
    len: usize,
) -> usize {
    let Some(state) = payload.cast::<WriteState<W>>().as_mut() else {
        return 0;
    };
    let bytes: &[u8] = if buf.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(buf, len)
    };
    match panic::catch_unwind(AssertUnwindSafe(|| state.writer.write_all(bytes))) {
        Ok(Ok(())) => len,
        Ok(Err(err)) => {
            state.error = Some(err);
            0
        }
        Err(_) => {
            state.error = Some(io::Error::other("writer panicked"));
            0
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl fmt::Debug for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Diagnostic").field(&self.message()).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Error Families
// ═══════════════════════════════════════════════════════════════════════

/// A failure while parsing or evaluating.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EvaluationError(pub(crate) Diagnostic);

/// A failure while serializing an evaluated value.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConversionError(pub(crate) Diagnostic);

macro_rules! family {
    ($name:ident) => {
        impl $name {
            /// The underlying diagnostic.
            pub fn diagnostic(&self) -> &Diagnostic {
                &self.0
            }

            /// Render the diagnostic.
            pub fn format(&self, format: ErrorFormat) -> String {
                self.0.format(format)
            }

            /// Stream the rendered diagnostic into a writer.
            pub fn write_to<W: io::Write>(
                &self,
                format: ErrorFormat,
                writer: &mut W,
            ) -> io::Result<()> {
                self.0.write_to(format, writer)
            }
        }
    };
}

family!(EvaluationError);
family!(ConversionError);

/// Any failure this crate reports.
#[derive(Debug, Error)]
pub enum Error {
    /// Parsing or evaluation failed
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Serialization failed
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The serialized value did not fit the requested Rust type
    #[error("failed to decode value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// Is this an evaluation failure?
    pub fn is_evaluation(&self) -> bool {
        matches!(self, Error::Evaluation(_))
    }

    /// Is this a serialization failure?
    pub fn is_conversion(&self) -> bool {
        matches!(self, Error::Conversion(_))
    }

    /// Is this a decoding failure?
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

/// Result type for embedding operations
pub type Result<T> = std::result::Result<T, Error>;
