//! Evaluation contexts
//!
//! A [`Context`] owns one engine context: its source name, its trace sink
//! and its settings. Evaluations through a context are serialized by an
//! internal lock, so a context can be shared across threads, and every
//! [`Expr`] it produces keeps it alive.

use std::ffi::{c_void, CString};
use std::fmt;
use std::io::Write;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nickel_lang_sys as sys;

use crate::error::{Diagnostic, EvaluationError};
use crate::expr::Expr;
use crate::handle::{ContextRes, ErrorRes, Owned};
use crate::trace;
use crate::vm::VirtualMachine;

/// Shared state behind a [`Context`] and everything derived from it.
pub(crate) struct ContextInner {
    raw: Mutex<Owned<ContextRes>>,
    token: usize,
}

// SAFETY: the engine context is only touched while `raw` is locked.
unsafe impl Send for ContextInner {}
unsafe impl Sync for ContextInner {}

impl ContextInner {
    /// Lock the engine context for one ABI call.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Owned<ContextRes>> {
        self.raw.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // The sink goes first; the engine context is freed with `raw`.
        trace::unregister(self.token);
        tracing::debug!(token = self.token, "context dropped");
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Deep,
    DeepForExport,
    Shallow,
}

/// An evaluation context.
///
/// # Example
///
/// ```
/// use nickel_embed::Context;
///
/// let ctx = Context::new();
/// let value = ctx.eval_deep("{ port = 80 + 1 }").unwrap();
/// let port = value.field("port").and_then(|port| port.to_i64());
/// assert_eq!(port, Some(81));
/// ```
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context named `<main>` that traces to stderr.
    pub fn new() -> Self {
        let inner = ContextInner {
            raw: Mutex::new(Owned::new()),
            token: trace::next_token(),
        };
        tracing::debug!(token = inner.token, "context created");
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a context with a source name for diagnostics.
    pub fn with_source_name(name: &str) -> Self {
        let ctx = Self::new();
        ctx.set_source_name(name);
        ctx
    }

    /// Name the main program in diagnostics.
    ///
    /// NUL bytes cannot cross the C boundary and are removed.
    pub fn set_source_name(&self, name: &str) {
        let name = CString::new(name.replace('\0', "")).unwrap_or_default();
        let raw = self.inner.lock();
        // SAFETY: the context is live and locked; the name is copied.
        unsafe { sys::nickel_context_set_source_name(raw.as_ptr(), name.as_ptr()) };
    }

    /// Send `std.trace` output to `sink`, replacing any previous sink.
    ///
    /// An evaluation already running on another thread finishes with the
    /// sink it started with; this call waits for it.
    pub fn set_trace_sink<W: Write + Send + 'static>(&self, sink: W) {
        let raw = self.inner.lock();
        trace::register(self.inner.token, Box::new(sink));
        // SAFETY: the token is a plain integer; the callbacks look it up in
        // the registry and never dereference it.
        unsafe {
            sys::nickel_context_set_trace_callback(
                raw.as_ptr(),
                Some(trace::write_callback),
                Some(trace::flush_callback),
                self.inner.token as *mut c_void,
            )
        };
    }

    /// Remove the trace sink, restoring the default of writing to stderr.
    ///
    /// To discard trace output instead, install `std::io::sink()`.
    pub fn clear_trace_sink(&self) {
        let raw = self.inner.lock();
        // SAFETY: the context is live and locked.
        unsafe {
            sys::nickel_context_set_trace_callback(raw.as_ptr(), None, None, ptr::null_mut())
        };
        trace::unregister(self.inner.token);
    }

    /// Evaluate a program completely.
    pub fn eval_deep(&self, src: &str) -> Result<Expr, EvaluationError> {
        let out = Expr::empty(&self.inner);
        self.eval(Mode::Deep, src, &out, None)?;
        Ok(out)
    }

    /// Evaluate a program completely, leaving out `not_exported` fields.
    pub fn eval_deep_for_export(&self, src: &str) -> Result<Expr, EvaluationError> {
        let out = Expr::empty(&self.inner);
        self.eval(Mode::DeepForExport, src, &out, None)?;
        Ok(out)
    }

    /// Evaluate a program completely, writing the result into `out`.
    ///
    /// On failure `out` is left unchanged. The exclusive borrow guarantees
    /// no view into `out` survives the overwrite.
    pub fn eval_deep_into(&self, src: &str, out: &mut Expr) -> Result<(), EvaluationError> {
        self.eval(Mode::Deep, src, out, None)?;
        out.attach(&self.inner);
        Ok(())
    }

    /// Evaluate a program only to its outermost constructor.
    ///
    /// The children of the result stay unevaluated until they are passed to
    /// [`Expr::eval_shallow`] or to the returned [`VirtualMachine`].
    pub fn eval_shallow(&self, src: &str) -> Result<(Expr, VirtualMachine), EvaluationError> {
        let out = Expr::empty(&self.inner);
        let vm = VirtualMachine::empty(&self.inner);
        self.eval(Mode::Shallow, src, &out, Some(&vm))?;
        Ok((out, vm))
    }

    fn eval(
        &self,
        mode: Mode,
        src: &str,
        out: &Expr,
        vm: Option<&VirtualMachine>,
    ) -> Result<(), EvaluationError> {
        let src = source(src)?;
        let err = Owned::<ErrorRes>::new();
        tracing::debug!(token = self.inner.token, ?mode, "evaluating program");

        let raw = self.inner.lock();
        // SAFETY: the context is locked; every slot is live and owned by
        // this crate for the duration of the call.
        let status = unsafe {
            match mode {
                Mode::Deep => {
                    sys::nickel_context_eval_deep(raw.as_ptr(), src.as_ptr(), out.raw_mut(), err.as_ptr())
                }
                Mode::DeepForExport => sys::nickel_context_eval_deep_for_export(
                    raw.as_ptr(),
                    src.as_ptr(),
                    out.raw_mut(),
                    err.as_ptr(),
                ),
                Mode::Shallow => sys::nickel_context_eval_shallow(
                    raw.as_ptr(),
                    src.as_ptr(),
                    out.raw_mut(),
                    vm.map_or(ptr::null_mut(), VirtualMachine::raw_mut),
                    err.as_ptr(),
                ),
            }
        };
        drop(raw);

        if status == sys::NICKEL_RESULT_OK {
            Ok(())
        } else {
            tracing::debug!(token = self.inner.token, ?mode, "evaluation failed");
            Err(EvaluationError(Diagnostic::native(err)))
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("token", &self.inner.token)
            .finish_non_exhaustive()
    }
}

fn source(src: &str) -> Result<CString, EvaluationError> {
    CString::new(src).map_err(|err| {
        EvaluationError(Diagnostic::local(format!(
            "source contains a NUL byte at offset {}",
            err.nul_position()
        )))
    })
}
