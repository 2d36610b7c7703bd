//! Shallow evaluation sessions
//!
//! [`Context::eval_shallow`](crate::Context::eval_shallow) returns its
//! result together with the [`VirtualMachine`] that produced it. The machine
//! resumes evaluation of the result's descendants using the settings the
//! session started with.

use std::fmt;
use std::sync::Arc;

use nickel_lang_sys as sys;

use crate::context::ContextInner;
use crate::error::{Diagnostic, EvaluationError};
use crate::expr::Expr;
use crate::handle::{ErrorRes, Owned, VmRes};

/// The session of one shallow evaluation.
pub struct VirtualMachine {
    slot: Owned<VmRes>,
    ctx: Arc<ContextInner>,
}

impl VirtualMachine {
    pub(crate) fn empty(ctx: &Arc<ContextInner>) -> Self {
        Self {
            slot: Owned::new(),
            ctx: Arc::clone(ctx),
        }
    }

    pub(crate) fn raw_mut(&self) -> *mut sys::nickel_virtual_machine {
        self.slot.as_ptr()
    }

    /// Evaluate `expr` to its outermost constructor within this session.
    ///
    /// `expr` should be the session's result or one of its descendants.
    /// Other expressions are evaluated with this session's settings, which
    /// may differ from those of the context that produced them.
    ///
    /// # Example
    ///
    /// ```
    /// use nickel_embed::Context;
    ///
    /// let ctx = Context::new();
    /// let (value, vm) = ctx.eval_shallow("{ a = 1 + 1 }").unwrap();
    /// let a = value.field("a").unwrap();
    /// assert!(!a.is_value());
    /// assert_eq!(vm.eval_shallow(&a).unwrap().to_i64(), Some(2));
    /// ```
    pub fn eval_shallow(&self, expr: &Expr) -> Result<Expr, EvaluationError> {
        if !Arc::ptr_eq(&self.ctx, expr.context()) {
            tracing::debug!("resuming an expression from another context");
        }
        let out = Expr::empty(&self.ctx);
        let err = Owned::<ErrorRes>::new();
        let guard = self.ctx.lock();
        // SAFETY: evaluations sharing this context are serialized by
        // `guard`; every slot is live.
        let status = unsafe {
            sys::nickel_virtual_machine_eval_shallow(
                self.raw_mut(),
                expr.raw(),
                out.raw_mut(),
                err.as_ptr(),
            )
        };
        drop(guard);
        if status == sys::NICKEL_RESULT_OK {
            Ok(out)
        } else {
            Err(EvaluationError(Diagnostic::native(err)))
        }
    }
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualMachine").field(&self.slot).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::Context;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resumes_descendants() {
        let ctx = Context::new();
        let (value, vm) = ctx.eval_shallow("{ inner = { x = 2 * 21 } }").unwrap();
        let inner = vm.eval_shallow(&value.field("inner").unwrap()).unwrap();
        let x = inner.field("x").unwrap();
        assert!(!x.is_value());
        assert_eq!(vm.eval_shallow(&x).unwrap().to_i64(), Some(42));
    }

    #[test]
    fn test_errors_surface_on_demand() {
        let ctx = Context::new();
        let (value, vm) = ctx.eval_shallow("{ ok = 1, bad = 1 + \"x\" }").unwrap();
        assert_eq!(vm.eval_shallow(&value.field("ok").unwrap()).unwrap().to_i64(), Some(1));
        assert!(vm.eval_shallow(&value.field("bad").unwrap()).is_err());
    }

    #[test]
    fn test_unused_machine_has_no_session() {
        let ctx = Context::new();
        let vm = super::VirtualMachine::empty(&ctx.inner);
        let one = ctx.eval_deep("1").unwrap();
        assert!(vm.eval_shallow(&one).is_err());
    }
}
