//! # nickel-embed
//!
//! Safe bindings for embedding the Nickel configuration language.
//!
//! ## Overview
//!
//! - [`Context`]: evaluates programs, owns the source name and trace sink
//! - [`Expr`]: an evaluated (or, after a shallow evaluation, partially
//!   evaluated) value with copying accessors and serializers
//! - [`VirtualMachine`]: resumes a shallow evaluation
//! - [`Number`]: an exact rational copied out of the engine
//! - [`EvaluationError`] / [`ConversionError`]: failures carrying a
//!   renderable [`Diagnostic`]
//!
//! Every engine object is owned by exactly one Rust value and freed when it
//! is dropped. [`live_handles`] reports how many are alive.
//!
//! ## Example
//!
//! ```
//! use nickel_embed::{Context, ErrorFormat};
//!
//! let ctx = Context::with_source_name("app.ncl");
//! let config = ctx
//!     .eval_deep_for_export(r#"{ name = "api", replicas | Number = 3 }"#)
//!     .unwrap();
//! assert_eq!(
//!     config.to_json().unwrap(),
//!     "{\n  \"name\": \"api\",\n  \"replicas\": 3\n}"
//! );
//!
//! let err = ctx.eval_deep("{ replicas | Number = \"three\" }").unwrap_err();
//! assert!(err.format(ErrorFormat::Text).contains("app.ncl"));
//! ```
//!
//! ## Threads
//!
//! [`Context`] is `Send + Sync`; evaluations on one context are serialized.
//! [`Expr`] and [`VirtualMachine`] stay on the thread that created them.
//! Errors and [`Number`]s can move freely.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod expr;
pub mod handle;
pub mod number;
pub mod trace;
pub mod vm;

pub use context::Context;
pub use error::{
    ConversionError, Diagnostic, Error, ErrorFormat, EvaluationError, Result, FORMATTING_FAILED,
};
pub use expr::{Expr, ExprKind};
pub use handle::{live_handles, HandleKind, HandleStats};
pub use number::Number;
pub use trace::registered_sinks;
pub use vm::VirtualMachine;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
