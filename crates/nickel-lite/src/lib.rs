//! # nickel-lite
//!
//! A compact lazy evaluator for a core subset of the Nickel configuration
//! language, exporting the `nickel_lang` C ABI.
//!
//! The crate has two faces:
//!
//! - A Rust API ([`Program`], [`Evaluator`], [`Value`]) for evaluating
//!   programs directly.
//! - The [`ffi`] module, whose `#[no_mangle]` functions implement the
//!   `nickel_lang.h` interface that `nickel-lang-sys` declares. Linking this
//!   crate is enough to satisfy those symbols.
//!
//! ## Example
//!
//! ```
//! use nickel_lite::{EvalConfig, Evaluator, Program, StderrTracer};
//!
//! let program = Program::parse("<main>", "{ a = 1 + 2 }").unwrap();
//! let config = EvalConfig::default();
//! let value = Evaluator::new(&config, &StderrTracer)
//!     .eval_deep(&program, false)
//!     .unwrap();
//! assert_eq!(format!("{:?}", value), r#"{"a": Some(3)}"#);
//! ```

#![warn(missing_docs)]

pub mod diagnostic;
pub mod error;
pub mod eval;
pub mod export;
pub mod ffi;
pub mod lexer;
pub mod parser;
pub mod stdlib;
pub mod term;
pub mod value;

pub use diagnostic::{Report, ReportFormat};
pub use error::{EvalError, Result, Source, Span};
pub use eval::{EvalConfig, Evaluator, Program, StderrTracer, Tracer};
pub use export::ExportFormat;
pub use value::{Thunk, Value};
