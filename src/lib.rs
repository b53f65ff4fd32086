// src/lib.rs

// --- Module Declarations ---
pub mod ast;
pub mod config;
pub mod error;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod vm;

// --- Public API Re-exports ---
pub use config::Config;
pub use error::{
    CompileError, Diagnostic, Diagnostics, ErrorCategory, InterpretStatus, Location, RuntimeError, RuntimeErrorKind,
};
pub use memory::{Array, Object, Value};
pub use parser::parse;
pub use vm::{compile, compile_source, interpret, Function, VM};
