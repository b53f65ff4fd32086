// src/vm/mod.rs

// Declare the modules within the `vm` module.
pub mod chunk;
pub mod closure;
pub mod compiler;
pub mod function;
pub mod opcode;
pub mod scope;
pub mod vm;

// Re-export the key structures and functions.
pub use chunk::Chunk;
pub use closure::{Closure, Upvalue};
pub use compiler::{compile, compile_source};
pub use function::{CapturedVariableDescriptor, Function};
pub use opcode::OpCode;
pub use vm::{interpret, SharedOutput, VM};
