// src/vm/function.rs

use std::hash::{Hash, Hasher};

use crate::memory::Value;
use crate::vm::chunk::Chunk;

/// Says where a closure finds one of its captured variables when it is created:
/// a slot of the enclosing activation (`is_local`) or an upvalue the enclosing closure already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapturedVariableDescriptor {
    pub index: u16,
    pub is_local: bool,
}

/// Compiled code for one function literal. Immutable once the code generator hands it out.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: String,
    pub arity: usize,
    /// Variable slots an activation needs, parameters included.
    pub num_locals: usize,
    pub chunk: Chunk,
    pub constants: Vec<Value>,
    pub captured: Vec<CapturedVariableDescriptor>,
}

impl Function {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Function { name: name.into(), arity, ..Default::default() }
    }

    /// Full listing of this function followed by every function in its constant pool.
    pub fn disassemble(&self) -> String {
        let mut out = format!(
            "== {} (arity {}, locals {}, captures {}) ==\n",
            self.name,
            self.arity,
            self.num_locals,
            self.captured.len()
        );
        for (i, constant) in self.constants.iter().enumerate() {
            out.push_str(&format!("  const {:<3} {}\n", i, constant));
        }
        for (i, descriptor) in self.captured.iter().enumerate() {
            let source = if descriptor.is_local { "local" } else { "upvalue" };
            out.push_str(&format!("  capture {} <- {} {}\n", i, source, descriptor.index));
        }
        out.push_str(&self.chunk.disassemble(&self.constants));
        for constant in &self.constants {
            if let Some(nested) = constant.as_function() {
                out.push('\n');
                out.push_str(&nested.disassemble());
            }
        }
        out
    }
}

impl Hash for Function {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.arity.hash(state);
        self.chunk.code.hash(state);
    }
}
