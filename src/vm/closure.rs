// src/vm/closure.rs

use std::cell::RefCell;
use std::rc::Rc;

use crate::memory::Value;
use crate::vm::function::Function;

/// Identifies one activation of a function. Ids are never reused within a VM.
pub type FrameId = u64;

/// A captured variable. While open it aliases a slot of a live activation; when that
/// activation returns the value is copied in and the upvalue becomes closed.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open { frame: FrameId, slot: usize },
    Closed(Value),
}

/// Shared handle: every closure that captured the same variable holds the same cell.
pub type UpvalueRef = Rc<RefCell<Upvalue>>;

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Rc<Function>,
    pub upvalues: Vec<UpvalueRef>,
}

impl Closure {
    pub fn new(function: Rc<Function>, upvalues: Vec<UpvalueRef>) -> Self {
        Closure { function, upvalues }
    }
}
