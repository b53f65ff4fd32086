// src/vm/vm.rs

use std::cell::RefCell;
use std::cmp::Ordering;
use std::io::{self, Write};
use std::rc::Rc;

use crate::config::Config;
use crate::error::{Diagnostic, ErrorCategory, InterpretStatus, Location, RuntimeError, RuntimeErrorKind};
use crate::memory::Value;
use crate::vm::closure::{Closure, FrameId, Upvalue, UpvalueRef};
use crate::vm::compiler::compile_source;
use crate::vm::function::Function;
use crate::vm::opcode::OpCode;

type VmResult<T> = Result<T, RuntimeErrorKind>;

/// One active invocation.
#[derive(Debug)]
pub struct StackFrame {
    pub id: FrameId,
    pub closure: Rc<Closure>,
    pub slots: Vec<Value>,
    pub ip: usize,
}

/// An in-memory output sink whose contents stay readable after the VM took ownership of a clone.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The Virtual Machine struct.
pub struct VM {
    config: Config,
    stack: Vec<Value>,
    frames: Vec<StackFrame>,
    globals: Vec<Value>,
    /// Upvalues still aliasing a live slot, at most one per (frame, slot).
    open_upvalues: Vec<UpvalueRef>,
    next_frame_id: FrameId,
    /// Offset of the instruction being executed, for error locations.
    op_offset: usize,
    output: Box<dyn Write>,
}

impl VM {
    pub fn new(config: Config) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: Config, output: Box<dyn Write>) -> Self {
        VM {
            config,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            globals: Vec::new(),
            open_upvalues: Vec::new(),
            next_frame_id: 0,
            op_offset: 0,
            output,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    /// Runs a compiled top-level function, reporting any runtime error on stderr.
    pub fn interpret(&mut self, function: Rc<Function>) -> InterpretStatus {
        match self.run(function) {
            Ok(()) => InterpretStatus::Success,
            Err(err) => {
                eprintln!("{}", err);
                InterpretStatus::RuntimeError
            }
        }
    }

    /// Runs a compiled top-level function. On failure both stacks have been cleared.
    pub fn run(&mut self, function: Rc<Function>) -> Result<(), RuntimeError> {
        self.reset();
        self.globals = vec![Value::Noll; function.num_locals];
        let main = Rc::new(Closure::new(function, Vec::new()));
        let result = self.push_frame(main, Vec::new(), 0).and_then(|_| self.execute());
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(kind) => {
                let err = self.runtime_error(kind);
                tracing::debug!(error = %err, "runtime error, resetting VM");
                Err(err)
            }
        };
        let flushed = self.output.flush();
        self.reset();
        outcome?;
        flushed.map_err(|e| self.runtime_error(RuntimeErrorKind::Io(e.to_string())))
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.op_offset = 0;
    }

    fn runtime_error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let location = self
            .frames
            .last()
            .map(|frame| frame.closure.function.chunk.location_at(self.op_offset))
            .unwrap_or_else(Location::default);
        let diagnostic = Diagnostic { location, category: ErrorCategory::Runtime, message: kind.to_string() };
        RuntimeError { kind, diagnostic }
    }

    // --- Stack Helpers ---

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    // Helper to pop from the stack, returning a runtime error on underflow.
    fn pop_stack(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn frame(&self) -> VmResult<&StackFrame> {
        self.frames.last().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn frame_mut(&mut self) -> VmResult<&mut StackFrame> {
        self.frames.last_mut().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    // --- Instruction Decoding ---

    fn read_u8(&mut self) -> VmResult<u8> {
        let frame = self.frame_mut()?;
        let byte = frame.closure.function.chunk.read_u8(frame.ip).ok_or(RuntimeErrorKind::InvalidOpcode(0))?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> VmResult<u16> {
        let frame = self.frame_mut()?;
        let operand = frame.closure.function.chunk.read_u16(frame.ip).ok_or(RuntimeErrorKind::InvalidOpcode(0))?;
        frame.ip += 2;
        Ok(operand)
    }

    fn constant(&self, index: usize) -> VmResult<Value> {
        self.frame()?
            .closure
            .function
            .constants
            .get(index)
            .cloned()
            .ok_or(RuntimeErrorKind::InvalidConstant(index))
    }

    // --- The Execution Loop ---

    fn execute(&mut self) -> VmResult<()> {
        loop {
            self.op_offset = self.frame()?.ip;
            let byte = self.read_u8()?;
            let op = OpCode::from_byte(byte).ok_or(RuntimeErrorKind::InvalidOpcode(byte))?;
            if self.config.trace_execution {
                self.trace_instruction();
            }

            match op {
                OpCode::Nop => {}
                OpCode::Pop => {
                    self.pop_stack()?;
                }
                OpCode::Dup => {
                    let top = self.peek()?.clone();
                    self.push(top)?;
                }

                // Note: the right-hand operand is pushed last, so it's popped first.
                OpCode::Add => self.binary(|a, b| a.add(b))?,
                OpCode::Sub => self.binary(|a, b| a.sub(b))?,
                OpCode::Mul => self.binary(|a, b| a.mul(b))?,
                OpCode::Div => self.binary(|a, b| a.div(b))?,
                OpCode::Mod => self.binary(|a, b| a.rem(b))?,
                OpCode::Exp => self.binary(|a, b| a.pow(b))?,
                OpCode::Neg => self.unary(|v| v.neg())?,
                OpCode::Incr => self.unary(|v| v.step(1.0))?,
                OpCode::Decr => self.unary(|v| v.step(-1.0))?,

                OpCode::Eq => self.binary(|a, b| Value::Boolean(Value::equal(a, b)))?,
                OpCode::Neq => self.binary(|a, b| Value::Boolean(!Value::equal(a, b)))?,
                OpCode::Lt => self.comparison(|o| o == Ordering::Less)?,
                OpCode::Lte => self.comparison(|o| o != Ordering::Greater)?,
                OpCode::Gt => self.comparison(|o| o == Ordering::Greater)?,
                OpCode::Gte => self.comparison(|o| o != Ordering::Less)?,
                OpCode::Not => self.unary(|v| Value::Boolean(!v.as_boolean()))?,
                OpCode::ToBool => self.unary(|v| Value::Boolean(v.as_boolean()))?,

                OpCode::Jmp => {
                    let target = self.read_u16()?;
                    self.frame_mut()?.ip = target as usize;
                }
                OpCode::JmpTrue | OpCode::JmpFalse => {
                    let target = self.read_u16()?;
                    self.conditional_jump(op == OpCode::JmpTrue, target as usize)?;
                }

                OpCode::Constant => {
                    let index = self.read_u16()? as usize;
                    let value = self.constant(index)?;
                    self.push(value)?;
                }
                OpCode::True => self.push(Value::Boolean(true))?,
                OpCode::False => self.push(Value::Boolean(false))?,
                OpCode::Null => self.push(Value::Noll)?,
                OpCode::NewArray => {
                    let count = self.read_u16()? as usize;
                    let mut elements = Vec::with_capacity(count);
                    for _ in 0..count {
                        elements.push(self.pop_stack()?);
                    }
                    self.push(Value::array(elements))?;
                }

                OpCode::GLoad => {
                    let slot = self.read_u16()? as usize;
                    let value = self.globals.get(slot).cloned().ok_or(RuntimeErrorKind::InvalidSlot(slot))?;
                    self.push(value)?;
                }
                OpCode::GStore => {
                    let slot = self.read_u16()? as usize;
                    let value = self.peek()?.clone();
                    let target = self.globals.get_mut(slot).ok_or(RuntimeErrorKind::InvalidSlot(slot))?;
                    *target = value;
                }
                OpCode::Load => {
                    let slot = self.read_u16()? as usize;
                    let value = self.frame()?.slots.get(slot).cloned().ok_or(RuntimeErrorKind::InvalidSlot(slot))?;
                    self.push(value)?;
                }
                OpCode::Store => {
                    let slot = self.read_u16()? as usize;
                    let value = self.peek()?.clone();
                    let target = self.frame_mut()?.slots.get_mut(slot).ok_or(RuntimeErrorKind::InvalidSlot(slot))?;
                    *target = value;
                }
                OpCode::CLoad => {
                    let index = self.read_u16()? as usize;
                    let value = self.read_upvalue(index)?;
                    self.push(value)?;
                }
                OpCode::CStore => {
                    let index = self.read_u16()? as usize;
                    let value = self.peek()?.clone();
                    self.write_upvalue(index, value)?;
                }
                OpCode::ALoad => {
                    let index = self.pop_stack()?;
                    let target = self.pop_stack()?;
                    let array = target.as_array().ok_or(RuntimeErrorKind::NotAnArray)?;
                    let value = array.borrow().get(&index);
                    self.push(value)?;
                }
                OpCode::AStore => {
                    let index = self.pop_stack()?;
                    let target = self.pop_stack()?;
                    let value = self.peek()?.clone();
                    let array = target.as_array().ok_or(RuntimeErrorKind::NotAnArray)?;
                    let position = array.borrow().position(&index);
                    array.borrow_mut().store(position, index, value);
                }

                OpCode::CallTos => {
                    let argc = self.read_u16()? as usize;
                    let callee = self.pop_stack()?;
                    let closure = callee.as_closure().cloned().ok_or(RuntimeErrorKind::NotCallable)?;
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(self.pop_stack()?);
                    }
                    self.push_frame(closure, args, argc)?;
                }
                OpCode::Closure => {
                    let index = self.read_u16()? as usize;
                    let function = self
                        .constant(index)?
                        .as_function()
                        .cloned()
                        .ok_or(RuntimeErrorKind::InvalidConstant(index))?;
                    let closure = self.make_closure(function)?;
                    self.push(Value::closure(closure))?;
                }
                OpCode::Ret => {
                    let result = self.pop_stack()?;
                    let frame = self.frames.pop().ok_or(RuntimeErrorKind::StackUnderflow)?;
                    self.close_upvalues(&frame);
                    tracing::debug!(function = %frame.closure.function.name, frame = frame.id, "return");
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result)?;
                }
                OpCode::Print => {
                    let value = self.pop_stack()?;
                    writeln!(self.output, "{}", value).map_err(|e| RuntimeErrorKind::Io(e.to_string()))?;
                }
                OpCode::Halt => return Ok(()),
            }
        }
    }

    fn binary(&mut self, apply: impl FnOnce(&Value, &Value) -> Value) -> VmResult<()> {
        let right = self.pop_stack()?;
        let left = self.pop_stack()?;
        self.push(apply(&left, &right))
    }

    fn unary(&mut self, apply: impl FnOnce(&Value) -> Value) -> VmResult<()> {
        let value = self.pop_stack()?;
        self.push(apply(&value))
    }

    /// Unordered operands make every comparison false.
    fn comparison(&mut self, test: impl FnOnce(Ordering) -> bool) -> VmResult<()> {
        self.binary(|a, b| Value::Boolean(Value::compare(a, b).is_some_and(test)))
    }

    /// The condition stays on the stack when the jump is taken and is popped otherwise.
    /// A taken jump that lands on another conditional jump is resolved here directly:
    /// same polarity jumps again, opposite polarity falls through past it.
    fn conditional_jump(&mut self, on_true: bool, target: usize) -> VmResult<()> {
        if self.peek()?.as_boolean() != on_true {
            self.pop_stack()?;
            return Ok(());
        }
        let function = self.frame()?.closure.function.clone();
        let chunk = &function.chunk;
        let mut target = target;
        // Compiled code never loops through conditional jumps alone; the bound guards corrupt chunks.
        for _ in 0..chunk.len() {
            let next = match chunk.read_u8(target).and_then(OpCode::from_byte) {
                Some(op @ (OpCode::JmpTrue | OpCode::JmpFalse)) => op,
                _ => break,
            };
            if (next == OpCode::JmpTrue) == on_true {
                target = chunk.read_u16(target + 1).ok_or(RuntimeErrorKind::InvalidOpcode(next as u8))? as usize;
            } else {
                self.pop_stack()?;
                target += 3;
                break;
            }
        }
        self.frame_mut()?.ip = target;
        Ok(())
    }

    // --- Calls ---

    fn push_frame(&mut self, closure: Rc<Closure>, args: Vec<Value>, argc: usize) -> VmResult<()> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        let function = &closure.function;
        let mut slots = vec![Value::Noll; function.num_locals.max(function.arity)];
        // Surplus arguments are dropped; missing ones stay Noll.
        for (slot, arg) in slots.iter_mut().take(function.arity).zip(args) {
            *slot = arg;
        }
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        tracing::debug!(function = %function.name, frame = id, argc, depth = self.frames.len() + 1, "call");
        self.frames.push(StackFrame { id, closure, slots, ip: 0 });
        Ok(())
    }

    // --- Closures and Upvalues ---

    fn make_closure(&mut self, function: Rc<Function>) -> VmResult<Closure> {
        let (frame_id, enclosing) = {
            let frame = self.frame()?;
            (frame.id, frame.closure.clone())
        };
        let mut upvalues = Vec::with_capacity(function.captured.len());
        for descriptor in &function.captured {
            let index = descriptor.index as usize;
            let upvalue = if descriptor.is_local {
                self.capture_upvalue(frame_id, index)?
            } else {
                enclosing.upvalues.get(index).cloned().ok_or(RuntimeErrorKind::InvalidSlot(index))?
            };
            upvalues.push(upvalue);
        }
        Ok(Closure::new(function, upvalues))
    }

    /// Reuses the open upvalue for this exact slot if there is one.
    fn capture_upvalue(&mut self, frame: FrameId, slot: usize) -> VmResult<UpvalueRef> {
        if slot >= self.frame()?.slots.len() {
            return Err(RuntimeErrorKind::InvalidSlot(slot));
        }
        let existing = self.open_upvalues.iter().find(|upvalue| {
            matches!(*upvalue.borrow(), Upvalue::Open { frame: f, slot: s } if f == frame && s == slot)
        });
        if let Some(upvalue) = existing {
            return Ok(upvalue.clone());
        }
        tracing::debug!(frame, slot, "upvalue opened");
        let upvalue = Rc::new(RefCell::new(Upvalue::Open { frame, slot }));
        self.open_upvalues.push(upvalue.clone());
        Ok(upvalue)
    }

    /// Copies the current value into every upvalue still aliasing a slot of `frame`.
    fn close_upvalues(&mut self, frame: &StackFrame) {
        self.open_upvalues.retain(|upvalue| {
            let slot = match *upvalue.borrow() {
                Upvalue::Open { frame: id, slot } if id == frame.id => slot,
                _ => return true,
            };
            let value = frame.slots.get(slot).cloned().unwrap_or(Value::Noll);
            tracing::debug!(frame = frame.id, slot, "upvalue closed");
            *upvalue.borrow_mut() = Upvalue::Closed(value);
            false
        });
    }

    fn upvalue(&self, index: usize) -> VmResult<UpvalueRef> {
        self.frame()?.closure.upvalues.get(index).cloned().ok_or(RuntimeErrorKind::InvalidSlot(index))
    }

    fn live_frame_index(&self, id: FrameId) -> VmResult<usize> {
        // Frame ids grow with stack position, so the frame stack is sorted by id.
        self.frames.binary_search_by_key(&id, |frame| frame.id).map_err(|_| RuntimeErrorKind::InvalidSlot(0))
    }

    fn read_upvalue(&self, index: usize) -> VmResult<Value> {
        let upvalue = self.upvalue(index)?;
        let cell = upvalue.borrow();
        match &*cell {
            Upvalue::Closed(value) => Ok(value.clone()),
            Upvalue::Open { frame, slot } => {
                let frame = &self.frames[self.live_frame_index(*frame)?];
                frame.slots.get(*slot).cloned().ok_or(RuntimeErrorKind::InvalidSlot(*slot))
            }
        }
    }

    fn write_upvalue(&mut self, index: usize, value: Value) -> VmResult<()> {
        let upvalue = self.upvalue(index)?;
        let open = match &*upvalue.borrow() {
            Upvalue::Closed(_) => None,
            Upvalue::Open { frame, slot } => Some((*frame, *slot)),
        };
        match open {
            None => *upvalue.borrow_mut() = Upvalue::Closed(value),
            Some((frame, slot)) => {
                let position = self.live_frame_index(frame)?;
                let target = self.frames[position].slots.get_mut(slot).ok_or(RuntimeErrorKind::InvalidSlot(slot))?;
                *target = value;
            }
        }
        Ok(())
    }

    // --- Debugging ---

    fn trace_instruction(&self) {
        if let Some(frame) = self.frames.last() {
            let function = &frame.closure.function;
            let (text, _) = function.chunk.disassemble_instruction(self.op_offset, &function.constants);
            tracing::trace!(function = %function.name, stack = self.stack.len(), "{}", text);
        }
    }
}

/// Compiles and runs `source`, printing diagnostics to stderr.
pub fn interpret(vm: &mut VM, source: &str, file: &str) -> InterpretStatus {
    let function = match compile_source(source, file) {
        Ok(function) => function,
        Err(err) => {
            for diagnostic in &err.diagnostics {
                eprintln!("{}", diagnostic);
            }
            return InterpretStatus::CompileError;
        }
    };
    if vm.config().disassemble {
        eprint!("{}", function.disassemble());
    }
    vm.interpret(function)
}
