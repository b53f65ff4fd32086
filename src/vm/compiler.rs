// src/vm/compiler.rs

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::ast::{BinaryOp, Block, Expr, ExprKind, FunctionKind, FunctionLiteral, LiteralValue, Stmt, UnaryOp};
use crate::error::{CompileError, Diagnostics, ErrorCategory, Location};
use crate::memory::Value;
use crate::parser::parse;
use crate::vm::chunk::{Chunk, Label};
use crate::vm::function::{CapturedVariableDescriptor, Function};
use crate::vm::opcode::OpCode;
use crate::vm::scope::{Resolution, ScopeChain};

/// Compiles the top-level function of a parsed program.
/// Any reported error discards the result.
pub fn compile(program: &FunctionLiteral) -> Result<Rc<Function>, CompileError> {
    let mut generator = CodeGenerator::new();
    let function = generator.compile_function(program);
    if generator.diagnostics.has_errors() {
        return Err(CompileError { diagnostics: generator.diagnostics.into_vec() });
    }
    Ok(function)
}

/// Parses and compiles `source`. Syntax errors stop before code generation.
pub fn compile_source(source: &str, file: &str) -> Result<Rc<Function>, CompileError> {
    let mut diagnostics = Diagnostics::new();
    let program = parse(source, file, &mut diagnostics);
    if diagnostics.has_errors() {
        return Err(CompileError { diagnostics: diagnostics.into_vec() });
    }
    compile(&program)
}

/// Constant-pool key: two literals share an entry only when they are strictly equal.
#[derive(Debug, Clone)]
struct PoolKey(Value);

impl PartialEq for PoolKey {
    fn eq(&self, other: &Self) -> bool {
        Value::strict_equals(&self.0, &other.0)
    }
}

impl Eq for PoolKey {}

impl Hash for PoolKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.type_name().hash(state);
        self.0.hash(state);
    }
}

/// One function under construction.
struct FunctionState {
    function: Function,
    scopes: ScopeChain,
    pool: HashMap<PoolKey, u16>,
}

impl FunctionState {
    fn new(name: &str, arity: usize) -> Self {
        FunctionState { function: Function::new(name, arity), scopes: ScopeChain::new(), pool: HashMap::new() }
    }
}

/// Walks the AST and emits bytecode. `frames` holds the enclosing functions, the innermost last;
/// the top-level function is always `frames[0]`.
pub struct CodeGenerator {
    frames: Vec<FunctionState>,
    diagnostics: Diagnostics,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        CodeGenerator { frames: Vec::new(), diagnostics: Diagnostics::new() }
    }

    fn compile_function(&mut self, literal: &FunctionLiteral) -> Rc<Function> {
        self.frames.push(FunctionState::new(&literal.name, literal.params.len()));
        for param in &literal.params {
            self.define(&param.name, &param.location);
        }
        // The body shares the parameters' scope.
        self.visit_block_body(&literal.body);

        let end = self.end_location(literal);
        match literal.kind {
            FunctionKind::TopLevel => self.emit_op(OpCode::Halt, &end),
            FunctionKind::Named | FunctionKind::Anonymous => {
                self.emit_op(OpCode::Null, &end);
                self.emit_op(OpCode::Ret, &end);
            }
        }

        let Some(state) = self.frames.pop() else {
            return Rc::new(Function::new(literal.name.as_str(), literal.params.len()));
        };
        let mut function = state.function;
        function.num_locals = state.scopes.num_locals();
        tracing::debug!(
            name = %function.name,
            arity = function.arity,
            locals = function.num_locals,
            constants = function.constants.len(),
            captures = function.captured.len(),
            bytes = function.chunk.len(),
            "function compiled"
        );
        Rc::new(function)
    }

    fn end_location(&self, literal: &FunctionLiteral) -> Location {
        self.current()
            .and_then(|state| state.function.chunk.locations.last().cloned())
            .unwrap_or_else(|| literal.location.clone())
    }

    // --- Scope and Variable Helpers ---

    fn current(&self) -> Option<&FunctionState> {
        self.frames.last()
    }

    fn current_mut(&mut self) -> Option<&mut FunctionState> {
        self.frames.last_mut()
    }

    fn push_scope(&mut self) {
        if let Some(state) = self.current_mut() {
            state.scopes.push();
        }
    }

    fn pop_scope(&mut self) {
        if let Some(state) = self.current_mut() {
            state.scopes.pop();
        }
    }

    fn define(&mut self, name: &str, location: &Location) -> Option<u16> {
        let result = self.current_mut()?.scopes.define(name);
        match result {
            Ok(slot) => Some(slot),
            Err(err) => {
                self.semantic_error(location, err.to_string());
                None
            }
        }
    }

    fn resolve(&mut self, name: &str) -> Resolution {
        match self.frames.len() {
            0 => Resolution::Undefined,
            n => self.resolve_at(n - 1, name),
        }
    }

    /// Resolves `name` as seen from `frames[depth]`, registering capture descriptors on the way out.
    fn resolve_at(&mut self, depth: usize, name: &str) -> Resolution {
        if let Some(slot) = self.frames[depth].scopes.lookup(name) {
            return if depth == 0 { Resolution::TopLevel(slot) } else { Resolution::Local(slot) };
        }
        if depth == 0 {
            return Resolution::Undefined;
        }
        match self.resolve_at(depth - 1, name) {
            Resolution::Local(slot) => {
                self.frames[depth - 1].scopes.mark_captured(slot);
                self.add_descriptor(depth, slot, true)
            }
            Resolution::Captured(index) => self.add_descriptor(depth, index, false),
            Resolution::TopLevel(slot) => {
                self.frames[0].scopes.mark_captured(slot);
                Resolution::TopLevel(slot)
            }
            Resolution::Undefined => Resolution::Undefined,
        }
    }

    fn add_descriptor(&mut self, depth: usize, index: u16, is_local: bool) -> Resolution {
        let descriptor = CapturedVariableDescriptor { index, is_local };
        let existing = self.frames[depth].function.captured.iter().position(|d| *d == descriptor);
        let position = match existing {
            Some(position) => position,
            None => {
                tracing::debug!(function = %self.frames[depth].function.name, index, is_local, "capture registered");
                let captured = &mut self.frames[depth].function.captured;
                captured.push(descriptor);
                captured.len() - 1
            }
        };
        // Each descriptor comes from a distinct defined slot, so the count stays within u16.
        Resolution::Captured(position as u16)
    }

    fn is_top_level(&self) -> bool {
        self.frames.len() == 1
    }

    fn semantic_error(&mut self, location: &Location, message: impl Into<String>) {
        self.diagnostics.report_error_at(location, ErrorCategory::Semantic, message);
    }

    // --- Bytecode Emitter Helpers ---

    fn chunk(&mut self) -> Option<&mut Chunk> {
        self.current_mut().map(|state| &mut state.function.chunk)
    }

    fn emit_op(&mut self, op: OpCode, location: &Location) {
        if let Some(chunk) = self.chunk() {
            chunk.write_opcode(op, location);
        }
    }

    fn emit_op_u16(&mut self, op: OpCode, operand: u16, location: &Location) {
        if let Some(chunk) = self.chunk() {
            chunk.write_opcode(op, location);
            chunk.write_u16(operand, location);
        }
    }

    fn emit_jump(&mut self, op: OpCode, location: &Location) -> Option<Label> {
        self.chunk().map(|chunk| chunk.write_jump(op, location))
    }

    fn patch_jump(&mut self, label: Option<Label>, location: &Location) {
        let Some(label) = label else { return };
        let result = match self.chunk() {
            Some(chunk) => chunk.patch_jump(label),
            None => return,
        };
        if let Err(err) = result {
            self.semantic_error(location, err.to_string());
        }
    }

    fn code_offset(&mut self) -> usize {
        self.chunk().map(|chunk| chunk.len()).unwrap_or(0)
    }

    /// Emits a backward `jmp` to `target`.
    fn emit_loop(&mut self, target: usize, location: &Location) {
        match u16::try_from(target) {
            Ok(operand) => self.emit_op_u16(OpCode::Jmp, operand, location),
            Err(_) => self.semantic_error(location, "Loop body too large"),
        }
    }

    /// Adds a literal to the constant pool, reusing a strictly equal entry.
    fn add_constant(&mut self, value: Value, location: &Location) -> u16 {
        let Some(state) = self.frames.last_mut() else { return 0 };
        let key = PoolKey(value.clone());
        if let Some(&index) = state.pool.get(&key) {
            return index;
        }
        let index = state.function.constants.len();
        let Ok(index) = u16::try_from(index) else {
            self.semantic_error(location, "Too many constants in one function");
            return 0;
        };
        state.function.constants.push(value);
        state.pool.insert(key, index);
        index
    }

    /// Function constants are never shared.
    fn add_function_constant(&mut self, function: Rc<Function>, location: &Location) -> u16 {
        let Some(state) = self.frames.last_mut() else { return 0 };
        let index = state.function.constants.len();
        let Ok(index) = u16::try_from(index) else {
            self.semantic_error(location, "Too many constants in one function");
            return 0;
        };
        state.function.constants.push(Value::function(function));
        index
    }

    fn emit_load(&mut self, resolution: Resolution, location: &Location) {
        match resolution {
            Resolution::TopLevel(slot) => self.emit_op_u16(OpCode::GLoad, slot, location),
            Resolution::Local(slot) => self.emit_op_u16(OpCode::Load, slot, location),
            Resolution::Captured(index) => self.emit_op_u16(OpCode::CLoad, index, location),
            Resolution::Undefined => self.emit_op(OpCode::Null, location),
        }
    }

    fn emit_store(&mut self, resolution: Resolution, location: &Location) {
        match resolution {
            Resolution::TopLevel(slot) => self.emit_op_u16(OpCode::GStore, slot, location),
            Resolution::Local(slot) => self.emit_op_u16(OpCode::Store, slot, location),
            Resolution::Captured(index) => self.emit_op_u16(OpCode::CStore, index, location),
            Resolution::Undefined => {}
        }
    }

    // --- Statements ---

    /// Declarations first, so named functions can be referenced before their definition.
    fn visit_block_body(&mut self, block: &Block) {
        for declaration in &block.declarations {
            self.define(&declaration.name, &declaration.location);
        }
        for stmt in &block.statements {
            self.visit_stmt(stmt);
        }
    }

    fn visit_scoped_block(&mut self, block: &Block) {
        self.push_scope();
        self.visit_block_body(block);
        self.pop_scope();
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.visit_scoped_block(block),
            Stmt::Expression(expr) => {
                self.visit_expr(expr);
                self.emit_op(OpCode::Pop, &expr.location);
            }
            Stmt::Print(expr) => {
                self.visit_expr(expr);
                self.emit_op(OpCode::Print, &expr.location);
            }
            Stmt::Return { value, location } => {
                match value {
                    Some(expr) => self.visit_expr(expr),
                    None => self.emit_op(OpCode::Null, location),
                }
                self.emit_op(OpCode::Ret, location);
            }
            Stmt::If { condition, then_block, else_block, location } => {
                self.visit_if(condition, then_block, else_block.as_ref(), location)
            }
            Stmt::While { condition, body, location } => self.visit_while(condition, body, location),
            Stmt::Function(literal) => self.visit_named_function(literal),
        }
    }

    fn visit_if(&mut self, condition: &Expr, then_block: &Block, else_block: Option<&Block>, location: &Location) {
        if condition.to_boolean_is_true() {
            self.visit_scoped_block(then_block);
            return;
        }
        if condition.to_boolean_is_false() {
            if let Some(block) = else_block {
                self.visit_scoped_block(block);
            }
            return;
        }

        self.visit_condition(condition);
        let else_label = self.emit_jump(OpCode::JmpFalse, location);
        self.visit_scoped_block(then_block);
        let end_label = self.emit_jump(OpCode::Jmp, location);
        self.patch_jump(else_label, location);
        // A taken conditional jump leaves its condition behind.
        self.emit_op(OpCode::Pop, location);
        if let Some(block) = else_block {
            self.visit_scoped_block(block);
        }
        self.patch_jump(end_label, location);
    }

    fn visit_while(&mut self, condition: &Expr, body: &Block, location: &Location) {
        if condition.to_boolean_is_false() {
            return;
        }
        let start = self.code_offset();
        if condition.to_boolean_is_true() {
            self.visit_scoped_block(body);
            self.emit_loop(start, location);
            return;
        }

        self.visit_condition(condition);
        let exit_label = self.emit_jump(OpCode::JmpFalse, location);
        self.visit_scoped_block(body);
        self.emit_loop(start, location);
        self.patch_jump(exit_label, location);
        self.emit_op(OpCode::Pop, location);
    }

    fn visit_named_function(&mut self, literal: &FunctionLiteral) {
        self.emit_closure(literal);
        // The name was declared with the enclosing block.
        let resolution = self.resolve(&literal.name);
        self.emit_store(resolution, &literal.location);
        self.emit_op(OpCode::Pop, &literal.location);
    }

    fn emit_closure(&mut self, literal: &FunctionLiteral) {
        let function = self.compile_function(literal);
        let index = self.add_function_constant(function, &literal.location);
        self.emit_op_u16(OpCode::Closure, index, &literal.location);
    }

    // --- Expressions ---

    fn visit_expr(&mut self, expr: &Expr) {
        let location = &expr.location;
        match &expr.kind {
            ExprKind::Literal(literal) => self.visit_literal(literal, location),
            ExprKind::Identifier(name) => {
                let resolution = self.resolve(name);
                if resolution == Resolution::Undefined {
                    self.semantic_error(location, format!("Identifier not defined '{}'", name));
                }
                self.emit_load(resolution, location);
            }
            ExprKind::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), left, right } => {
                self.visit_logical(*op, left, right, location);
                self.emit_op(OpCode::ToBool, location);
            }
            ExprKind::Binary { op, left, right } => {
                self.visit_expr(left);
                self.visit_expr(right);
                self.emit_op(binary_opcode(*op), location);
            }
            ExprKind::Unary { op: UnaryOp::Negate, operand, .. } => {
                self.visit_expr(operand);
                self.emit_op(OpCode::Neg, location);
            }
            ExprKind::Unary { op: UnaryOp::Not, operand, .. } => {
                self.visit_expr(operand);
                self.emit_op(OpCode::Not, location);
            }
            ExprKind::Unary { op, operand, postfix } => {
                let step = if *op == UnaryOp::Increment { OpCode::Incr } else { OpCode::Decr };
                self.visit_step(step, operand, *postfix, location);
            }
            ExprKind::Assignment { target, value } => self.visit_assignment(target, value, location),
            ExprKind::Call { callee, args } => {
                for arg in args.iter().rev() {
                    self.visit_expr(arg);
                }
                self.visit_expr(callee);
                let argc = self.operand(args.len(), "Too many arguments", location);
                self.emit_op_u16(OpCode::CallTos, argc, location);
            }
            ExprKind::Array(elements) => {
                for element in elements.iter().rev() {
                    self.visit_expr(element);
                }
                let count = self.operand(elements.len(), "Too many array elements", location);
                self.emit_op_u16(OpCode::NewArray, count, location);
            }
            ExprKind::Index { target, index } => {
                self.visit_expr(target);
                self.visit_expr(index);
                self.emit_op(OpCode::ALoad, location);
            }
            ExprKind::Function(literal) => self.emit_closure(literal),
        }
    }

    fn operand(&mut self, count: usize, message: &str, location: &Location) -> u16 {
        u16::try_from(count).unwrap_or_else(|_| {
            self.semantic_error(location, message);
            0
        })
    }

    fn visit_literal(&mut self, literal: &LiteralValue, location: &Location) {
        match literal {
            LiteralValue::Number(n) => {
                let index = self.add_constant(Value::Number(*n), location);
                self.emit_op_u16(OpCode::Constant, index, location);
            }
            LiteralValue::Str(s) => {
                let index = self.add_constant(Value::string(s), location);
                self.emit_op_u16(OpCode::Constant, index, location);
            }
            LiteralValue::Boolean(true) => self.emit_op(OpCode::True, location),
            LiteralValue::Boolean(false) => self.emit_op(OpCode::False, location),
            LiteralValue::Null => self.emit_op(OpCode::Null, location),
        }
    }

    /// Conditions feed a jump directly, so logical operators skip the `to_bool` normalisation
    /// and nested short-circuit jumps can chain.
    fn visit_condition(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), left, right } => {
                self.visit_logical(*op, left, right, &expr.location)
            }
            _ => self.visit_expr(expr),
        }
    }

    fn visit_logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr, location: &Location) {
        let (short_circuits, skips_left, jump) = match op {
            BinaryOp::Or => (left.to_boolean_is_true(), left.to_boolean_is_false(), OpCode::JmpTrue),
            _ => (left.to_boolean_is_false(), left.to_boolean_is_true(), OpCode::JmpFalse),
        };
        if short_circuits {
            self.visit_condition(left);
            return;
        }
        if skips_left {
            self.visit_condition(right);
            return;
        }
        self.visit_condition(left);
        let label = self.emit_jump(jump, location);
        self.visit_condition(right);
        self.patch_jump(label, location);
    }

    fn visit_assignment(&mut self, target: &Expr, value: &Expr, location: &Location) {
        match &target.kind {
            ExprKind::Identifier(name) => {
                self.visit_expr(value);
                let resolution = match self.resolve(name) {
                    Resolution::Undefined => self.auto_declare(name, location),
                    found => found,
                };
                self.emit_store(resolution, location);
            }
            ExprKind::Index { target: container, index } => {
                self.visit_expr(value);
                self.visit_expr(container);
                self.visit_expr(index);
                self.emit_op(OpCode::AStore, location);
            }
            _ => {
                self.semantic_error(location, "Left hand side of assignment invalid");
                self.visit_expr(value);
            }
        }
    }

    /// An assignment to an unknown name declares it in the innermost scope of the current function.
    fn auto_declare(&mut self, name: &str, location: &Location) -> Resolution {
        match self.define(name, location) {
            Some(slot) if self.is_top_level() => Resolution::TopLevel(slot),
            Some(slot) => Resolution::Local(slot),
            None => Resolution::Undefined,
        }
    }

    /// `++x` / `x++` and their decrement forms. Prefix leaves the new value, postfix the old one.
    fn visit_step(&mut self, step: OpCode, operand: &Expr, postfix: bool, location: &Location) {
        match &operand.kind {
            ExprKind::Identifier(name) => {
                let resolution = self.resolve(name);
                if resolution == Resolution::Undefined {
                    self.semantic_error(location, format!("Identifier not defined '{}'", name));
                }
                self.emit_load(resolution, location);
                if postfix {
                    self.emit_op(OpCode::Dup, location);
                }
                self.emit_op(step, location);
                self.emit_store(resolution, location);
                if postfix {
                    self.emit_op(OpCode::Pop, location);
                }
            }
            ExprKind::Index { target, index } => {
                self.visit_expr(target);
                self.visit_expr(index);
                self.emit_op(OpCode::ALoad, location);
                if postfix {
                    self.emit_op(OpCode::Dup, location);
                }
                self.emit_op(step, location);
                self.visit_expr(target);
                self.visit_expr(index);
                self.emit_op(OpCode::AStore, location);
                if postfix {
                    self.emit_op(OpCode::Pop, location);
                }
            }
            _ => {
                self.semantic_error(location, "Left hand side of assignment invalid");
                self.visit_expr(operand);
            }
        }
    }
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Exp => OpCode::Exp,
        BinaryOp::Equal => OpCode::Eq,
        BinaryOp::NotEqual => OpCode::Neq,
        BinaryOp::Less => OpCode::Lt,
        BinaryOp::LessEqual => OpCode::Lte,
        BinaryOp::Greater => OpCode::Gt,
        BinaryOp::GreaterEqual => OpCode::Gte,
        // Logical operators are lowered to jumps before reaching here.
        BinaryOp::And | BinaryOp::Or => OpCode::Nop,
    }
}
