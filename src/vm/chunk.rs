// src/vm/chunk.rs

use std::fmt::Write as _;

use crate::error::Location;
use crate::memory::Value;
use crate::vm::opcode::OpCode;

/// The operand offset of a forward jump whose target is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

impl Label {
    pub fn offset(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChunkError {
    #[error("Jump target {0} does not fit in a 16-bit operand.")]
    JumpTooFar(usize),
}

/// A function's bytecode. `locations` runs parallel to `code`, one source position per byte.
#[derive(Debug, Default, Clone)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub locations: Vec<Location>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn write(&mut self, byte: u8, location: &Location) {
        self.code.push(byte);
        self.locations.push(location.clone());
    }

    pub fn write_opcode(&mut self, op: OpCode, location: &Location) {
        self.write(op as u8, location);
    }

    /// Operands are little-endian.
    pub fn write_u16(&mut self, value: u16, location: &Location) {
        let [lo, hi] = value.to_le_bytes();
        self.write(lo, location);
        self.write(hi, location);
    }

    /// Writes a jump with a placeholder operand to be filled by `patch_jump`.
    pub fn write_jump(&mut self, op: OpCode, location: &Location) -> Label {
        self.write_opcode(op, location);
        let label = Label(self.code.len());
        self.write_u16(u16::MAX, location);
        label
    }

    /// Points the jump at `label` to the current end of the code.
    pub fn patch_jump(&mut self, label: Label) -> Result<(), ChunkError> {
        let target = self.code.len();
        self.patch_jump_to(label, target)
    }

    pub fn patch_jump_to(&mut self, label: Label, target: usize) -> Result<(), ChunkError> {
        let operand = u16::try_from(target).map_err(|_| ChunkError::JumpTooFar(target))?;
        let [lo, hi] = operand.to_le_bytes();
        self.code[label.0] = lo;
        self.code[label.0 + 1] = hi;
        Ok(())
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let lo = *self.code.get(offset)?;
        let hi = *self.code.get(offset + 1)?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    /// Location of the byte at `offset`, falling back to the last known position.
    pub fn location_at(&self, offset: usize) -> Location {
        self.locations
            .get(offset)
            .or_else(|| self.locations.last())
            .cloned()
            .unwrap_or_default()
    }

    // --- Disassembly ---

    /// Renders the instruction at `offset` and returns it with the offset of the next one.
    pub fn disassemble_instruction(&self, offset: usize, constants: &[Value]) -> (String, usize) {
        let mut out = format!("{:04} ", offset);
        let line = self.locations.get(offset).map(|l| l.line).unwrap_or(0);
        if offset > 0 && self.locations.get(offset - 1).map(|l| l.line) == Some(line) {
            out.push_str("   | ");
        } else {
            let _ = write!(out, "{:4} ", line);
        }

        let byte = self.code[offset];
        let Some(op) = OpCode::from_byte(byte) else {
            let _ = write!(out, "<unknown 0x{:02x}>", byte);
            return (out, offset + 1);
        };
        out.push_str(op.mnemonic());

        if op.operand_count() == 0 {
            return (out, offset + 1);
        }
        match self.read_u16(offset + 1) {
            Some(operand) => {
                let _ = write!(out, " {}", operand);
                if matches!(op, OpCode::Constant | OpCode::Closure) {
                    if let Some(value) = constants.get(operand as usize) {
                        let _ = write!(out, " ({})", value);
                    }
                }
            }
            None => out.push_str(" <truncated>"),
        }
        (out, offset + 3)
    }

    pub fn disassemble(&self, constants: &[Value]) -> String {
        let mut out = String::new();
        let mut offset = 0;
        while offset < self.code.len() {
            let (line, next) = self.disassemble_instruction(offset, constants);
            out.push_str(&line);
            out.push('\n');
            offset = next;
        }
        out
    }
}
