// src/vm/opcode.rs

// Each entry: variant, disassembly mnemonic, operand count (every operand is a u16).
macro_rules! define_opcodes {
    ($( $(#[$doc:meta])* $variant:ident = $mnemonic:literal, $operands:literal; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $( $(#[$doc])* $variant, )*
        }

        impl OpCode {
            const ALL: &'static [OpCode] = &[ $( OpCode::$variant, )* ];

            /// Decodes a byte, rejecting values outside the instruction set.
            pub fn from_byte(byte: u8) -> Option<OpCode> {
                Self::ALL.get(byte as usize).copied()
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $( OpCode::$variant => $mnemonic, )*
                }
            }

            pub fn operand_count(self) -> usize {
                match self {
                    $( OpCode::$variant => $operands, )*
                }
            }
        }
    };
}

define_opcodes! {
    /// Does nothing.
    Nop = "nop", 0;
    /// Discards the top of the stack.
    Pop = "pop", 0;
    /// Pushes a copy of the top of the stack.
    Dup = "dup", 0;

    // --- Arithmetic (pop right, pop left, push result) ---
    Add = "add", 0;
    Sub = "sub", 0;
    Mul = "mul", 0;
    Div = "div", 0;
    Mod = "mod", 0;
    Exp = "exp", 0;
    Neg = "neg", 0;
    /// Adds one to the top of the stack.
    Incr = "incr", 0;
    Decr = "decr", 0;

    // --- Comparison ---
    Eq = "eq", 0;
    Neq = "neq", 0;
    Lt = "lt", 0;
    Lte = "lte", 0;
    Gt = "gt", 0;
    Gte = "gte", 0;
    Not = "not", 0;
    /// Replaces the top of the stack with its truthiness as a Boolean.
    ToBool = "to_bool", 0;

    // --- Jumps (absolute code offsets) ---
    Jmp = "jmp", 1;
    /// Jumps if the top of the stack is truthy. The value stays when jumping and is popped otherwise.
    JmpTrue = "jmp_true", 1;
    /// Jumps if the top of the stack is falsy. The value stays when jumping and is popped otherwise.
    JmpFalse = "jmp_false", 1;

    // --- Literals ---
    /// Pushes an entry from the enclosing function's constant pool.
    Constant = "constant", 1;
    True = "true", 0;
    False = "false", 0;
    Null = "null", 0;
    /// Pops N values and pushes an array keyed 0..N; the first value popped gets key 0.
    NewArray = "new_array", 1;

    // --- Variables ---
    GLoad = "gload", 1;
    /// Stores the top of the stack into a global without popping it.
    GStore = "gstore", 1;
    Load = "load", 1;
    Store = "store", 1;
    /// Reads through the current closure's upvalue N.
    CLoad = "cload", 1;
    CStore = "cstore", 1;
    /// Pops index then target, pushes `target[index]`.
    ALoad = "aload", 0;
    /// Pops index then target and writes the value left on top of the stack.
    AStore = "astore", 0;

    // --- Calls ---
    /// Pops the callee, then N arguments, and invokes the callee.
    CallTos = "call_tos", 1;
    /// Builds a closure from the function constant N, capturing per its descriptors.
    Closure = "closure", 1;
    /// Pops the return value, closes this frame's upvalues and returns to the caller.
    Ret = "ret", 0;
    Print = "print", 0;
    /// Stops execution successfully.
    Halt = "halt", 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte_round_trips_every_opcode() {
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_byte(*op as u8), Some(*op));
        }
    }

    #[test]
    fn test_from_byte_rejects_unknown() {
        assert_eq!(OpCode::from_byte(0xff), None);
        assert_eq!(OpCode::from_byte(OpCode::ALL.len() as u8), None);
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(OpCode::Jmp.operand_count(), 1);
        assert_eq!(OpCode::CallTos.operand_count(), 1);
        assert_eq!(OpCode::Add.operand_count(), 0);
        assert_eq!(OpCode::AStore.operand_count(), 0);
        assert_eq!(OpCode::JmpFalse.mnemonic(), "jmp_false");
    }
}
