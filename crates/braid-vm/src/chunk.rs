//! Bytecode chunks: a flat instruction stream, a parallel line table for
//! error reporting, and a constants pool.

use crate::value::Value;

macro_rules! opcode_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($variant = $value),+
        }

        impl $name {
            #[must_use]
            pub const fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl From<$name> for u8 {
            fn from(op: $name) -> u8 {
                op as u8
            }
        }
    };
}

opcode_enum! {
    /// Every instruction the VM can dispatch on.
    pub enum OpCode {
        Constant = 0,
        Nil = 1,
        True = 2,
        False = 3,
        Pop = 4,
        GetLocal = 5,
        SetLocal = 6,
        GetGlobal = 7,
        DefineGlobal = 8,
        SetGlobal = 9,
        GetUpvalue = 10,
        SetUpvalue = 11,
        Equal = 12,
        Greater = 13,
        Less = 14,
        Add = 15,
        Subtract = 16,
        Multiply = 17,
        Divide = 18,
        Negate = 19,
        Not = 20,
        Print = 21,
        Jump = 22,
        JumpIfFalse = 23,
        Loop = 24,
        Call = 25,
        Closure = 26,
        CloseUpvalue = 27,
        Class = 28,
        Return = 29,
    }
}

/// Largest constant-pool index a single-byte `OP_CONSTANT` operand can
/// address.
pub const MAX_CONSTANTS: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("too many constants in one chunk")]
    ConstantPoolFull,
    #[error("jump target out of range")]
    JumpTooFar,
}

#[derive(Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write_byte(op.into(), line);
    }

    /// Appends `value` to the constants pool, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::ConstantPoolFull`] once the pool would exceed
    /// [`MAX_CONSTANTS`] entries, the limit a single-byte `OP_CONSTANT`
    /// operand can address.
    pub fn add_constant(&mut self, value: Value) -> Result<u8, ChunkError> {
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(ChunkError::ConstantPoolFull);
        }
        self.constants.push(value);
        Ok(u8::try_from(self.constants.len() - 1).expect("checked above"))
    }

    #[must_use]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.code.len()
            + self.lines.len() * std::mem::size_of::<u32>()
            + self.constants.len() * std::mem::size_of::<Value>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_pool_overflows_past_256() {
        let mut chunk = Chunk::new();
        for _ in 0..MAX_CONSTANTS {
            chunk.add_constant(Value::Nil).unwrap();
        }
        assert_eq!(chunk.add_constant(Value::Nil), Err(ChunkError::ConstantPoolFull));
    }

    #[test]
    fn opcode_round_trips_through_byte() {
        for op in [OpCode::Constant, OpCode::Return, OpCode::CloseUpvalue, OpCode::Class] {
            let byte: u8 = op.into();
            assert_eq!(OpCode::from_byte(byte), Some(op));
        }
    }
}
