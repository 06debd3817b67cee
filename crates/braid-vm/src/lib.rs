//! Bytecode compiler and stack virtual machine for the Braid language.
//!
//! Modules, leaf-first: [`value`] and [`object`] define the runtime value
//! representation and heap object model; [`table`] is the string-keyed hash
//! table both the interner and instance fields are built on; [`gc`] is the
//! tri-color collector; [`chunk`] is the bytecode container; [`compiler`]
//! turns source into a `Chunk`; [`vm`] executes it.

pub mod chunk;
pub mod compiler;
pub mod gc;
pub mod object;
pub mod table;
pub mod value;
pub mod vm;

pub use chunk::{Chunk, OpCode};
pub use compiler::CompileError;
pub use gc::Gc;
pub use value::Value;
pub use vm::{InterpretError, RuntimeError, RuntimeFailure, Vm};
