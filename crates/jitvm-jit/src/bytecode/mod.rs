//! Bytecode shapes consumed from the interpreter: opcodes, functions, and
//! modules. This module encodes the *contract*, not the interpreter
//! itself, which remains an external collaborator.

pub mod module;
pub mod opcode;

pub use module::{BytecodeFunction, Module};
pub use opcode::Opcode;
