//! Bytecode analysis: decoding and control-flow graph construction.

pub mod cfg;
pub mod decoder;

pub use cfg::{BlockId, CfgBlock, CfgTerminator, ControlFlowGraph};
pub use decoder::{can_compile, decode_function, DecodedInstr};
