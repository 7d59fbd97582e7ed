//! The IR model: values, instructions, basic blocks, functions, and a
//! builder to construct them. A reference interpreter lives alongside it
//! for testing optimizer safety.

pub mod builder;
pub mod instr;
pub mod interp;
pub mod types;

pub use builder::JitBuilder;
pub use instr::{CallTarget, CmpOp, JitBlock, JitBlockId, JitFunction, JitInstr, LocalSlot, Reg};
pub use types::JitType;
