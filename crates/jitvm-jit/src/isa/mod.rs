//! Instruction-set encoders. `x86_64` is the primary target the emitter
//! lowers to; `arm64` provides only the minimal call-bridge surface
//! needed to host the native ABI on that architecture.

pub mod arm64;
pub mod x86_64;

/// General-purpose register names shared by both encoders' public
/// surface; each encoder maps these down to its own register-number
/// encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gpr {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
}

impl Gpr {
    /// The 4-bit register number ModR/M and SIB encode, before the REX.B/R/X
    /// extension bit is folded in.
    pub fn number(self) -> u8 {
        match self {
            Gpr::Rax => 0,
            Gpr::Rcx => 1,
            Gpr::Rdx => 2,
            Gpr::Rbx => 3,
            Gpr::Rsp => 4,
            Gpr::Rbp => 5,
            Gpr::Rsi => 6,
            Gpr::Rdi => 7,
            Gpr::R8 => 8,
            Gpr::R9 => 9,
            Gpr::R10 => 10,
            Gpr::R11 => 11,
        }
    }

    /// Whether this register needs the REX prefix's extension bit set
    /// (registers r8-r15).
    pub fn needs_rex_extension(self) -> bool {
        self.number() >= 8
    }

    /// The low 3 bits used in ModR/M/SIB/opcode-reg fields.
    pub fn low_bits(self) -> u8 {
        self.number() & 0b111
    }
}

/// The six relational operators the comparison instructions and set-cc
/// encoding support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Condition {
    /// The set-cc / jcc condition nibble (Intel SDM Vol 2, Table B-1).
    pub fn cc(self) -> u8 {
        match self {
            Condition::Eq => 0x4,
            Condition::Ne => 0x5,
            Condition::Lt => 0xC,
            Condition::Ge => 0xD,
            Condition::Le => 0xE,
            Condition::Gt => 0xF,
        }
    }
}

/// A code-offset site that needs its displacement filled in once the
/// target's final offset is known — produced by forward jumps/branches
/// during emission, drained by the emitter's second pass.
#[derive(Debug, Clone, Copy)]
pub struct PendingPatch {
    /// Byte offset of the 32-bit displacement field to overwrite.
    pub patch_offset: usize,
    /// Offset immediately after the instruction the displacement is
    /// relative to (`rel32` is measured from the end of the instruction).
    pub instr_end_offset: usize,
}
