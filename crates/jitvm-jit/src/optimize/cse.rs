//! Common-subexpression elimination, scoped to a single block (O2).
//!
//! Walks each block once, keying every pure instruction by its operation
//! and operands, and rewrites a later instruction that recomputes an
//! already-seen key into a `Move` from the first result. Commutative
//! binary ops are keyed with operands sorted by register id so `a+b` and
//! `b+a` collide; non-commutative ops preserve operand order. Loads are
//! keyed on `(slot)` and invalidated by a store to the same slot or any
//! call, since either can change what a later load observes.

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::ir::{JitInstr, Reg};

pub struct CommonSubexpressionElimination;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Binary(&'static str, Reg, Reg),
    Unary(&'static str, Reg),
    Cmp(crate::ir::CmpOp, Reg, Reg),
    Load(u16),
}

impl OptPass for CommonSubexpressionElimination {
    fn name(&self) -> &'static str {
        "common-subexpression-elimination"
    }

    fn run(&self, func: &mut crate::ir::JitFunction) -> bool {
        let mut changed = false;
        for block in &mut func.blocks {
            let mut seen: FxHashMap<Key, Reg> = FxHashMap::default();
            for instr in &mut block.instrs {
                if let JitInstr::StoreLocal { .. } | JitInstr::Call { .. } = instr {
                    seen.retain(|k, _| !matches!(k, Key::Load(_)));
                }
                let Some(key) = key_of(instr) else { continue };
                if let Some(&existing) = seen.get(&key) {
                    if let Some(dest) = instr.dest() {
                        *instr = JitInstr::Move { dest, src: existing };
                        changed = true;
                        continue;
                    }
                }
                if let Some(dest) = instr.dest() {
                    seen.insert(key, dest);
                }
            }
        }
        changed
    }
}

fn key_of(instr: &JitInstr) -> Option<Key> {
    use JitInstr::*;
    Some(match *instr {
        IAdd { lhs, rhs, .. } => Key::Binary("add", min(lhs, rhs), max(lhs, rhs)),
        IMul { lhs, rhs, .. } => Key::Binary("mul", min(lhs, rhs), max(lhs, rhs)),
        IAnd { lhs, rhs, .. } => Key::Binary("and", min(lhs, rhs), max(lhs, rhs)),
        IOr { lhs, rhs, .. } => Key::Binary("or", min(lhs, rhs), max(lhs, rhs)),
        IXor { lhs, rhs, .. } => Key::Binary("xor", min(lhs, rhs), max(lhs, rhs)),
        ISub { lhs, rhs, .. } => Key::Binary("sub", lhs, rhs),
        IDiv { lhs, rhs, .. } => Key::Binary("div", lhs, rhs),
        IMod { lhs, rhs, .. } => Key::Binary("mod", lhs, rhs),
        IShl { lhs, rhs, .. } => Key::Binary("shl", lhs, rhs),
        IShr { lhs, rhs, .. } => Key::Binary("shr", lhs, rhs),
        INeg { src, .. } => Key::Unary("neg", src),
        INot { src, .. } => Key::Unary("not", src),
        ICmp { op, lhs, rhs, .. } => {
            if op == op.swapped() {
                Key::Cmp(op, min(lhs, rhs), max(lhs, rhs))
            } else {
                Key::Cmp(op, lhs, rhs)
            }
        }
        LoadLocal { slot, .. } => Key::Load(slot.0),
        _ => return None,
    })
}

fn min(a: Reg, b: Reg) -> Reg {
    if a.0 <= b.0 {
        a
    } else {
        b
    }
}

fn max(a: Reg, b: Reg) -> Reg {
    if a.0 >= b.0 {
        a
    } else {
        b
    }
}
