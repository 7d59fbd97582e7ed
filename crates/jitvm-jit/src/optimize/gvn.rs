//! Global value numbering (O3).
//!
//! Generalizes block-local common-subexpression elimination across the
//! whole function: each pure instruction is assigned a congruence-class
//! number derived from its operation and the *numbers* of its operands
//! (not their raw register ids), so equivalent computations reachable
//! through different blocks collapse even when CSE's single-block scope
//! misses them. Walks blocks in id order, which is a valid reverse
//! postorder for the straight-line and structured-loop shapes lowering
//! produces (every block's id is assigned no later than its
//! predecessors' in program order).

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::ir::{CmpOp, JitFunction, JitInstr, Reg};

pub struct GlobalValueNumbering;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueNumber {
    Const(i64),
    ConstBool(bool),
    Binary(&'static str, u32, u32),
    Unary(&'static str, u32),
    Cmp(CmpOp, u32, u32),
}

impl OptPass for GlobalValueNumbering {
    fn name(&self) -> &'static str {
        "global-value-numbering"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        let mut reg_number: FxHashMap<Reg, u32> = FxHashMap::default();
        let mut class_leader: FxHashMap<ValueNumber, Reg> = FxHashMap::default();
        let mut next_number: u32 = 0;
        let mut changed = false;

        for block in &mut func.blocks {
            for instr in &mut block.instrs {
                let Some(vn) = number_of(instr, &reg_number) else {
                    continue;
                };
                let Some(dest) = instr.dest() else { continue };

                if let Some(&leader) = class_leader.get(&vn) {
                    let leader_num = reg_number[&leader];
                    reg_number.insert(dest, leader_num);
                    *instr = JitInstr::Move { dest, src: leader };
                    changed = true;
                } else {
                    let num = next_number;
                    next_number += 1;
                    reg_number.insert(dest, num);
                    class_leader.insert(vn, dest);
                }
            }
        }
        changed
    }
}

fn number_of(instr: &JitInstr, numbers: &FxHashMap<Reg, u32>) -> Option<ValueNumber> {
    use JitInstr::*;
    let num = |r: Reg| numbers.get(&r).copied();
    Some(match *instr {
        ConstInt { value, .. } => ValueNumber::Const(value),
        ConstBool { value, .. } => ValueNumber::ConstBool(value),
        IAdd { lhs, rhs, .. } => commutative("add", num(lhs)?, num(rhs)?),
        IMul { lhs, rhs, .. } => commutative("mul", num(lhs)?, num(rhs)?),
        IAnd { lhs, rhs, .. } => commutative("and", num(lhs)?, num(rhs)?),
        IOr { lhs, rhs, .. } => commutative("or", num(lhs)?, num(rhs)?),
        IXor { lhs, rhs, .. } => commutative("xor", num(lhs)?, num(rhs)?),
        ISub { lhs, rhs, .. } => ValueNumber::Binary("sub", num(lhs)?, num(rhs)?),
        IDiv { lhs, rhs, .. } => ValueNumber::Binary("div", num(lhs)?, num(rhs)?),
        IMod { lhs, rhs, .. } => ValueNumber::Binary("mod", num(lhs)?, num(rhs)?),
        IShl { lhs, rhs, .. } => ValueNumber::Binary("shl", num(lhs)?, num(rhs)?),
        IShr { lhs, rhs, .. } => ValueNumber::Binary("shr", num(lhs)?, num(rhs)?),
        INeg { src, .. } => ValueNumber::Unary("neg", num(src)?),
        INot { src, .. } => ValueNumber::Unary("not", num(src)?),
        ICmp { op, lhs, rhs, .. } => {
            let (a, b) = (num(lhs)?, num(rhs)?);
            if op == op.swapped() {
                ValueNumber::Cmp(op, a.min(b), a.max(b))
            } else {
                ValueNumber::Cmp(op, a, b)
            }
        }
        _ => return None,
    })
}

fn commutative(op: &'static str, a: u32, b: u32) -> ValueNumber {
    ValueNumber::Binary(op, a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JitBuilder, JitFunction, JitType, LocalSlot};

    #[test]
    fn equivalent_computation_in_sibling_blocks_collapses() {
        let mut func = JitFunction::new(0, "f", 1, 0);
        let then_blk;
        let else_blk;
        let p;
        {
            let mut b = JitBuilder::new(&mut func);
            p = b.load_local(LocalSlot(0), JitType::Int);
            then_blk = b.create_block();
            else_blk = b.create_block();
            let cond = b.const_bool(true);
            b.branch(cond, then_blk, else_blk);
        }
        let first_add;
        {
            let mut b = JitBuilder::new(&mut func);
            b.switch_to_block(then_blk);
            let one = b.const_int(1);
            first_add = b.iadd(p, one);
            b.ret(Some(first_add));
        }
        {
            let mut b = JitBuilder::new(&mut func);
            b.switch_to_block(else_blk);
            let one_again = b.const_int(1);
            let second_add = b.iadd(p, one_again);
            b.ret(Some(second_add));
        }
        GlobalValueNumbering.run(&mut func);
        let else_block_instrs = &func.blocks[else_blk.0 as usize].instrs;
        let became_move = else_block_instrs
            .iter()
            .any(|i| matches!(i, JitInstr::Move { .. }));
        assert!(became_move);
        let _ = first_add;
    }
}
