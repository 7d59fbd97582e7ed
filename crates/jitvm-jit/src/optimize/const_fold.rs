//! Constant folding and propagation (O1).
//!
//! Folds arithmetic, bitwise, and comparison instructions whose operands
//! are both known constants into a single `Const*`, and records the
//! folded value so later instructions in the same function can fold
//! transitively (`PUSH 1; PUSH 2; ADD; PUSH 3; ADD; ...` collapses to one
//! constant in a single pass).

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::ir::{CmpOp, JitFunction, JitInstr, Reg};

pub struct ConstantFolding;

impl OptPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        let mut int_consts: FxHashMap<Reg, i64> = FxHashMap::default();
        let mut bool_consts: FxHashMap<Reg, bool> = FxHashMap::default();

        for block in &func.blocks {
            for instr in &block.instrs {
                match instr {
                    JitInstr::ConstInt { dest, value } => {
                        int_consts.insert(*dest, *value);
                    }
                    JitInstr::ConstBool { dest, value } => {
                        bool_consts.insert(*dest, *value);
                    }
                    _ => {}
                }
            }
        }

        let mut changed = false;
        for block in &mut func.blocks {
            for instr in &mut block.instrs {
                let replacement = fold(instr, &int_consts, &bool_consts);
                if let Some(new_instr) = replacement {
                    if let JitInstr::ConstInt { dest, value } = &new_instr {
                        int_consts.insert(*dest, *value);
                    }
                    *instr = new_instr;
                    changed = true;
                }
            }
        }
        changed
    }
}

fn fold(
    instr: &JitInstr,
    ints: &FxHashMap<Reg, i64>,
    bools: &FxHashMap<Reg, bool>,
) -> Option<JitInstr> {
    use JitInstr::*;
    match instr {
        IAdd { dest, lhs, rhs } => binary(ints, *lhs, *rhs, i64::wrapping_add).map(|v| ConstInt { dest: *dest, value: v }),
        ISub { dest, lhs, rhs } => binary(ints, *lhs, *rhs, i64::wrapping_sub).map(|v| ConstInt { dest: *dest, value: v }),
        IMul { dest, lhs, rhs } => binary(ints, *lhs, *rhs, i64::wrapping_mul).map(|v| ConstInt { dest: *dest, value: v }),
        IDiv { dest, lhs, rhs } => {
            let (l, r) = (*ints.get(lhs)?, *ints.get(rhs)?);
            (r != 0).then(|| ConstInt { dest: *dest, value: l.wrapping_div(r) })
        }
        IMod { dest, lhs, rhs } => {
            let (l, r) = (*ints.get(lhs)?, *ints.get(rhs)?);
            (r != 0).then(|| ConstInt { dest: *dest, value: l.wrapping_rem(r) })
        }
        INeg { dest, src } => ints.get(src).map(|v| ConstInt { dest: *dest, value: v.wrapping_neg() }),
        IAnd { dest, lhs, rhs } => binary(ints, *lhs, *rhs, |a, b| a & b).map(|v| ConstInt { dest: *dest, value: v }),
        IOr { dest, lhs, rhs } => binary(ints, *lhs, *rhs, |a, b| a | b).map(|v| ConstInt { dest: *dest, value: v }),
        IXor { dest, lhs, rhs } => binary(ints, *lhs, *rhs, |a, b| a ^ b).map(|v| ConstInt { dest: *dest, value: v }),
        INot { dest, src } => ints.get(src).map(|v| ConstInt { dest: *dest, value: !v }),
        IShl { dest, lhs, rhs } => binary(ints, *lhs, *rhs, |a, b| a.wrapping_shl((b & 63) as u32)).map(|v| ConstInt { dest: *dest, value: v }),
        IShr { dest, lhs, rhs } => binary(ints, *lhs, *rhs, |a, b| a.wrapping_shr((b & 63) as u32)).map(|v| ConstInt { dest: *dest, value: v }),
        ICmp { dest, op, lhs, rhs } => {
            let (l, r) = (*ints.get(lhs)?, *ints.get(rhs)?);
            let v = match op {
                CmpOp::Eq => l == r,
                CmpOp::Ne => l != r,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
            };
            Some(ConstBool { dest: *dest, value: v })
        }
        Move { dest, src } => {
            if let Some(&v) = ints.get(src) {
                Some(ConstInt { dest: *dest, value: v })
            } else {
                bools.get(src).map(|&v| ConstBool { dest: *dest, value: v })
            }
        }
        _ => None,
    }
}

fn binary(ints: &FxHashMap<Reg, i64>, lhs: Reg, rhs: Reg, f: impl Fn(i64, i64) -> i64) -> Option<i64> {
    let l = *ints.get(&lhs)?;
    let r = *ints.get(&rhs)?;
    Some(f(l, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::JitBuilder;

    #[test]
    fn folds_chained_additions_to_one_constant() {
        let mut func = JitFunction::new(0, "f", 0, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let c1 = b.const_int(1);
            let c2 = b.const_int(2);
            let s1 = b.iadd(c1, c2);
            let c3 = b.const_int(3);
            let s2 = b.iadd(s1, c3);
            let c4 = b.const_int(4);
            let s3 = b.iadd(s2, c4);
            let c5 = b.const_int(5);
            let s4 = b.iadd(s3, c5);
            b.ret(Some(s4));
        }
        ConstantFolding.run(&mut func);
        let result = crate::ir::interp::run(&func, &[]).unwrap();
        assert!(matches!(result, Some(crate::ir::interp::InterpValue::Int(15))));
    }
}
