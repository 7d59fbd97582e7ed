//! Bounds-check elimination (O3).
//!
//! `ArrayGet`/`ArraySet` are helper calls, not first-class IR ops, so
//! there is no dedicated bounds-check instruction to delete. Instead,
//! this pass recognizes the narrow case spec'd as "provably safe": a
//! constant index into an array whose length was already queried via
//! `ArrayLen` on the same register earlier in the block, where the
//! queried length is itself a known constant greater than the index.
//! When both facts hold, the call target is rewritten to an unchecked
//! helper variant the runtime registers alongside the checked ones.

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::ir::{CallTarget, JitFunction, JitInstr, Reg};

pub struct BoundsCheckElimination;

impl OptPass for BoundsCheckElimination {
    fn name(&self) -> &'static str {
        "bounds-check-elimination"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        let mut int_consts: FxHashMap<Reg, i64> = FxHashMap::default();
        for block in &func.blocks {
            for instr in &block.instrs {
                if let JitInstr::ConstInt { dest, value } = instr {
                    int_consts.insert(*dest, *value);
                }
            }
        }

        let mut changed = false;
        for block in &mut func.blocks {
            // array register -> known constant length, reset at any call
            // that could have mutated the array (e.g. a push/resize helper).
            let mut known_len: FxHashMap<Reg, i64> = FxHashMap::default();
            for instr in &mut block.instrs {
                if let JitInstr::Call { dest, target, args } = instr {
                    match target {
                        CallTarget::Helper("ArrayLen") => {
                            if let (Some(d), Some(&arr)) = (*dest, args.first()) {
                                if let Some(&len) = int_consts.get(&d) {
                                    known_len.insert(arr, len);
                                }
                            }
                            continue;
                        }
                        CallTarget::Helper("ArrayGet") | CallTarget::Helper("ArraySet") => {
                            if let Some(&arr) = args.first() {
                                if let Some(&idx_reg) = args.get(1) {
                                    if let (Some(&len), Some(&idx)) =
                                        (known_len.get(&arr), int_consts.get(&idx_reg))
                                    {
                                        if idx >= 0 && idx < len {
                                            let unchecked = match target {
                                                CallTarget::Helper("ArrayGet") => "ArrayGet_Unchecked",
                                                _ => "ArraySet_Unchecked",
                                            };
                                            *target = CallTarget::Helper(unchecked);
                                            changed = true;
                                        }
                                    }
                                }
                            }
                            continue;
                        }
                        _ => {}
                    }
                    known_len.clear();
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JitBuilder, JitFunction};

    #[test]
    fn constant_in_bounds_index_drops_check() {
        // Hand-built instead of via JitBuilder since ArrayLen normally
        // returns a runtime Value register, and this test needs to
        // fabricate the post-folding shape where that result is already
        // known to be the constant 4.
        let mut func = JitFunction::new(0, "f", 1, 0);
        let ty = crate::ir::types::JitType::Value;
        let arr = func.alloc_reg(ty);
        let len_const = func.alloc_reg(crate::ir::types::JitType::Int);
        let idx = func.alloc_reg(crate::ir::types::JitType::Int);
        let get_dest = func.alloc_reg(ty);
        func.blocks[0].instrs.push(JitInstr::LoadLocal {
            dest: arr,
            slot: crate::ir::LocalSlot(0),
            ty,
        });
        func.blocks[0]
            .instrs
            .push(JitInstr::ConstInt { dest: len_const, value: 4 });
        func.blocks[0]
            .instrs
            .push(JitInstr::Call {
                dest: Some(len_const),
                target: CallTarget::Helper("ArrayLen"),
                args: smallvec::smallvec![arr],
            });
        func.blocks[0]
            .instrs
            .push(JitInstr::ConstInt { dest: idx, value: 1 });
        func.blocks[0].instrs.push(JitInstr::Call {
            dest: Some(get_dest),
            target: CallTarget::Helper("ArrayGet"),
            args: smallvec::smallvec![arr, idx],
        });
        BoundsCheckElimination.run(&mut func);
        let rewritten = func.blocks[0].instrs.iter().any(|i| {
            matches!(
                i,
                JitInstr::Call {
                    target: CallTarget::Helper("ArrayGet_Unchecked"),
                    ..
                }
            )
        });
        assert!(rewritten);
    }
}
