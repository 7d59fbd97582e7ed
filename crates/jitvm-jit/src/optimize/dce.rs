//! Dead-code elimination (O1).
//!
//! An instruction with a `dest` that is never used by a side-effecting
//! instruction, a return, or a branch condition is replaced with `Nop`.
//! Side-effecting instructions (calls, stores, control flow, `TypeHint`)
//! always survive regardless of whether their `dest` is read.

use rustc_hash::FxHashSet;

use super::OptPass;
use crate::ir::{JitFunction, JitInstr, Reg};

pub struct DeadCodeElimination;

impl OptPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        // Fixed point within this single pass invocation: removing one
        // dead instruction can make its own operands' producers dead too.
        let mut changed_overall = false;
        loop {
            let mut used: FxHashSet<Reg> = FxHashSet::default();
            for block in &func.blocks {
                for instr in &block.instrs {
                    if instr.has_side_effects() {
                        for r in instr.uses() {
                            used.insert(r);
                        }
                    }
                }
            }
            // Second fixed point: a live instruction's uses are live too,
            // even if that instruction's own producer isn't side-effecting.
            loop {
                let mut grew = false;
                for block in &func.blocks {
                    for instr in &block.instrs {
                        if let Some(dest) = instr.dest() {
                            if used.contains(&dest) {
                                for r in instr.uses() {
                                    if used.insert(r) {
                                        grew = true;
                                    }
                                }
                            }
                        }
                    }
                }
                if !grew {
                    break;
                }
            }

            let mut changed = false;
            for block in &mut func.blocks {
                for instr in &mut block.instrs {
                    if matches!(instr, JitInstr::Nop) || instr.has_side_effects() {
                        continue;
                    }
                    let dead = match instr.dest() {
                        Some(dest) => !used.contains(&dest),
                        None => false,
                    };
                    if dead {
                        *instr = JitInstr::Nop;
                        changed = true;
                    }
                }
            }
            if changed {
                changed_overall = true;
            } else {
                break;
            }
        }
        changed_overall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::JitBuilder;

    #[test]
    fn removes_unused_constant() {
        let mut func = JitFunction::new(0, "f", 0, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let _unused = b.const_int(99);
            let used = b.const_int(7);
            b.ret(Some(used));
        }
        DeadCodeElimination.run(&mut func);
        let live: Vec<_> = func.blocks[0]
            .instrs
            .iter()
            .filter(|i| !matches!(i, JitInstr::Nop))
            .collect();
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn keeps_store_even_when_dest_unused() {
        let mut func = JitFunction::new(0, "f", 0, 1);
        {
            let mut b = JitBuilder::new(&mut func);
            let c = b.const_int(3);
            b.store_local(crate::ir::LocalSlot(0), c);
            b.ret(None);
        }
        DeadCodeElimination.run(&mut func);
        let live = func.instr_count();
        assert_eq!(live, 3);
    }
}
