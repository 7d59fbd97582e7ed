//! Branch folding (O2): collapses a `Branch` whose condition is a known
//! constant into an unconditional `Jump`, and collapses a `Jump` whose
//! target block is itself nothing but another `Jump` ("jump chaining").
//! `recompute_predecessors` is called whenever a terminator changes so
//! later passes see accurate predecessor lists.

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::ir::{JitBlockId, JitFunction, JitInstr, Reg};

pub struct BranchFolding;

impl OptPass for BranchFolding {
    fn name(&self) -> &'static str {
        "branch-folding"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        let mut bool_consts: FxHashMap<Reg, bool> = FxHashMap::default();
        for block in &func.blocks {
            for instr in &block.instrs {
                if let JitInstr::ConstBool { dest, value } = instr {
                    bool_consts.insert(*dest, *value);
                }
            }
        }

        // A block whose only instruction is an unconditional jump is a
        // pass-through; following chains of these collapses redundant
        // control flow left behind by earlier passes or straight-line
        // lowering of structured control flow.
        let passthrough: FxHashMap<JitBlockId, JitBlockId> = func
            .blocks
            .iter()
            .filter_map(|b| match b.instrs.as_slice() {
                [JitInstr::Jump { target }] => Some((b.id, *target)),
                _ => None,
            })
            .collect();

        let resolve = |mut target: JitBlockId| {
            let mut hops = 0;
            while let Some(&next) = passthrough.get(&target) {
                if next == target || hops > func.blocks.len() {
                    break;
                }
                target = next;
                hops += 1;
            }
            target
        };

        let mut changed = false;
        for block in &mut func.blocks {
            if let Some(last) = block.instrs.last_mut() {
                match last {
                    JitInstr::Branch {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        if let Some(&cond_val) = bool_consts.get(cond) {
                            let target = if cond_val { *then_block } else { *else_block };
                            *last = JitInstr::Jump { target: resolve(target) };
                            changed = true;
                        } else {
                            let resolved_then = resolve(*then_block);
                            let resolved_else = resolve(*else_block);
                            if resolved_then != *then_block || resolved_else != *else_block {
                                *then_block = resolved_then;
                                *else_block = resolved_else;
                                changed = true;
                            }
                        }
                    }
                    JitInstr::Jump { target } => {
                        let resolved = resolve(*target);
                        if resolved != *target {
                            *target = resolved;
                            changed = true;
                        }
                    }
                    _ => {}
                }
            }
        }
        if changed {
            func.recompute_predecessors();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::JitBuilder;

    #[test]
    fn constant_condition_collapses_to_jump() {
        let mut func = JitFunction::new(0, "f", 0, 0);
        let then_blk;
        let else_blk;
        {
            let mut b = JitBuilder::new(&mut func);
            then_blk = b.create_block();
            else_blk = b.create_block();
            let cond = b.const_bool(true);
            b.branch(cond, then_blk, else_blk);
        }
        {
            let mut b = JitBuilder::new(&mut func);
            b.switch_to_block(then_blk);
            let v = b.const_int(1);
            b.ret(Some(v));
        }
        {
            let mut b = JitBuilder::new(&mut func);
            b.switch_to_block(else_blk);
            let v = b.const_int(2);
            b.ret(Some(v));
        }
        BranchFolding.run(&mut func);
        assert!(matches!(
            func.blocks[0].instrs.last().unwrap(),
            JitInstr::Jump { target } if *target == then_blk
        ));
    }
}
