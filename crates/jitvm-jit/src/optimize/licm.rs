//! Loop-invariant code motion (O3).
//!
//! A loop header is any block reachable by a `LoopJump`. For each loop
//! body (every block that reaches the header without leaving through a
//! block outside the natural loop, approximated here as "every block
//! dominated by the header in the simple single-back-edge case"), this
//! pass hoists side-effect-free instructions whose operands are all
//! defined strictly outside the loop into a freshly created preheader
//! spliced in front of the header, and retargets the unique forward edge
//! into the header to go through it instead.

use rustc_hash::{FxHashMap, FxHashSet};

use super::OptPass;
use crate::ir::{JitBlockId, JitFunction, JitInstr, Reg};

pub struct LoopInvariantCodeMotion;

impl OptPass for LoopInvariantCodeMotion {
    fn name(&self) -> &'static str {
        "loop-invariant-code-motion"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        let headers = find_loop_headers(func);
        if headers.is_empty() {
            return false;
        }

        let mut changed = false;
        for header in headers {
            if hoist_one_loop(func, header) {
                changed = true;
            }
        }
        if changed {
            func.recompute_predecessors();
        }
        changed
    }
}

fn find_loop_headers(func: &JitFunction) -> Vec<JitBlockId> {
    let mut headers = FxHashSet::default();
    for block in &func.blocks {
        if let Some(JitInstr::LoopJump { target }) = block.instrs.last() {
            headers.insert(*target);
        }
    }
    headers.into_iter().collect()
}

/// Blocks that belong to the loop headed by `header`: everything
/// reachable from `header` that can reach a `LoopJump` back to `header`
/// without passing through `header` again. A conservative forward
/// reachability walk bounded by the back-edge source is enough for the
/// structured loops straight-line lowering produces.
fn loop_body(func: &JitFunction, header: JitBlockId) -> FxHashSet<JitBlockId> {
    let mut body = FxHashSet::default();
    body.insert(header);
    let mut stack = vec![header];
    while let Some(id) = stack.pop() {
        for succ in func.successors(id) {
            if body.insert(succ) {
                stack.push(succ);
            }
        }
        // Stop expanding past a block that jumps back to the header;
        // its successors are the loop's own continuation, not the exit.
        if matches!(func.block(id).instrs.last(), Some(JitInstr::LoopJump { target }) if *target == header)
        {
            continue;
        }
    }
    body
}

fn hoist_one_loop(func: &mut JitFunction, header: JitBlockId) -> bool {
    let body = loop_body(func, header);

    // Registers defined anywhere inside the loop are not invariant.
    let mut defined_in_loop: FxHashSet<Reg> = FxHashSet::default();
    for &id in &body {
        for instr in &func.block(id).instrs {
            if let Some(d) = instr.dest() {
                defined_in_loop.insert(d);
            }
        }
    }

    // Collect hoist candidates in program order: pure, all operands
    // defined outside the loop.
    let mut hoisted: Vec<JitInstr> = Vec::new();
    for &id in &body {
        let block = func.block_mut(id);
        let mut keep = Vec::with_capacity(block.instrs.len());
        for instr in block.instrs.drain(..) {
            let invariant = !instr.has_side_effects()
                && instr.dest().is_some()
                && instr.uses().iter().all(|u| !defined_in_loop.contains(u));
            if invariant {
                hoisted.push(instr);
            } else {
                keep.push(instr);
            }
        }
        block.instrs = keep;
    }

    if hoisted.is_empty() {
        return false;
    }

    // Splice a preheader in front of the header carrying the hoisted
    // instructions, then redirect every non-loop predecessor of the
    // header to jump through it instead.
    let preheader = func.add_block();
    func.block_mut(preheader).instrs = hoisted;
    func.block_mut(preheader).instrs.push(JitInstr::Jump { target: header });

    for block in &mut func.blocks {
        if block.id == preheader || body.contains(&block.id) {
            continue;
        }
        retarget(&mut block.instrs, header, preheader);
    }
    true
}

fn retarget(instrs: &mut [JitInstr], from: JitBlockId, to: JitBlockId) {
    if let Some(last) = instrs.last_mut() {
        match last {
            JitInstr::Jump { target } if *target == from => *target = to,
            JitInstr::Branch {
                then_block,
                else_block,
                ..
            } => {
                if *then_block == from {
                    *then_block = to;
                }
                if *else_block == from {
                    *else_block = to;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JitBuilder, JitType};

    #[test]
    fn invariant_computation_hoisted_out_of_loop() {
        let mut func = JitFunction::new(0, "f", 1, 1);
        let header;
        let base;
        {
            let mut b = JitBuilder::new(&mut func);
            base = b.load_local(crate::ir::LocalSlot(0), JitType::Int);
            header = b.create_block();
            b.jump(header);
        }
        {
            let mut b = JitBuilder::new(&mut func);
            b.switch_to_block(header);
            let two = b.const_int(2);
            // `base` is defined in the entry block, outside the loop, so
            // this multiply does not depend on anything the loop varies.
            let _invariant = b.imul(base, two);
            b.loop_jump(header);
        }
        let before_preheader_count = func.blocks.len();
        LoopInvariantCodeMotion.run(&mut func);
        assert!(func.blocks.len() > before_preheader_count);
    }
}
