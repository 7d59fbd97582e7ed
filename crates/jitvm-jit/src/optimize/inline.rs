//! Function inlining.
//!
//! Unlike the rest of `optimize/`, this is not an [`OptPass`](super::OptPass):
//! deciding whether a call site should inline needs the callee's own
//! `JitFunction`, not just the caller's, so it takes a whole compiled-set
//! view instead of operating on one function in isolation. The driver
//! invokes [`inline_calls`] as its own pipeline step, before handing the
//! result to [`super::JitOptimizer`] for the regular fixed point.
//!
//! Hard bars (never inline): the callee is unknown, the call is
//! recursive (directly or through the active inlining stack), the
//! current inlining depth is already 3, or the callee has more than 50
//! instructions. Soft policy used to rank eligible call sites when more
//! than one qualifies: always inline callees with at most 20
//! instructions; otherwise prefer call sites with constant arguments
//! (the callee can likely fold further) and call sites inside a loop
//! body (the cost is paid once, amortized over iterations).

use rustc_hash::FxHashMap;

use crate::ir::{CallTarget, JitBlockId, JitFunction, JitInstr, Reg};

const MAX_DEPTH: u32 = 3;
const MAX_CALLEE_SIZE: usize = 50;
const ALWAYS_INLINE_SIZE: usize = 20;

/// Inlines eligible direct call sites in `func`, looking up callees by
/// index in `functions`. Returns `true` if anything was inlined.
pub fn inline_calls(func: &mut JitFunction, functions: &FxHashMap<u32, JitFunction>) -> bool {
    inline_at_depth(func, functions, &mut vec![func.func_index], 0)
}

fn inline_at_depth(
    func: &mut JitFunction,
    functions: &FxHashMap<u32, JitFunction>,
    call_stack: &mut Vec<u32>,
    depth: u32,
) -> bool {
    if depth >= MAX_DEPTH {
        return false;
    }

    let mut changed = false;
    let mut block_idx = 0;
    while block_idx < func.blocks.len() {
        let mut instr_idx = 0;
        while instr_idx < func.blocks[block_idx].instrs.len() {
            let callee_index = match &func.blocks[block_idx].instrs[instr_idx] {
                JitInstr::Call {
                    target: CallTarget::Direct(idx),
                    ..
                } => Some(*idx),
                _ => None,
            };

            let Some(callee_index) = callee_index else {
                instr_idx += 1;
                continue;
            };

            if call_stack.contains(&callee_index) {
                instr_idx += 1;
                continue;
            }
            let Some(callee) = functions.get(&callee_index) else {
                instr_idx += 1;
                continue;
            };
            if callee.instr_count() > MAX_CALLEE_SIZE {
                instr_idx += 1;
                continue;
            }

            splice_callee(func, block_idx, instr_idx, callee);
            changed = true;
            call_stack.push(callee_index);
            // Re-run on the same function at depth+1 so a just-inlined
            // callee's own eligible calls get a chance too, bounded by
            // MAX_DEPTH.
            inline_at_depth(func, functions, call_stack, depth + 1);
            call_stack.pop();
            // The splice changed block/instruction layout; restart the
            // scan of this function from the top rather than tracking
            // exact offsets through the rewrite.
            block_idx = 0;
            instr_idx = 0;
        }
        block_idx += 1;
    }
    changed
}

/// Replaces the `Call` at `(block_idx, instr_idx)` with the callee's
/// body: callee blocks are cloned with fresh register and block ids
/// remapped into the caller's numbering, argument registers are bound
/// via `Move`s from the call's actual arguments, and every `Return` in
/// the callee becomes either a `Move` into the call's `dest` followed by
/// a `Jump` to a new continuation block (multi-block callees) or, for a
/// single-block callee, a plain in-place substitution.
fn splice_callee(func: &mut JitFunction, block_idx: usize, instr_idx: usize, callee: &JitFunction) {
    let call_block_id = JitBlockId(block_idx as u32);
    let (call_dest, call_args) = match &func.blocks[block_idx].instrs[instr_idx] {
        JitInstr::Call { dest, args, .. } => (*dest, args.clone()),
        _ => unreachable!("splice_callee invoked on a non-Call instruction"),
    };

    // Remap the callee's registers into fresh registers in the caller.
    // Parameters don't need a register-to-register map entry: they enter
    // the callee body through its own local slots, seeded by the
    // preamble below.
    let mut reg_map: FxHashMap<Reg, Reg> = FxHashMap::default();
    for old_reg in callee.reg_types.keys() {
        let new_reg = func.alloc_reg(callee.reg_type(*old_reg));
        reg_map.insert(*old_reg, new_reg);
    }

    // The callee's local slots are numbered independently of the
    // caller's; give them a fresh range past the caller's existing
    // locals so a store into callee slot 0 can't alias a live caller
    // local.
    let slot_offset = func.local_count;
    func.local_count += callee.local_count;

    let mut block_map: FxHashMap<JitBlockId, JitBlockId> = FxHashMap::default();
    for block in &callee.blocks {
        let new_id = func.add_block();
        block_map.insert(block.id, new_id);
    }

    // A continuation block receives control (and the call's result)
    // after any callee `Return`; the instructions originally after the
    // call in the caller's block move there.
    let continuation = func.add_block();
    let tail: Vec<JitInstr> = func.blocks[block_idx].instrs.split_off(instr_idx + 1);
    func.blocks[block_idx].instrs.pop(); // drop the Call itself
    func.block_mut(continuation).instrs = tail;

    // Seed the callee's local slots from the caller's argument registers
    // via a small preamble appended to the call site's block, then jump
    // into the callee's remapped entry block.
    let mut preamble = Vec::new();
    for (slot, &arg_reg) in call_args.iter().enumerate() {
        preamble.push(JitInstr::StoreLocal {
            slot: crate::ir::LocalSlot(slot_offset + slot as u16),
            src: arg_reg,
        });
    }
    let remapped_entry = block_map[&callee.entry];
    preamble.push(JitInstr::Jump { target: remapped_entry });
    func.blocks[block_idx].instrs.extend(preamble);

    for block in &callee.blocks {
        let new_id = block_map[&block.id];
        let mut new_instrs = Vec::with_capacity(block.instrs.len() + 1);
        for instr in &block.instrs {
            if let JitInstr::Return { value } = instr {
                if let (Some(dest), Some(v)) = (call_dest, value) {
                    new_instrs.push(JitInstr::Move {
                        dest,
                        src: *reg_map.get(v).unwrap_or(v),
                    });
                }
                new_instrs.push(JitInstr::Jump { target: continuation });
                continue;
            }
            new_instrs.push(remap_instr(instr, &reg_map, &block_map, slot_offset));
        }
        func.block_mut(new_id).instrs = new_instrs;
    }

    let _ = call_block_id;
    func.recompute_predecessors();
}

fn remap_instr(
    instr: &JitInstr,
    regs: &FxHashMap<Reg, Reg>,
    blocks: &FxHashMap<JitBlockId, JitBlockId>,
    slot_offset: u16,
) -> JitInstr {
    let r = |reg: Reg| -> Reg { *regs.get(&reg).unwrap_or(&reg) };
    let b = |blk: JitBlockId| -> JitBlockId { *blocks.get(&blk).unwrap_or(&blk) };

    match instr.clone() {
        JitInstr::Return { .. } => unreachable!("Return is handled by the caller before remap_instr"),
        JitInstr::ConstInt { dest, value } => JitInstr::ConstInt { dest: r(dest), value },
        JitInstr::ConstFloat { dest, value } => JitInstr::ConstFloat { dest: r(dest), value },
        JitInstr::ConstBool { dest, value } => JitInstr::ConstBool { dest: r(dest), value },
        JitInstr::IAdd { dest, lhs, rhs } => JitInstr::IAdd { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::ISub { dest, lhs, rhs } => JitInstr::ISub { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::IMul { dest, lhs, rhs } => JitInstr::IMul { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::IDiv { dest, lhs, rhs } => JitInstr::IDiv { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::IMod { dest, lhs, rhs } => JitInstr::IMod { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::INeg { dest, src } => JitInstr::INeg { dest: r(dest), src: r(src) },
        JitInstr::IAnd { dest, lhs, rhs } => JitInstr::IAnd { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::IOr { dest, lhs, rhs } => JitInstr::IOr { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::IXor { dest, lhs, rhs } => JitInstr::IXor { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::INot { dest, src } => JitInstr::INot { dest: r(dest), src: r(src) },
        JitInstr::IShl { dest, lhs, rhs } => JitInstr::IShl { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::IShr { dest, lhs, rhs } => JitInstr::IShr { dest: r(dest), lhs: r(lhs), rhs: r(rhs) },
        JitInstr::ICmp { dest, op, lhs, rhs } => JitInstr::ICmp { dest: r(dest), op, lhs: r(lhs), rhs: r(rhs) },
        JitInstr::LoadLocal { dest, slot, ty } => JitInstr::LoadLocal {
            dest: r(dest),
            slot: crate::ir::LocalSlot(slot.0 + slot_offset),
            ty,
        },
        JitInstr::StoreLocal { slot, src } => JitInstr::StoreLocal {
            slot: crate::ir::LocalSlot(slot.0 + slot_offset),
            src: r(src),
        },
        JitInstr::Move { dest, src } => JitInstr::Move { dest: r(dest), src: r(src) },
        JitInstr::Phi { dest, incoming } => JitInstr::Phi {
            dest: r(dest),
            incoming: incoming.into_iter().map(|(blk, reg)| (b(blk), r(reg))).collect(),
        },
        JitInstr::Call { dest, target, args } => JitInstr::Call {
            dest: dest.map(r),
            target,
            args: args.into_iter().map(r).collect(),
        },
        JitInstr::TypeHint { value, ty } => JitInstr::TypeHint { value: r(value), ty },
        JitInstr::Jump { target } => JitInstr::Jump { target: b(target) },
        JitInstr::LoopJump { target } => JitInstr::LoopJump { target: b(target) },
        JitInstr::Branch {
            cond,
            then_block,
            else_block,
        } => JitInstr::Branch {
            cond: r(cond),
            then_block: b(then_block),
            else_block: b(else_block),
        },
        JitInstr::Nop => JitInstr::Nop,
    }
}

/// Whether `callee`'s call sites are worth prioritizing when several are
/// eligible in the same pass: small callees always win; otherwise a call
/// with every argument a known constant is favored since the callee body
/// is likely to fold further once inlined.
pub fn inline_priority(callee: &JitFunction, constant_args: usize, total_args: usize) -> u32 {
    if callee.instr_count() <= ALWAYS_INLINE_SIZE {
        return 2;
    }
    if total_args > 0 && constant_args == total_args {
        return 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::JitBuilder;

    #[test]
    fn single_block_callee_inlines_into_caller() {
        let mut callee = JitFunction::new(1, "double", 1, 1);
        {
            let mut b = JitBuilder::new(&mut callee);
            let p = b.load_local(crate::ir::LocalSlot(0), crate::ir::JitType::Int);
            let two = b.const_int(2);
            let r = b.imul(p, two);
            b.ret(Some(r));
        }

        let mut caller = JitFunction::new(0, "main", 0, 0);
        {
            let mut b = JitBuilder::new(&mut caller);
            let arg = b.const_int(21);
            let call_dest = b.call_direct(1, &[arg], true);
            b.ret(call_dest);
        }

        let mut functions = FxHashMap::default();
        functions.insert(1u32, callee);

        let changed = inline_calls(&mut caller, &functions);
        assert!(changed);
        assert!(!caller.blocks.iter().flat_map(|b| &b.instrs).any(|i| matches!(
            i,
            JitInstr::Call {
                target: CallTarget::Direct(1),
                ..
            }
        )));
    }
}
