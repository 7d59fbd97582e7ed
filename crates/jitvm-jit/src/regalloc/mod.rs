//! Linear-scan register allocation over the IR's flat per-block
//! instruction order.
//!
//! Liveness is computed per block only — a block boundary is treated as
//! a kill point for every virtual register live across it, so the
//! allocator never has to reconcile live ranges that span branches. This
//! keeps the pass a single linear walk per block at the cost of
//! reloading values at block entry that a whole-function liveness
//! analysis could have kept resident; the emitter pays that cost back in
//! simplicity (no cross-block register classes to reconcile when
//! patching jump targets).

use rustc_hash::FxHashMap;

use crate::ir::{JitFunction, Reg};

/// Size of a spill slot holding a plain machine word (`Int`/`Float`/`Bool`).
pub const SCALAR_SLOT_SIZE: u32 = 8;

/// Size of a spill slot holding a boxed `Value` record (tag/num/ptr).
pub const VALUE_SLOT_SIZE: u32 = 24;

/// One physical integer general-purpose register, named by its x86-64
/// role. The allocator treats this set as its whole universe; RSP/RBP
/// are reserved by the emitter for the frame and never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PReg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
}

/// The allocator's working register file, in allocation-preference
/// order. `Rax` is reserved as the accumulator for instruction results
/// and is allocated last, matching the emitter's expectation that
/// arithmetic results land there.
const GP_REGS: [PReg; 10] = [
    PReg::Rbx,
    PReg::Rcx,
    PReg::Rdx,
    PReg::Rsi,
    PReg::Rdi,
    PReg::R8,
    PReg::R9,
    PReg::R10,
    PReg::R11,
    PReg::Rax,
];

/// A stack slot for a spilled virtual register, stacked above the
/// local-variable area. A concrete scalar (`Int`/`Float`/`Bool`) takes
/// one 8-byte word; a boxed `Value` takes a 24-byte record, since its
/// tag/num/ptr fields don't fit in a single physical register or word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterAllocation {
    pub allocated: FxHashMap<Reg, PReg>,
    pub spilled: FxHashMap<Reg, StackSlot>,
    pub stack_size: u32,
}

/// Allocates physical registers (or stack slots, on exhaustion) for
/// every virtual register in `func`.
pub fn allocate(func: &JitFunction) -> RegisterAllocation {
    let mut result = RegisterAllocation::default();
    let mut next_slot_offset: u32 = 0;

    for block in &func.blocks {
        let live_ranges = compute_live_ranges(block);
        let mut free: Vec<PReg> = GP_REGS.iter().rev().copied().collect();
        // active: registers currently assigned, sorted by end point so
        // the soonest-to-expire is scanned first.
        let mut active: Vec<(Reg, usize, PReg)> = Vec::new();

        let mut starts: Vec<(Reg, usize, usize)> = live_ranges
            .into_iter()
            .map(|(r, (start, end))| (r, start, end))
            .collect();
        starts.sort_by_key(|&(_, start, _)| start);

        for (vreg, start, end) in starts {
            if result.allocated.contains_key(&vreg) || result.spilled.contains_key(&vreg) {
                continue;
            }

            active.retain(|&(active_reg, active_end, preg)| {
                if active_end < start {
                    free.push(preg);
                    let _ = active_reg;
                    false
                } else {
                    true
                }
            });

            // A boxed `Value` never fits in one physical register, so it
            // always takes a wide spill slot instead of competing for `free`.
            if !func.reg_type(vreg).is_concrete() {
                result.spilled.insert(
                    vreg,
                    StackSlot {
                        offset: next_slot_offset,
                        size: VALUE_SLOT_SIZE,
                    },
                );
                next_slot_offset += VALUE_SLOT_SIZE;
                continue;
            }

            if let Some(preg) = free.pop() {
                result.allocated.insert(vreg, preg);
                active.push((vreg, end, preg));
                active.sort_by_key(|&(_, e, _)| e);
            } else {
                result.spilled.insert(
                    vreg,
                    StackSlot {
                        offset: next_slot_offset,
                        size: SCALAR_SLOT_SIZE,
                    },
                );
                next_slot_offset += SCALAR_SLOT_SIZE;
            }
        }
    }

    result.stack_size = next_slot_offset;
    result
}

/// For each register defined or used in `block`, the `[start, end]`
/// instruction-index range of its liveness within that block. A
/// register with no use past its definition has `start == end`.
fn compute_live_ranges(block: &crate::ir::JitBlock) -> FxHashMap<Reg, (usize, usize)> {
    let mut ranges: FxHashMap<Reg, (usize, usize)> = FxHashMap::default();
    for (idx, instr) in block.instrs.iter().enumerate() {
        if let Some(dest) = instr.dest() {
            ranges.entry(dest).or_insert((idx, idx));
        }
        for used in instr.uses() {
            ranges
                .entry(used)
                .and_modify(|(_, end)| *end = idx)
                .or_insert((idx, idx));
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JitBuilder, JitFunction, JitType, LocalSlot};

    #[test]
    fn non_overlapping_values_reuse_the_same_register() {
        let mut func = JitFunction::new(0, "f", 0, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let a = b.const_int(1);
            let _a_use = b.iadd(a, a);
            let c = b.const_int(2);
            let _c_use = b.iadd(c, c);
            b.ret(None);
        }
        let alloc = allocate(&func);
        assert!(alloc.spilled.is_empty());
        assert_eq!(alloc.allocated.len(), func.blocks[0].instrs.len() - 1);
    }

    #[test]
    fn exhausting_physical_registers_spills() {
        let mut func = JitFunction::new(0, "f", 0, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let mut regs = Vec::new();
            for i in 0..20 {
                regs.push(b.const_int(i));
            }
            let mut acc = regs[0];
            for &r in &regs[1..] {
                acc = b.iadd(acc, r);
            }
            b.ret(Some(acc));
        }
        let alloc = allocate(&func);
        assert!(!alloc.spilled.is_empty());
        assert!(alloc.stack_size > 0);
    }

    #[test]
    fn unused_parameter_register_not_allocated() {
        let mut func = JitFunction::new(0, "f", 1, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let _unused = b.load_local(LocalSlot(0), JitType::Int);
            b.ret(None);
        }
        let alloc = allocate(&func);
        assert_eq!(alloc.allocated.len(), 1);
    }

    #[test]
    fn value_typed_register_always_gets_a_wide_spill_slot() {
        let mut func = JitFunction::new(0, "f", 1, 0);
        let v;
        {
            let mut b = JitBuilder::new(&mut func);
            v = b.load_local(LocalSlot(0), JitType::Value);
            let r = b.call_helper("IsTruthy", &[v]);
            b.ret(Some(r));
        }
        let alloc = allocate(&func);
        assert!(!alloc.allocated.contains_key(&v));
        let slot = alloc.spilled[&v];
        assert_eq!(slot.size, VALUE_SLOT_SIZE);
    }
}
