//! A reference tree-walking interpreter over the IR, used only to verify
//! optimization safety (`interp_ir(P(F), A) == interp_ir(F, A)`) and to
//! give the end-to-end scenario tests something to check emitted code
//! against. Never used on the hot compilation path.

use rustc_hash::FxHashMap;

use super::instr::{CmpOp, JitBlockId, JitFunction, JitInstr, Reg};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterpValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl InterpValue {
    fn as_i64(self) -> i64 {
        match self {
            InterpValue::Int(v) => v,
            InterpValue::Bool(b) => b as i64,
            InterpValue::Float(f) => f.to_bits() as i64,
        }
    }

    fn truthy(self) -> bool {
        match self {
            InterpValue::Int(v) => v != 0,
            InterpValue::Bool(b) => b,
            InterpValue::Float(f) => f != 0.0,
        }
    }
}

#[derive(Debug)]
pub enum InterpError {
    UnresolvedRegister(Reg),
    UnsupportedCall,
    DivisionByZero,
}

/// Runs `func` with the given local-slot argument values (slot `i` holds
/// `args[i]` on entry) and returns the value passed to `Return`, if any.
pub fn run(func: &JitFunction, args: &[i64]) -> Result<Option<InterpValue>, InterpError> {
    let mut regs: FxHashMap<Reg, InterpValue> = FxHashMap::default();
    let mut locals: Vec<i64> = vec![0; func.local_count as usize];
    for (i, &a) in args.iter().enumerate() {
        if i < locals.len() {
            locals[i] = a;
        }
    }

    let mut block_id = func.entry;
    let mut prev_block: Option<JitBlockId> = None;

    loop {
        let block = func.block(block_id);
        let mut next: Option<JitBlockId> = None;
        let mut result: Option<Option<InterpValue>> = None;

        for instr in &block.instrs {
            match instr {
                JitInstr::Nop => {}
                JitInstr::ConstInt { dest, value } => {
                    regs.insert(*dest, InterpValue::Int(*value));
                }
                JitInstr::ConstFloat { dest, value } => {
                    regs.insert(*dest, InterpValue::Float(*value));
                }
                JitInstr::ConstBool { dest, value } => {
                    regs.insert(*dest, InterpValue::Bool(*value));
                }
                JitInstr::IAdd { dest, lhs, rhs } => {
                    let v = get(&regs, *lhs)?.as_i64().wrapping_add(get(&regs, *rhs)?.as_i64());
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::ISub { dest, lhs, rhs } => {
                    let v = get(&regs, *lhs)?.as_i64().wrapping_sub(get(&regs, *rhs)?.as_i64());
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IMul { dest, lhs, rhs } => {
                    let v = get(&regs, *lhs)?.as_i64().wrapping_mul(get(&regs, *rhs)?.as_i64());
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IDiv { dest, lhs, rhs } => {
                    let rhs_v = get(&regs, *rhs)?.as_i64();
                    if rhs_v == 0 {
                        return Err(InterpError::DivisionByZero);
                    }
                    let v = get(&regs, *lhs)?.as_i64().wrapping_div(rhs_v);
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IMod { dest, lhs, rhs } => {
                    let rhs_v = get(&regs, *rhs)?.as_i64();
                    if rhs_v == 0 {
                        return Err(InterpError::DivisionByZero);
                    }
                    let v = get(&regs, *lhs)?.as_i64().wrapping_rem(rhs_v);
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::INeg { dest, src } => {
                    let v = get(&regs, *src)?.as_i64().wrapping_neg();
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IAnd { dest, lhs, rhs } => {
                    let v = get(&regs, *lhs)?.as_i64() & get(&regs, *rhs)?.as_i64();
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IOr { dest, lhs, rhs } => {
                    let v = get(&regs, *lhs)?.as_i64() | get(&regs, *rhs)?.as_i64();
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IXor { dest, lhs, rhs } => {
                    let v = get(&regs, *lhs)?.as_i64() ^ get(&regs, *rhs)?.as_i64();
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::INot { dest, src } => {
                    let v = !get(&regs, *src)?.as_i64();
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IShl { dest, lhs, rhs } => {
                    let shift = (get(&regs, *rhs)?.as_i64() & 63) as u32;
                    let v = get(&regs, *lhs)?.as_i64().wrapping_shl(shift);
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::IShr { dest, lhs, rhs } => {
                    let shift = (get(&regs, *rhs)?.as_i64() & 63) as u32;
                    let v = get(&regs, *lhs)?.as_i64().wrapping_shr(shift);
                    regs.insert(*dest, InterpValue::Int(v));
                }
                JitInstr::ICmp { dest, op, lhs, rhs } => {
                    let a = get(&regs, *lhs)?.as_i64();
                    let b = get(&regs, *rhs)?.as_i64();
                    let v = match op {
                        CmpOp::Eq => a == b,
                        CmpOp::Ne => a != b,
                        CmpOp::Lt => a < b,
                        CmpOp::Le => a <= b,
                        CmpOp::Gt => a > b,
                        CmpOp::Ge => a >= b,
                    };
                    regs.insert(*dest, InterpValue::Bool(v));
                }
                JitInstr::LoadLocal { dest, slot, .. } => {
                    regs.insert(*dest, InterpValue::Int(locals[slot.0 as usize]));
                }
                JitInstr::StoreLocal { slot, src } => {
                    locals[slot.0 as usize] = get(&regs, *src)?.as_i64();
                }
                JitInstr::Move { dest, src } => {
                    regs.insert(*dest, get(&regs, *src)?);
                }
                JitInstr::Phi { dest, incoming } => {
                    let from = prev_block.expect("Phi reached without a predecessor");
                    let (_, src) = incoming
                        .iter()
                        .find(|(b, _)| *b == from)
                        .expect("Phi has no entry for the block we came from");
                    regs.insert(*dest, get(&regs, *src)?);
                }
                JitInstr::TypeHint { .. } => {}
                JitInstr::Call { .. } => return Err(InterpError::UnsupportedCall),
                JitInstr::Return { value } => {
                    result = Some(match value {
                        Some(r) => Some(get(&regs, *r)?),
                        None => None,
                    });
                }
                JitInstr::Jump { target } | JitInstr::LoopJump { target } => {
                    next = Some(*target);
                }
                JitInstr::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    next = Some(if get(&regs, *cond)?.truthy() {
                        *then_block
                    } else {
                        *else_block
                    });
                }
            }
        }

        if let Some(r) = result {
            return Ok(r);
        }
        match next {
            Some(target) => {
                prev_block = Some(block_id);
                block_id = target;
            }
            None => return Ok(None),
        }
    }
}

fn get(regs: &FxHashMap<Reg, InterpValue>, reg: Reg) -> Result<InterpValue, InterpError> {
    regs.get(&reg).copied().ok_or(InterpError::UnresolvedRegister(reg))
}
