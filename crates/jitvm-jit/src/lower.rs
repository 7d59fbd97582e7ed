//! Bytecode → IR lowering: decode, build a CFG, then translate each
//! block's instructions 1:1 into IR, using the CFG's terminator shape to
//! pick the IR terminator.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::analysis::{self, BlockId, CfgTerminator, ControlFlowGraph, DecodedInstr};
use crate::bytecode::opcode::Opcode;
use crate::bytecode::BytecodeFunction;
use crate::error::{JitError, JitResult};
use crate::ir::instr::CallTarget;
use crate::ir::{CmpOp, JitBlockId, JitFunction, JitInstr, JitType, LocalSlot, Reg};

/// A bytecode stack value lowered to an IR register, tracked so binary
/// operators can pop their operands the way the interpreter's stack
/// discipline would.
type Stack = Vec<Reg>;

/// Lowers a bytecode function to IR. Returns `Unsupported` if any opcode
/// it contains is outside the compilable subset (see `Opcode::is_supported`).
pub fn lower(bc: &BytecodeFunction) -> JitResult<JitFunction> {
    let instrs = analysis::decode_function(&bc.code)?;
    analysis::can_compile(&instrs)?;
    let cfg = analysis::build_cfg(&instrs);

    let mut func = JitFunction::new(0, bc.name.clone(), bc.arity, bc.local_count);
    // The CFG's block 0 already matches `func`'s pre-allocated entry block;
    // allocate the rest up front so branch targets can be resolved as we go.
    let mut block_map: FxHashMap<BlockId, JitBlockId> = FxHashMap::default();
    block_map.insert(cfg.entry, func.entry);
    for idx in 1..cfg.block_count() {
        let cfg_id = BlockId(idx as u32);
        let ir_id = func.add_block();
        block_map.insert(cfg_id, ir_id);
    }

    // Per-block entry stack: straight-line lowering only, so every block
    // other than the entry starts with an empty operand stack (bytecode
    // functions in the supported subset never carry values live across a
    // branch on the value stack; locals carry everything else).
    for idx in 0..cfg.block_count() {
        let cfg_id = BlockId(idx as u32);
        let ir_id = block_map[&cfg_id];
        lower_block(bc, &instrs, &cfg, cfg_id, &mut func, ir_id, &block_map)?;
    }

    func.recompute_predecessors();
    Ok(func)
}

fn lower_block(
    bc: &BytecodeFunction,
    instrs: &[DecodedInstr],
    cfg: &ControlFlowGraph,
    cfg_id: BlockId,
    func: &mut JitFunction,
    ir_id: JitBlockId,
    block_map: &FxHashMap<BlockId, JitBlockId>,
) -> JitResult<()> {
    let cfg_block = cfg.block(cfg_id);
    let mut stack: Stack = Vec::new();

    for &instr_idx in &cfg_block.instrs {
        let instr = &instrs[instr_idx];
        lower_instr(bc, instr, func, ir_id, &mut stack)?;
    }

    let terminator = match cfg_block.terminator {
        CfgTerminator::Return => {
            let value = stack.pop();
            JitInstr::Return { value }
        }
        CfgTerminator::Jump(target) => JitInstr::Jump {
            target: block_map[&target],
        },
        CfgTerminator::Fallthrough(target) => JitInstr::Jump {
            target: block_map[&target],
        },
        CfgTerminator::Branch {
            then_block,
            else_block,
            ..
        } => {
            let cond = stack.pop().ok_or_else(|| JitError::Decode {
                offset: cfg_block.start_offset,
                reason: "conditional branch with empty operand stack".to_string(),
            })?;
            JitInstr::Branch {
                cond,
                then_block: block_map[&then_block],
                else_block: block_map[&else_block],
            }
        }
        CfgTerminator::None => {
            // Implicit fall-off-the-end: treat as a void return so the
            // emitter always has a terminator to work with.
            JitInstr::Return { value: None }
        }
    };
    func.block_mut(ir_id).instrs.push(terminator);
    Ok(())
}

fn lower_instr(
    bc: &BytecodeFunction,
    instr: &DecodedInstr,
    func: &mut JitFunction,
    ir_id: JitBlockId,
    stack: &mut Stack,
) -> JitResult<()> {
    use analysis::decoder::Operands;

    macro_rules! emit {
        ($e:expr) => {
            func.block_mut(ir_id).instrs.push($e)
        };
    }
    macro_rules! binop {
        ($ctor:ident) => {{
            let rhs = pop(stack, instr.offset)?;
            let lhs = pop(stack, instr.offset)?;
            let dest = func.alloc_reg(JitType::Int);
            emit!(JitInstr::$ctor { dest, lhs, rhs });
            stack.push(dest);
        }};
    }
    macro_rules! cmp {
        ($op:expr) => {{
            let rhs = pop(stack, instr.offset)?;
            let lhs = pop(stack, instr.offset)?;
            let dest = func.alloc_reg(JitType::Bool);
            emit!(JitInstr::ICmp {
                dest,
                op: $op,
                lhs,
                rhs
            });
            stack.push(dest);
        }};
    }

    match instr.opcode {
        Opcode::Nop => {}
        Opcode::Pop => {
            pop(stack, instr.offset)?;
        }
        Opcode::Dup => {
            let top = *stack.last().ok_or_else(|| stack_underflow(instr.offset))?;
            stack.push(top);
        }
        Opcode::PushConst => {
            let Operands::U16(index) = instr.operands else {
                unreachable!()
            };
            let value = bc.constant(index).ok_or_else(|| JitError::Decode {
                offset: instr.offset,
                reason: format!("constant pool index {index} out of range"),
            })?;
            let dest = if value.is_float() {
                let f = value.as_float().unwrap();
                let d = func.alloc_reg(JitType::Float);
                emit!(JitInstr::ConstFloat { dest: d, value: f });
                d
            } else if value.is_bool() {
                let b = value.as_bool().unwrap();
                let d = func.alloc_reg(JitType::Bool);
                emit!(JitInstr::ConstBool { dest: d, value: b });
                d
            } else {
                let n = value.as_int().unwrap_or(0);
                let d = func.alloc_reg(JitType::Int);
                emit!(JitInstr::ConstInt { dest: d, value: n });
                d
            };
            stack.push(dest);
        }
        Opcode::PushNull => {
            let dest = func.alloc_reg(JitType::Value);
            emit!(JitInstr::ConstInt { dest, value: 0 });
            stack.push(dest);
        }
        Opcode::PushTrue => {
            let dest = func.alloc_reg(JitType::Bool);
            emit!(JitInstr::ConstBool { dest, value: true });
            stack.push(dest);
        }
        Opcode::PushFalse => {
            let dest = func.alloc_reg(JitType::Bool);
            emit!(JitInstr::ConstBool { dest, value: false });
            stack.push(dest);
        }
        Opcode::LoadLocal => {
            let Operands::U16(slot) = instr.operands else {
                unreachable!()
            };
            let dest = func.alloc_reg(JitType::Int);
            emit!(JitInstr::LoadLocal {
                dest,
                slot: LocalSlot(slot),
                ty: JitType::Int
            });
            stack.push(dest);
        }
        Opcode::StoreLocal => {
            let Operands::U16(slot) = instr.operands else {
                unreachable!()
            };
            let src = pop(stack, instr.offset)?;
            emit!(JitInstr::StoreLocal {
                slot: LocalSlot(slot),
                src
            });
        }
        Opcode::Add => binop!(IAdd),
        Opcode::Sub => binop!(ISub),
        Opcode::Mul => binop!(IMul),
        Opcode::Div => binop!(IDiv),
        Opcode::Mod => binop!(IMod),
        Opcode::Neg => {
            let src = pop(stack, instr.offset)?;
            let dest = func.alloc_reg(JitType::Int);
            emit!(JitInstr::INeg { dest, src });
            stack.push(dest);
        }
        Opcode::BitAnd => binop!(IAnd),
        Opcode::BitOr => binop!(IOr),
        Opcode::BitXor => binop!(IXor),
        Opcode::BitNot => {
            let src = pop(stack, instr.offset)?;
            let dest = func.alloc_reg(JitType::Int);
            emit!(JitInstr::INot { dest, src });
            stack.push(dest);
        }
        Opcode::Shl => binop!(IShl),
        Opcode::Shr => binop!(IShr),
        Opcode::Eq => cmp!(CmpOp::Eq),
        Opcode::Ne => cmp!(CmpOp::Ne),
        Opcode::Lt => cmp!(CmpOp::Lt),
        Opcode::Le => cmp!(CmpOp::Le),
        Opcode::Gt => cmp!(CmpOp::Gt),
        Opcode::Ge => cmp!(CmpOp::Ge),
        Opcode::Call => {
            let Operands::Call {
                func_index,
                arg_count,
            } = instr.operands
            else {
                unreachable!()
            };
            let mut args = SmallVec::new();
            for _ in 0..arg_count {
                args.push(pop(stack, instr.offset)?);
            }
            args.reverse();
            let dest = func.alloc_reg(JitType::Value);
            emit!(JitInstr::Call {
                dest: Some(dest),
                target: CallTarget::Direct(func_index),
                args
            });
            stack.push(dest);
        }
        // Terminators are handled by the caller from the CFG's own
        // classification; nothing to lower for the opcode body itself.
        Opcode::Jump
        | Opcode::JumpIfFalse
        | Opcode::JumpIfTrue
        | Opcode::Loop
        | Opcode::Return => {
            if instr.opcode == Opcode::JumpIfFalse || instr.opcode == Opcode::JumpIfTrue {
                // The condition was already pushed by preceding instructions;
                // leave it on the stack for the terminator lowering to pop.
            }
        }
        Opcode::LoadGlobal
        | Opcode::StoreGlobal
        | Opcode::LoadField
        | Opcode::StoreField
        | Opcode::CallMethod
        | Opcode::CallStatic
        | Opcode::MakeClosure
        | Opcode::Try
        | Opcode::Throw
        | Opcode::MapNew => {
            return Err(JitError::Unsupported(format!(
                "opcode {:?} reached lowering despite is_supported() gate",
                instr.opcode
            )));
        }
    }
    Ok(())
}

fn pop(stack: &mut Stack, offset: usize) -> JitResult<Reg> {
    stack.pop().ok_or_else(|| stack_underflow(offset))
}

fn stack_underflow(offset: usize) -> JitError {
    JitError::Decode {
        offset,
        reason: "operand stack underflow".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitvm_abi::Value;

    fn push_const(code: &mut Vec<u8>, idx: u16) {
        code.push(Opcode::PushConst as u8);
        code.extend_from_slice(&idx.to_le_bytes());
    }

    #[test]
    fn constant_return_lowers_to_const_and_return() {
        let mut code = Vec::new();
        push_const(&mut code, 0);
        code.push(Opcode::Return as u8);
        let bc = BytecodeFunction::new("const_return", 0, 0, code)
            .with_constants(vec![Value::int(42)]);

        let func = lower(&bc).unwrap();
        let result = crate::ir::interp::run(&func, &[]).unwrap();
        assert!(matches!(
            result,
            Some(crate::ir::interp::InterpValue::Int(42))
        ));
    }

    #[test]
    fn integer_addition_of_arguments() {
        let mut code = Vec::new();
        code.push(Opcode::LoadLocal as u8);
        code.extend_from_slice(&0u16.to_le_bytes());
        code.push(Opcode::LoadLocal as u8);
        code.extend_from_slice(&1u16.to_le_bytes());
        code.push(Opcode::Add as u8);
        code.push(Opcode::Return as u8);
        let bc = BytecodeFunction::new("add", 2, 2, code);

        let func = lower(&bc).unwrap();
        let result = crate::ir::interp::run(&func, &[10, 20]).unwrap();
        assert!(matches!(
            result,
            Some(crate::ir::interp::InterpValue::Int(30))
        ));
        let result = crate::ir::interp::run(&func, &[-5, 5]).unwrap();
        assert!(matches!(
            result,
            Some(crate::ir::interp::InterpValue::Int(0))
        ));
    }

    #[test]
    fn unsupported_opcode_is_rejected() {
        let mut code = Vec::new();
        code.push(Opcode::CallMethod as u8);
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(0);
        let bc = BytecodeFunction::new("uses_method_call", 0, 0, code);
        assert!(matches!(lower(&bc), Err(JitError::Unsupported(_))));
    }
}
