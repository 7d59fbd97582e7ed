//! A fluent builder over [`JitFunction`], used by the lowering stage and
//! by tests that hand-construct IR.

use smallvec::SmallVec;

use super::instr::{CallTarget, CmpOp, JitBlockId, JitFunction, JitInstr, LocalSlot, Reg};
use super::types::JitType;

pub struct JitBuilder<'a> {
    func: &'a mut JitFunction,
    current: JitBlockId,
}

impl<'a> JitBuilder<'a> {
    pub fn new(func: &'a mut JitFunction) -> Self {
        let current = func.entry;
        Self { func, current }
    }

    pub fn switch_to_block(&mut self, block: JitBlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> JitBlockId {
        self.current
    }

    pub fn create_block(&mut self) -> JitBlockId {
        self.func.add_block()
    }

    fn emit(&mut self, instr: JitInstr) {
        self.func.block_mut(self.current).instrs.push(instr);
    }

    pub fn const_int(&mut self, value: i64) -> Reg {
        let dest = self.func.alloc_reg(JitType::Int);
        self.emit(JitInstr::ConstInt { dest, value });
        dest
    }

    pub fn const_float(&mut self, value: f64) -> Reg {
        let dest = self.func.alloc_reg(JitType::Float);
        self.emit(JitInstr::ConstFloat { dest, value });
        dest
    }

    pub fn const_bool(&mut self, value: bool) -> Reg {
        let dest = self.func.alloc_reg(JitType::Bool);
        self.emit(JitInstr::ConstBool { dest, value });
        dest
    }

    pub fn load_local(&mut self, slot: LocalSlot, ty: JitType) -> Reg {
        let dest = self.func.alloc_reg(ty);
        self.emit(JitInstr::LoadLocal { dest, slot, ty });
        dest
    }

    pub fn store_local(&mut self, slot: LocalSlot, src: Reg) {
        self.emit(JitInstr::StoreLocal { slot, src });
    }

    pub fn iadd(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(JitType::Int);
        self.emit(JitInstr::IAdd { dest, lhs, rhs });
        dest
    }

    pub fn isub(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(JitType::Int);
        self.emit(JitInstr::ISub { dest, lhs, rhs });
        dest
    }

    pub fn imul(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(JitType::Int);
        self.emit(JitInstr::IMul { dest, lhs, rhs });
        dest
    }

    pub fn icmp(&mut self, op: CmpOp, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(JitType::Bool);
        self.emit(JitInstr::ICmp { dest, op, lhs, rhs });
        dest
    }

    pub fn call_direct(&mut self, func_index: u32, args: &[Reg], has_result: bool) -> Option<Reg> {
        let dest = has_result.then(|| self.func.alloc_reg(JitType::Value));
        self.emit(JitInstr::Call {
            dest,
            target: CallTarget::Direct(func_index),
            args: SmallVec::from_slice(args),
        });
        dest
    }

    pub fn call_helper(&mut self, name: &'static str, args: &[Reg]) -> Reg {
        let dest = self.func.alloc_reg(JitType::Value);
        self.emit(JitInstr::Call {
            dest: Some(dest),
            target: CallTarget::Helper(name),
            args: SmallVec::from_slice(args),
        });
        dest
    }

    pub fn jump(&mut self, target: JitBlockId) {
        self.emit(JitInstr::Jump { target });
    }

    pub fn loop_jump(&mut self, target: JitBlockId) {
        self.emit(JitInstr::LoopJump { target });
    }

    pub fn branch(&mut self, cond: Reg, then_block: JitBlockId, else_block: JitBlockId) {
        self.emit(JitInstr::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<Reg>) {
        self.emit(JitInstr::Return { value });
    }
}
