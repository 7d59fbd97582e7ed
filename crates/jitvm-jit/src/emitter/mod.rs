//! IR-to-machine-code emitter for x86-64.
//!
//! Walks the function's blocks in layout (id) order, translating each
//! `JitInstr` into a short encoded sequence via [`crate::isa::x86_64`].
//! Label resolution is two-phase: a backward jump's target offset is
//! already known and is encoded immediately; a forward jump emits a
//! placeholder and records a [`crate::isa::PendingPatch`], drained once
//! every block's start offset is known.

use rustc_hash::FxHashMap;

use jitvm_abi::ValueTag;

use crate::ir::{CallTarget, CmpOp, JitBlockId, JitFunction, JitInstr, Reg};
use crate::isa::x86_64::X86Encoder;
use crate::isa::{Condition, Gpr, PendingPatch};
use crate::regalloc::{PReg, RegisterAllocation};

/// A call site or absolute-address load whose target isn't known until
/// the compiled code is installed and linked against the function table
/// / helper registry.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub code_offset: usize,
    pub target: RelocationTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelocationTarget {
    Helper(&'static str),
    Function(u32),
}

#[derive(Debug)]
pub struct CompiledCode {
    pub code: Vec<u8>,
    pub entry_offset: usize,
    pub relocations: Vec<Relocation>,
}

/// Local-variable slots are materialized as full 24-byte `Value` records
/// (tag/num/ptr), zeroed on entry — only the `num` word is read/written by
/// the scalar ops below, since the supported bytecode subset only ever
/// carries unboxed integers through locals today.
const LOCAL_SLOT_SIZE: i32 = 24;

/// Byte offset of the `num` field within a 24-byte `Value` record.
const VALUE_NUM_OFFSET: i32 = 8;
/// Byte offset of the `ptr` field within a 24-byte `Value` record.
const VALUE_PTR_OFFSET: i32 = 16;

fn preg_to_gpr(p: PReg) -> Gpr {
    match p {
        PReg::Rax => Gpr::Rax,
        PReg::Rbx => Gpr::Rbx,
        PReg::Rcx => Gpr::Rcx,
        PReg::Rdx => Gpr::Rdx,
        PReg::Rsi => Gpr::Rsi,
        PReg::Rdi => Gpr::Rdi,
        PReg::R8 => Gpr::R8,
        PReg::R9 => Gpr::R9,
        PReg::R10 => Gpr::R10,
        PReg::R11 => Gpr::R11,
    }
}

/// Where a live virtual register's value lives during emission.
enum Location {
    Reg(Gpr),
    /// Offset (negative, from RBP) of a spill slot. For a concrete scalar
    /// this is the single word read/written by `load_into`/`store_from`;
    /// for a boxed `Value` (always spilled, never register-allocated) this
    /// is the start of the 24-byte tag/num/ptr record — see `value_offsets`.
    Stack(i32),
}

struct Emitter<'a> {
    enc: X86Encoder,
    alloc: &'a RegisterAllocation,
    func: &'a JitFunction,
    local_base: i32,
    relocations: Vec<Relocation>,
    block_offsets: FxHashMap<JitBlockId, usize>,
    pending: Vec<(PendingPatch, JitBlockId, PendingKind)>,
}

enum PendingKind {
    Jmp,
    Jcc(Condition),
}

impl<'a> Emitter<'a> {
    fn location(&self, reg: Reg) -> Location {
        if let Some(&p) = self.alloc.allocated.get(&reg) {
            Location::Reg(preg_to_gpr(p))
        } else if let Some(slot) = self.alloc.spilled.get(&reg) {
            Location::Stack(-(self.local_base + slot.offset as i32 + slot.size as i32))
        } else {
            // Unused result (e.g. DCE left the instruction in for its
            // side effect but nothing reads the value): park it in RAX.
            Location::Reg(Gpr::Rax)
        }
    }

    /// The three memory offsets (tag, num, ptr) of a boxed `Value`
    /// register's spill slot. A `Value` is never register-allocated (see
    /// `regalloc::allocate`), so its location is always `Stack`.
    fn value_offsets(&self, reg: Reg) -> (i32, i32, i32) {
        match self.location(reg) {
            Location::Stack(base) => (base, base + VALUE_NUM_OFFSET, base + VALUE_PTR_OFFSET),
            Location::Reg(_) => unreachable!("a Value-typed register is always spilled"),
        }
    }

    /// Materializes `reg`'s value into `scratch`, returning `scratch`.
    fn load_into(&mut self, reg: Reg, scratch: Gpr) -> Gpr {
        match self.location(reg) {
            Location::Reg(g) => {
                if std::mem::discriminant(&g) != std::mem::discriminant(&scratch) {
                    self.enc.mov_reg_reg(scratch, g);
                }
                scratch
            }
            Location::Stack(off) => {
                self.enc.mov_reg_mem(scratch, Gpr::Rbp, off);
                scratch
            }
        }
    }

    fn store_from(&mut self, dest: Reg, src: Gpr) {
        match self.location(dest) {
            Location::Reg(g) => {
                if std::mem::discriminant(&g) != std::mem::discriminant(&src) {
                    self.enc.mov_reg_reg(g, src);
                }
            }
            Location::Stack(off) => {
                self.enc.mov_mem_reg(Gpr::Rbp, off, src);
            }
        }
    }
}

/// Emits `func` into a fresh code buffer using the allocation decisions
/// in `alloc`. `local_count` locals each occupy a 24-byte `Value` slot;
/// spilled virtual registers occupy their own slots (sized per
/// `RegisterAllocation`) below the local-variable area.
pub fn emit(func: &JitFunction, alloc: &RegisterAllocation) -> CompiledCode {
    let locals_size = func.local_count as i32 * LOCAL_SLOT_SIZE;
    let spill_size = alloc.stack_size as i32;
    let frame_size = align16(locals_size + spill_size);

    let mut emitter = Emitter {
        enc: X86Encoder::new(),
        alloc,
        func,
        local_base: locals_size,
        relocations: Vec::new(),
        block_offsets: FxHashMap::default(),
        pending: Vec::new(),
    };

    // Prologue.
    emitter.enc.push_reg(Gpr::Rbp);
    emitter.enc.mov_reg_reg(Gpr::Rbp, Gpr::Rsp);
    if frame_size > 0 {
        emitter.enc.mov_reg_imm32(Gpr::Rax, frame_size);
        emitter.enc.sub_reg_reg(Gpr::Rsp, Gpr::Rax);
    }
    zero_locals(&mut emitter, func.local_count);
    store_incoming_params(&mut emitter, func.param_count);
    let entry_offset = emitter.enc.offset();

    for block in &func.blocks {
        emitter.block_offsets.insert(block.id, emitter.enc.offset());
        for instr in &block.instrs {
            emit_instr(&mut emitter, instr);
        }
    }

    for (patch, target_block, kind) in std::mem::take(&mut emitter.pending) {
        let target_offset = emitter.block_offsets[&target_block];
        match kind {
            PendingKind::Jmp | PendingKind::Jcc(_) => {
                emitter.enc.patch(patch, target_offset);
            }
        }
    }

    CompiledCode {
        code: emitter.enc.code,
        entry_offset,
        relocations: emitter.relocations,
    }
}

fn align16(size: i32) -> i32 {
    (size + 15) & !15
}

fn zero_locals(e: &mut Emitter, local_count: u16) {
    if local_count == 0 {
        return;
    }
    e.enc.xor_reg_reg(Gpr::Rax, Gpr::Rax);
    for slot in 0..local_count {
        let base = local_base_offset(e, slot);
        e.enc.mov_mem_reg(Gpr::Rbp, base, Gpr::Rax);
        e.enc.mov_mem_reg(Gpr::Rbp, base + VALUE_NUM_OFFSET, Gpr::Rax);
        e.enc.mov_mem_reg(Gpr::Rbp, base + VALUE_PTR_OFFSET, Gpr::Rax);
    }
}

/// Start offset (the `tag` word) of local `slot`'s 24-byte record.
fn local_base_offset(e: &Emitter, slot: u16) -> i32 {
    -(e.local_base - slot as i32 * LOCAL_SLOT_SIZE) - LOCAL_SLOT_SIZE
}

/// Offset of local `slot`'s `num` word — the only field the current
/// scalar-only `LoadLocal`/`StoreLocal` lowering reads or writes.
fn local_offset(e: &Emitter, slot: u16) -> i32 {
    local_base_offset(e, slot) + VALUE_NUM_OFFSET
}

/// Writes the incoming C-ABI argument registers into the parameter locals
/// (slots `0..param_count`), run after [`zero_locals`] so the zeroing
/// pass doesn't clobber them. Uses the same register order as
/// [`emit_direct_call`]'s `arg_regs`, so a direct call's argument setup
/// lines up with how the callee reads them back out via `LoadLocal`. Each
/// incoming argument is tagged `Int`, matching the call bridge's plain
/// `i64` arguments.
fn store_incoming_params(e: &mut Emitter, param_count: u8) {
    let arg_regs = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx];
    if param_count > 0 {
        e.enc.mov_reg_imm32(Gpr::Rax, ValueTag::Int as i32);
    }
    for (slot, &reg) in arg_regs.iter().enumerate().take(param_count as usize) {
        let base = local_base_offset(e, slot as u16);
        e.enc.mov_mem_reg(Gpr::Rbp, base, Gpr::Rax);
        e.enc.mov_mem_reg(Gpr::Rbp, base + VALUE_NUM_OFFSET, reg);
    }
}

fn emit_instr(e: &mut Emitter, instr: &JitInstr) {
    use JitInstr::*;
    match instr {
        Nop | TypeHint { .. } => {}
        ConstInt { dest, value } => {
            if e.func.reg_type(*dest).is_concrete() {
                let g = scratch_for(e, *dest);
                if *value >= i32::MIN as i64 && *value <= i32::MAX as i64 {
                    e.enc.mov_reg_imm32(g, *value as i32);
                } else {
                    e.enc.mov_reg_imm64(g, *value);
                }
                e.store_from(*dest, g);
            } else {
                store_value_const(e, *dest, ValueTag::Int, *value);
            }
        }
        ConstBool { dest, value } => {
            if e.func.reg_type(*dest).is_concrete() {
                let g = scratch_for(e, *dest);
                e.enc.mov_reg_imm32(g, *value as i32);
                e.store_from(*dest, g);
            } else {
                store_value_const(e, *dest, ValueTag::Bool, *value as i64);
            }
        }
        ConstFloat { dest, value } => {
            if e.func.reg_type(*dest).is_concrete() {
                let g = scratch_for(e, *dest);
                e.enc.mov_reg_imm64(g, value.to_bits() as i64);
                e.store_from(*dest, g);
            } else {
                store_value_const(e, *dest, ValueTag::Float, value.to_bits() as i64);
            }
        }
        IAdd { dest, lhs, rhs } => binop(e, *dest, *lhs, *rhs, |enc, a, b| enc.add_reg_reg(a, b)),
        ISub { dest, lhs, rhs } => binop(e, *dest, *lhs, *rhs, |enc, a, b| enc.sub_reg_reg(a, b)),
        IAnd { dest, lhs, rhs } => binop(e, *dest, *lhs, *rhs, |enc, a, b| enc.and_reg_reg(a, b)),
        IOr { dest, lhs, rhs } => binop(e, *dest, *lhs, *rhs, |enc, a, b| enc.or_reg_reg(a, b)),
        IXor { dest, lhs, rhs } => binop(e, *dest, *lhs, *rhs, |enc, a, b| enc.xor_reg_reg(a, b)),
        IMul { dest, lhs, rhs } => binop(e, *dest, *lhs, *rhs, |enc, a, b| enc.imul_reg_reg(a, b)),
        IDiv { dest, lhs, rhs } => div_mod(e, *dest, *lhs, *rhs, false),
        IMod { dest, lhs, rhs } => div_mod(e, *dest, *lhs, *rhs, true),
        INeg { dest, src } => unop(e, *dest, *src, |enc, r| enc.neg_reg(r)),
        INot { dest, src } => unop(e, *dest, *src, |enc, r| enc.not_reg(r)),
        IShl { dest, lhs, rhs } => shift(e, *dest, *lhs, *rhs, |enc, r| enc.shl_reg_cl(r)),
        IShr { dest, lhs, rhs } => shift(e, *dest, *lhs, *rhs, |enc, r| enc.shr_reg_cl(r)),
        ICmp { dest, op, lhs, rhs } => {
            let a = e.load_into(*lhs, Gpr::Rax);
            let b = e.load_into(*rhs, Gpr::R11);
            e.enc.cmp_reg_reg(a, b);
            let cond = to_condition(*op);
            e.enc.set_cc(cond, Gpr::Rax);
            e.store_from(*dest, Gpr::Rax);
        }
        LoadLocal { dest, slot, .. } => {
            if e.func.reg_type(*dest).is_concrete() {
                let off = local_offset(e, slot.0);
                let g = scratch_for(e, *dest);
                e.enc.mov_reg_mem(g, Gpr::Rbp, off);
                e.store_from(*dest, g);
            } else {
                let (dest_base, _, _) = e.value_offsets(*dest);
                copy_value_words(e, local_base_offset(e, slot.0), dest_base);
            }
        }
        StoreLocal { slot, src } => {
            if e.func.reg_type(*src).is_concrete() {
                let g = e.load_into(*src, Gpr::Rax);
                let off = local_offset(e, slot.0);
                e.enc.mov_mem_reg(Gpr::Rbp, off, g);
            } else {
                let (src_base, _, _) = e.value_offsets(*src);
                copy_value_words(e, src_base, local_base_offset(e, slot.0));
            }
        }
        Move { dest, src } => {
            if e.func.reg_type(*src).is_concrete() {
                let g = e.load_into(*src, Gpr::Rax);
                e.store_from(*dest, g);
            } else {
                let (src_base, _, _) = e.value_offsets(*src);
                let (dest_base, _, _) = e.value_offsets(*dest);
                copy_value_words(e, src_base, dest_base);
            }
        }
        Phi { .. } => {
            // Structured lowering never emits a live Phi into emitted
            // code; one reaching here means an earlier pass (the
            // inliner's multi-predecessor merge) left it unresolved.
            // Treated as a no-op: the value was already materialized by
            // whichever predecessor branch set it up.
        }
        Call { dest, target, args } => emit_call(e, *dest, target, args),
        Return { value } => {
            if let Some(v) = value {
                if e.func.reg_type(*v).is_concrete() {
                    let g = e.load_into(*v, Gpr::Rax);
                    if !matches!(g, Gpr::Rax) {
                        e.enc.mov_reg_reg(Gpr::Rax, g);
                    }
                } else {
                    let (tag_off, num_off, ptr_off) = e.value_offsets(*v);
                    e.enc.mov_reg_mem(Gpr::Rax, Gpr::Rbp, tag_off);
                    e.enc.mov_reg_mem(Gpr::Rbx, Gpr::Rbp, num_off);
                    e.enc.mov_reg_mem(Gpr::Rcx, Gpr::Rbp, ptr_off);
                }
            }
            e.enc.mov_reg_reg(Gpr::Rsp, Gpr::Rbp);
            e.enc.pop_reg(Gpr::Rbp);
            e.enc.ret();
        }
        Jump { target } | LoopJump { target } => emit_jump(e, *target),
        Branch {
            cond,
            then_block,
            else_block,
        } => {
            let g = e.load_into(*cond, Gpr::Rax);
            e.enc.test_reg_reg(g, g);
            emit_conditional(e, Condition::Ne, *then_block);
            emit_jump(e, *else_block);
        }
    }
}

/// Materializes a `Value`-typed constant as three memory stores (tag,
/// num, ptr) directly into `dest`'s spill slot. `num_bits` carries the
/// payload (an integer, a 0/1 bool, or an `f64`'s bit pattern); `ptr` is
/// always zero since none of `Const{Int,Bool,Float}` produce heap values.
fn store_value_const(e: &mut Emitter, dest: Reg, tag: ValueTag, num_bits: i64) {
    let (tag_off, num_off, ptr_off) = e.value_offsets(dest);
    e.enc.mov_reg_imm32(Gpr::Rax, tag as i32);
    e.enc.mov_mem_reg(Gpr::Rbp, tag_off, Gpr::Rax);
    if num_bits >= i32::MIN as i64 && num_bits <= i32::MAX as i64 {
        e.enc.mov_reg_imm32(Gpr::Rax, num_bits as i32);
    } else {
        e.enc.mov_reg_imm64(Gpr::Rax, num_bits);
    }
    e.enc.mov_mem_reg(Gpr::Rbp, num_off, Gpr::Rax);
    e.enc.xor_reg_reg(Gpr::Rax, Gpr::Rax);
    e.enc.mov_mem_reg(Gpr::Rbp, ptr_off, Gpr::Rax);
}

/// Copies a 24-byte `Value` record word-by-word between two RBP-relative
/// offsets, via RAX. Used wherever a boxed `Value` moves between two
/// memory locations (a local and a spill slot) rather than through a
/// register, since no single register holds the full record.
fn copy_value_words(e: &mut Emitter, src_base: i32, dst_base: i32) {
    for word in [0, VALUE_NUM_OFFSET, VALUE_PTR_OFFSET] {
        e.enc.mov_reg_mem(Gpr::Rax, Gpr::Rbp, src_base + word);
        e.enc.mov_mem_reg(Gpr::Rbp, dst_base + word, Gpr::Rax);
    }
}

fn scratch_for(e: &Emitter, dest: Reg) -> Gpr {
    match e.location(dest) {
        Location::Reg(g) => g,
        Location::Stack(_) => Gpr::Rax,
    }
}

fn binop(e: &mut Emitter, dest: Reg, lhs: Reg, rhs: Reg, f: impl Fn(&mut X86Encoder, Gpr, Gpr)) {
    let a = e.load_into(lhs, Gpr::Rax);
    let b = e.load_into(rhs, Gpr::R11);
    f(&mut e.enc, a, b);
    e.store_from(dest, a);
}

fn unop(e: &mut Emitter, dest: Reg, src: Reg, f: impl Fn(&mut X86Encoder, Gpr)) {
    let a = e.load_into(src, Gpr::Rax);
    f(&mut e.enc, a);
    e.store_from(dest, a);
}

fn shift(e: &mut Emitter, dest: Reg, lhs: Reg, rhs: Reg, f: impl Fn(&mut X86Encoder, Gpr)) {
    let a = e.load_into(lhs, Gpr::Rax);
    let _count = e.load_into(rhs, Gpr::Rcx);
    f(&mut e.enc, a);
    e.store_from(dest, a);
}

fn div_mod(e: &mut Emitter, dest: Reg, lhs: Reg, rhs: Reg, is_mod: bool) {
    let dividend = e.load_into(lhs, Gpr::Rax);
    if !matches!(dividend, Gpr::Rax) {
        e.enc.mov_reg_reg(Gpr::Rax, dividend);
    }
    let divisor = e.load_into(rhs, Gpr::R11);
    e.enc.idiv_reg(divisor);
    let result = if is_mod { Gpr::Rdx } else { Gpr::Rax };
    e.store_from(dest, result);
}

fn to_condition(op: CmpOp) -> Condition {
    match op {
        CmpOp::Eq => Condition::Eq,
        CmpOp::Ne => Condition::Ne,
        CmpOp::Lt => Condition::Lt,
        CmpOp::Le => Condition::Le,
        CmpOp::Gt => Condition::Gt,
        CmpOp::Ge => Condition::Ge,
    }
}

fn emit_jump(e: &mut Emitter, target: JitBlockId) {
    if let Some(&offset) = e.block_offsets.get(&target) {
        e.enc.jmp_known(offset);
    } else {
        let patch = e.enc.jmp_pending();
        e.pending.push((patch, target, PendingKind::Jmp));
    }
}

fn emit_conditional(e: &mut Emitter, cond: Condition, target: JitBlockId) {
    if let Some(&offset) = e.block_offsets.get(&target) {
        e.enc.jcc_known(cond, offset);
    } else {
        let patch = e.enc.jcc_pending(cond);
        e.pending.push((patch, target, PendingKind::Jcc(cond)));
    }
}

/// Caller-saved registers that may hold live values across a helper
/// call; spilled to the stack before the call and restored after, save
/// for the registers holding this call's own arguments and destination.
const CALLER_SAVED: [Gpr; 6] = [Gpr::Rax, Gpr::Rcx, Gpr::Rdx, Gpr::Rsi, Gpr::Rdi, Gpr::R8];

fn emit_call(e: &mut Emitter, dest: Option<Reg>, target: &CallTarget, args: &[Reg]) {
    match target {
        CallTarget::Helper(name) => emit_helper_call(e, dest, name, args),
        CallTarget::Direct(idx) => emit_direct_call(e, dest, *idx, args),
    }
}

/// Stores the 64-bit placeholder-address-then-call sequence shared by
/// direct and helper calls, recording a relocation at the placeholder's
/// offset so the driver can patch in the real address once resolved.
fn emit_call_and_record(e: &mut Emitter, reloc_target: RelocationTarget) {
    let code_offset = e.enc.offset();
    e.enc.mov_reg_imm64(Gpr::Rax, 0);
    e.enc.call_reg(Gpr::Rax);
    e.relocations.push(Relocation {
        code_offset,
        target: reloc_target,
    });
}

/// Stores a call's result into `dest`: a plain `store_from` for a
/// concrete scalar, or the three ABI return registers (tag in RAX, num
/// in RBX, ptr in RCX — the same convention `Return` materializes) for a
/// boxed `Value`.
fn store_call_result(e: &mut Emitter, dest: Reg) {
    if e.func.reg_type(dest).is_concrete() {
        e.store_from(dest, Gpr::Rax);
    } else {
        let (tag_off, num_off, ptr_off) = e.value_offsets(dest);
        e.enc.mov_mem_reg(Gpr::Rbp, tag_off, Gpr::Rax);
        e.enc.mov_mem_reg(Gpr::Rbp, num_off, Gpr::Rbx);
        e.enc.mov_mem_reg(Gpr::Rbp, ptr_off, Gpr::Rcx);
    }
}

/// Direct (bytecode-function-table) call: arguments pass through the
/// same four C-ABI registers the prologue's `store_incoming_params` reads
/// them back out of.
fn emit_direct_call(e: &mut Emitter, dest: Option<Reg>, idx: u32, args: &[Reg]) {
    // Direct calls in this ABI are capped at four arguments, matching the
    // call bridge's arity ceiling, so four argument registers are always
    // enough.
    let arg_regs = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx];
    let live_args = args.len().min(arg_regs.len());

    // Any other caller-saved register may hold a virtual register whose
    // live range still spans past this call; the callee is free to
    // clobber all of them. An argument register's incoming vreg always
    // dies at this use, and the destination's physical register (if any)
    // is only handed out once its previous occupant's live range has
    // already ended, so neither needs saving — everything else does.
    let dest_reg = dest.map(|d| e.location(d)).and_then(|loc| match loc {
        Location::Reg(g) => Some(g),
        Location::Stack(_) => None,
    });
    let to_save: Vec<Gpr> = CALLER_SAVED
        .iter()
        .copied()
        .filter(|g| !arg_regs[..live_args].iter().any(|a| discriminant_eq(*a, *g)))
        .filter(|g| dest_reg.map_or(true, |d| !discriminant_eq(d, *g)))
        .collect();
    for &g in &to_save {
        e.enc.push_reg(g);
    }

    for (i, &arg) in args.iter().enumerate().take(arg_regs.len()) {
        let g = e.load_into(arg, arg_regs[i]);
        if !discriminant_eq(g, arg_regs[i]) {
            e.enc.mov_reg_reg(arg_regs[i], g);
        }
    }

    emit_call_and_record(e, RelocationTarget::Function(idx));

    if let Some(d) = dest {
        store_call_result(e, d);
    }

    for &g in to_save.iter().rev() {
        e.enc.pop_reg(g);
    }
}

/// Helper-bridge call: every argument is a boxed `Value`, passed on the
/// native stack as three words each in reverse field order (ptr, num,
/// tag) so the pushed bytes read back as a packed 24-byte record starting
/// at the final stack pointer. The caller restores `RSP` after the call
/// returns, since helpers don't clean up their own arguments.
fn emit_helper_call(e: &mut Emitter, dest: Option<Reg>, name: &'static str, args: &[Reg]) {
    let dest_reg = dest.map(|d| e.location(d)).and_then(|loc| match loc {
        Location::Reg(g) => Some(g),
        Location::Stack(_) => None,
    });
    let to_save: Vec<Gpr> = CALLER_SAVED
        .iter()
        .copied()
        .filter(|g| dest_reg.map_or(true, |d| !discriminant_eq(d, *g)))
        .collect();
    for &g in &to_save {
        e.enc.push_reg(g);
    }

    for &arg in args.iter().rev() {
        let (tag_off, num_off, ptr_off) = e.value_offsets(arg);
        e.enc.mov_reg_mem(Gpr::Rax, Gpr::Rbp, ptr_off);
        e.enc.push_reg(Gpr::Rax);
        e.enc.mov_reg_mem(Gpr::Rax, Gpr::Rbp, num_off);
        e.enc.push_reg(Gpr::Rax);
        e.enc.mov_reg_mem(Gpr::Rax, Gpr::Rbp, tag_off);
        e.enc.push_reg(Gpr::Rax);
    }

    emit_call_and_record(e, RelocationTarget::Helper(name));

    let pushed_bytes = (args.len() * 3 * 8) as i32;
    if pushed_bytes > 0 {
        e.enc.mov_reg_imm32(Gpr::Rax, pushed_bytes);
        e.enc.add_reg_reg(Gpr::Rsp, Gpr::Rax);
    }

    if let Some(d) = dest {
        store_call_result(e, d);
    }

    for &g in to_save.iter().rev() {
        e.enc.pop_reg(g);
    }
}

fn discriminant_eq(a: Gpr, b: Gpr) -> bool {
    std::mem::discriminant(&a) == std::mem::discriminant(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::JitBuilder;
    use crate::regalloc;

    #[test]
    fn emits_nonempty_code_for_constant_return() {
        let mut func = JitFunction::new(0, "f", 0, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let c = b.const_int(42);
            b.ret(Some(c));
        }
        let alloc = regalloc::allocate(&func);
        let compiled = emit(&func, &alloc);
        assert!(!compiled.code.is_empty());
        assert!(compiled.code.ends_with(&[0xC3]));
    }

    #[test]
    fn helper_call_records_a_relocation() {
        let mut func = JitFunction::new(0, "f", 1, 0);
        {
            let mut b = JitBuilder::new(&mut func);
            let a = b.load_local(crate::ir::LocalSlot(0), crate::ir::JitType::Value);
            let r = b.call_helper("IsTruthy", &[a]);
            b.ret(Some(r));
        }
        let alloc = regalloc::allocate(&func);
        let compiled = emit(&func, &alloc);
        assert_eq!(compiled.relocations.len(), 1);
        assert_eq!(compiled.relocations[0].target, RelocationTarget::Helper("IsTruthy"));
    }
}
